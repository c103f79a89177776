//! Alerting: rapid-increase windows and stale latest readings.

pub mod rapid_increase;
pub mod stalenesses;
