/// Series analysis beyond alerting.
///
/// Submodules:
/// - `trend`: classifies the direction of the most recent readings.
/// - `station`: full per-station recomputation combining alerts and trend.

pub mod station;
pub mod trend;
