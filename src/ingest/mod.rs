//! Retrieval adapters that feed the analysis core.
//!
//! - `fetch`: the `Fetch` capability, direct HTTP and proxy fallback.
//! - `usgs`: IV request URLs and response parsing.

pub mod fetch;
pub mod usgs;
