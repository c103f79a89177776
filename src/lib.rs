//! Surge detection and trend analysis for USGS gage readings.
//!
//! Readings for each selected station are merged into an ordered series
//! (`series`), scanned for rapid increases (`alert::rapid_increase`) and
//! summarized as a trend (`analysis::trend`). `session::AnalysisSession`
//! ties these together and hands snapshots to the presentation layer.
//! `ingest` holds the retrieval adapters that feed it.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod parameters;
pub mod series;
pub mod session;
pub mod stations;
