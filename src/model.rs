/// Core data types for the gage surge analysis service.
///
/// This module defines the shared domain model imported by all other modules:
/// samples, raw readings as handed over by the fetch layer, alerts, trends,
/// and the error types. It contains no I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameter codes
// ---------------------------------------------------------------------------

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// USGS parameter code for gage height (stage), in feet.
pub const PARAM_STAGE: &str = "00065";

/// USGS parameter code for water temperature, in degrees Celsius.
pub const PARAM_TEMPERATURE: &str = "00010";

/// USGS parameter code for turbidity, in formazin nephelometric units.
pub const PARAM_TURBIDITY: &str = "63680";

// ---------------------------------------------------------------------------
// Sample types
// ---------------------------------------------------------------------------

/// A single validated measurement. `value` is always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Sample { timestamp, value }
    }
}

/// Timestamp of a raw reading, either already an instant or the text the
/// upstream service sent (e.g. "2024-05-01T12:00:00.000-05:00").
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Instant(DateTime<Utc>),
    Text(String),
}

impl RawTimestamp {
    /// Resolves the timestamp to UTC. RFC 3339 is tried first; offset-less
    /// text is read as UTC, and a bare `YYYY-MM-DD` as midnight UTC.
    /// Returns `None` for anything else.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Instant(t) => Some(*t),
            RawTimestamp::Text(s) => {
                let s = s.trim();
                if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                    return Some(t.with_timezone(&Utc));
                }
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                    })
                    .map(|naive| naive.and_utc())
            }
        }
    }
}

/// Value of a raw reading: USGS sends numbers as strings, other callers
/// may hand over numbers directly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Returns the numeric value if it is present and finite.
    pub fn as_finite(&self) -> Option<f64> {
        let v = match self {
            RawValue::Number(v) => *v,
            RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

/// One unvalidated `(timestamp, value)` pair from the fetch collaborator.
///
/// Field names match the entries of the `values[].value[]` array of a USGS
/// IV response so batches can be deserialized directly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    #[serde(rename = "dateTime")]
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub value: Option<RawValue>,
}

impl RawReading {
    pub fn at(timestamp: DateTime<Utc>, value: f64) -> Self {
        RawReading {
            timestamp: RawTimestamp::Instant(timestamp),
            value: Some(RawValue::Number(value)),
        }
    }

    /// Converts to a `Sample`, or `None` when the reading is malformed.
    pub fn to_sample(&self) -> Option<Sample> {
        let value = self.value.as_ref()?.as_finite()?;
        let timestamp = self.timestamp.to_utc()?;
        Some(Sample { timestamp, value })
    }
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// A window in which the value at least doubled within one hour.
///
/// `window_start.value` is always positive and the peak lies no more than
/// 60 minutes after the start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub window_start: Sample,
    pub window_peak: Sample,
    pub percent_increase: f64,
    pub window_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
    Insufficient,
}

/// Direction of the most recent readings. `percent_change` is `None`
/// exactly when the direction is `Insufficient`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub percent_change: Option<f64>,
}

impl Trend {
    pub fn insufficient() -> Self {
        Trend {
            direction: TrendDirection::Insufficient,
            percent_change: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Trend classification could not produce a finite percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendError {
    /// The first value of the recent window is zero.
    ZeroBaseline,
    /// The change overflowed to infinity (e.g. 1e-300 to 1e300).
    NonFinite,
}

impl std::fmt::Display for TrendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendError::ZeroBaseline => {
                write!(f, "Trend unavailable: recent window starts at zero")
            }
            TrendError::NonFinite => {
                write!(f, "Trend unavailable: percent change is not finite")
            }
        }
    }
}

impl std::error::Error for TrendError {}

/// Errors that can arise when fetching or parsing USGS NWIS data.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    HttpError(u16),
    /// The request never produced a response (DNS, TLS, timeout, ...).
    Transport(String),
    /// The response body could not be deserialized.
    ParseError(String),
    /// The requested site code was not found in the response.
    SiteNotFound(String),
    /// The response contained no usable time series.
    NoDataAvailable(String),
    /// Every configured route failed; carries the last failure seen.
    AllRoutesFailed { attempts: usize, last_error: String },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchError::Transport(msg) => write!(f, "Transport error: {}", msg),
            FetchError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            FetchError::SiteNotFound(site) => write!(f, "Site not found: {}", site),
            FetchError::NoDataAvailable(site) => {
                write!(f, "No data available for site: {}", site)
            }
            FetchError::AllRoutesFailed { attempts, last_error } => write!(
                f,
                "All {} routes failed. Last error: {}",
                attempts, last_error
            ),
        }
    }
}

impl std::error::Error for FetchError {}

/// Errors returned by `session::AnalysisSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Station ids are 8–15 ASCII digits.
    InvalidStationId(String),
    DuplicateStation(String),
    TooManyStations { max: usize },
    /// The station is not (or no longer) selected; the batch was discarded.
    StationNotActive(String),
    /// The batch was fetched for a parameter the session no longer shows.
    ParameterMismatch { expected: String, received: String },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidStationId(id) => write!(
                f,
                "Invalid USGS station ID '{}' (expected 8-15 digits)",
                id
            ),
            SessionError::DuplicateStation(id) => write!(f, "Station already selected: {}", id),
            SessionError::TooManyStations { max } => {
                write!(f, "Maximum {} stations allowed", max)
            }
            SessionError::StationNotActive(id) => write!(f, "Station not active: {}", id),
            SessionError::ParameterMismatch { expected, received } => write!(
                f,
                "Parameter mismatch: session shows {}, batch is for {}",
                expected, received
            ),
        }
    }
}

impl std::error::Error for SessionError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
