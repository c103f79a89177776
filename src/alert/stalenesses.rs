/// Latest-reading staleness detection.
///
/// USGS gauges update every 15 minutes under normal conditions. During a
/// surge, stale data is dangerous: a sensor outage may look like a flat
/// series. These helpers flag a station whose newest sample is too old.
///
/// # Clock injection
/// All functions accept a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, keeping them deterministic in tests.

use chrono::{DateTime, Utc};

use crate::model::Sample;

/// Returns `true` if the sample is older than `max_age_minutes` relative
/// to `now`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
///
/// Samples dated in the future (clock skew) are never stale.
pub fn is_stale_at(sample: &Sample, max_age_minutes: u64, now: DateTime<Utc>) -> bool {
    let age_minutes = (now - sample.timestamp).num_minutes();
    age_minutes > 0 && age_minutes as u64 > max_age_minutes
}

/// Staleness of an optional latest sample. A station with no samples at
/// all is treated as stale.
pub fn latest_is_stale_at(
    latest: Option<&Sample>,
    max_age_minutes: u64,
    now: DateTime<Utc>,
) -> bool {
    latest.is_none_or(|s| is_stale_at(s, max_age_minutes, now))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
