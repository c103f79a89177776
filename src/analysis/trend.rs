//! Trend classification over the most recent readings.

use crate::model::{Sample, Trend, TrendDirection, TrendError};

/// Number of trailing samples the classifier looks at.
pub const RECENT_WINDOW: usize = 10;

/// Minimum number of samples before a direction is reported.
pub const MIN_SAMPLES: usize = 3;

/// Change, in percent, beyond which the trend is up or down.
pub const STABLE_BAND_PERCENT: f64 = 5.0;

/// Classifies the direction of the last `RECENT_WINDOW` samples.
///
/// The change is measured from the first to the last sample of that window
/// by position, not between extremes. Fewer than `MIN_SAMPLES` samples gives
/// an `Insufficient` trend. A window starting at zero has no defined
/// percentage and returns `TrendError::ZeroBaseline`; a change too large to
/// represent returns `TrendError::NonFinite`.
pub fn classify_trend(samples: &[Sample]) -> Result<Trend, TrendError> {
    if samples.len() < MIN_SAMPLES {
        return Ok(Trend::insufficient());
    }

    let recent = &samples[samples.len() - RECENT_WINDOW.min(samples.len())..];
    let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
        return Ok(Trend::insufficient());
    };

    if first.value == 0.0 {
        return Err(TrendError::ZeroBaseline);
    }

    let percent_change = (last.value - first.value) / first.value * 100.0;
    if !percent_change.is_finite() {
        return Err(TrendError::NonFinite);
    }

    let direction = if percent_change > STABLE_BAND_PERCENT {
        TrendDirection::Up
    } else if percent_change < -STABLE_BAND_PERCENT {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };

    Ok(Trend {
        direction,
        percent_change: Some(percent_change),
    })
}
