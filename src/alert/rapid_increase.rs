//! Rapid-increase detection.
//!
//! Every sample with a positive value is treated as a baseline. Looking
//! forward up to one hour, the highest value seen is the window peak; if the
//! peak is at least double the baseline the window is reported. Windows are
//! evaluated independently per baseline, so one sustained rise can produce an
//! alert from each qualifying baseline before it.

use chrono::Duration;

use crate::model::{Alert, Sample};

/// Length of the look-ahead window from each baseline.
pub const WINDOW_MINUTES: i64 = 60;

/// Minimum increase, in percent of the baseline, that raises an alert.
pub const ALERT_PERCENT: f64 = 100.0;

/// Increase counted as significant for the scan summary. Never an alert.
pub const SIGNIFICANT_PERCENT: f64 = 30.0;

/// Result of scanning every baseline of a series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowScan {
    /// Alerts in ascending order of `window_start`.
    pub alerts: Vec<Alert>,
    /// Windows whose increase reached `SIGNIFICANT_PERCENT`, alerts included.
    pub significant_increases: usize,
}

/// Returns every window in which the value at least doubled within an hour.
pub fn detect_rapid_increases(samples: &[Sample]) -> Vec<Alert> {
    scan_windows(samples).alerts
}

/// Scans all baselines and returns both the alerts and the number of
/// significant (≥30%) increases.
///
/// Fewer than two samples yields an empty scan. Input need not be sorted.
pub fn scan_windows(samples: &[Sample]) -> WindowScan {
    let mut scan = WindowScan::default();
    if samples.len() < 2 {
        return scan;
    }

    let mut sorted = samples.to_vec();
    if !sorted.is_sorted_by_key(|s| s.timestamp) {
        sorted.sort_by_key(|s| s.timestamp);
    }

    let window = Duration::minutes(WINDOW_MINUTES);

    for (i, base) in sorted.iter().enumerate().take(sorted.len() - 1) {
        // Growth from a zero or negative baseline is undefined.
        if base.value <= 0.0 {
            continue;
        }

        let window_end = base.timestamp + window;
        let mut peak = base;
        for candidate in sorted[i + 1..]
            .iter()
            .take_while(|s| s.timestamp <= window_end)
        {
            if candidate.value > peak.value {
                peak = candidate;
            }
        }

        let percent_increase = (peak.value - base.value) / base.value * 100.0;

        if percent_increase >= SIGNIFICANT_PERCENT {
            scan.significant_increases += 1;
        }

        if percent_increase >= ALERT_PERCENT {
            let elapsed = peak.timestamp - base.timestamp;
            scan.alerts.push(Alert {
                window_start: *base,
                window_peak: *peak,
                percent_increase,
                window_minutes: elapsed.num_milliseconds() as f64 / 60_000.0,
            });
        }
    }

    scan
}

/// Collapses alerts that share a peak sample into the strongest one.
///
/// `detect_rapid_increases` deliberately reports one alert per qualifying
/// baseline. Consumers that want one alert per spike can pass the result
/// through here; the survivor for each peak is the alert with the largest
/// `percent_increase` (earliest baseline on ties). Output is ordered by
/// peak time.
pub fn strongest_per_peak(alerts: &[Alert]) -> Vec<Alert> {
    let mut out: Vec<Alert> = Vec::new();
    for alert in alerts {
        match out
            .iter_mut()
            .find(|a| a.window_peak.timestamp == alert.window_peak.timestamp)
        {
            Some(existing) => {
                if alert.percent_increase > existing.percent_increase {
                    *existing = alert.clone();
                }
            }
            None => out.push(alert.clone()),
        }
    }
    out.sort_by_key(|a| a.window_peak.timestamp);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
