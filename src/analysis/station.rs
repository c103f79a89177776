//! Per-station analysis snapshot.
//!
//! A `StationAnalysis` is always recomputed from the whole series, never
//! patched, so its alerts and trend cannot drift from the series content.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::rapid_increase::scan_windows;
use crate::alert::stalenesses::latest_is_stale_at;
use crate::analysis::trend::classify_trend;
use crate::logging::{self, DataSource};
use crate::model::{Alert, Sample, Trend, TrendError};
use crate::parameters::{ParameterInfo, parameter_info};
use crate::series::Series;

/// Everything the presentation layer shows for one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationAnalysis {
    pub station_id: String,
    /// Site name reported by the upstream service, if known.
    pub site_name: Option<String>,
    pub parameter: ParameterInfo,
    pub series: Series,
    pub alerts: Vec<Alert>,
    pub significant_increases: usize,
    pub trend: Result<Trend, TrendError>,
    /// Current value: the last sample by time.
    pub latest: Option<Sample>,
}

impl StationAnalysis {
    /// Runs the detector and classifier over `series`.
    ///
    /// # Panics
    /// If `series` is not strictly increasing by timestamp. Only the merge
    /// engine builds series, so this is a defect there, not a data problem.
    pub fn compute(
        station_id: &str,
        site_name: Option<&str>,
        parameter_code: &str,
        series: Series,
    ) -> Self {
        assert!(
            series.is_strictly_increasing(),
            "series for station {} is not strictly increasing",
            station_id
        );

        let scan = scan_windows(series.samples());
        let trend = classify_trend(series.samples());

        logging::debug(
            DataSource::Analysis,
            Some(station_id),
            &format!(
                "1-hour window analysis over {} samples: {} increases >=30%, {} alerts >=100%",
                series.len(),
                scan.significant_increases,
                scan.alerts.len()
            ),
        );
        for alert in &scan.alerts {
            logging::info(
                DataSource::Analysis,
                Some(station_id),
                &format!(
                    "Rapid increase: {:.2} -> {:.2} (+{:.1}% in {:.0} min) from {} to {}",
                    alert.window_start.value,
                    alert.window_peak.value,
                    alert.percent_increase,
                    alert.window_minutes,
                    alert.window_start.timestamp.format("%b %d %H:%M"),
                    alert.window_peak.timestamp.format("%b %d %H:%M"),
                ),
            );
        }
        if let Err(e) = &trend {
            logging::warn(DataSource::Analysis, Some(station_id), &e.to_string());
        }

        StationAnalysis {
            station_id: station_id.to_string(),
            site_name: site_name.map(String::from),
            parameter: *parameter_info(parameter_code),
            latest: series.latest().copied(),
            series,
            alerts: scan.alerts,
            significant_increases: scan.significant_increases,
            trend,
        }
    }

    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }

    /// Whether the newest sample is older than `max_age_minutes`.
    pub fn is_stale_at(&self, max_age_minutes: u64, now: DateTime<Utc>) -> bool {
        latest_is_stale_at(self.latest.as_ref(), max_age_minutes, now)
    }
}
