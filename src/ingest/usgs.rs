/// USGS NWIS Instantaneous Values (IV) client helpers.
///
/// Builds IV request URLs and turns IV JSON responses into raw reading
/// batches for the merge engine. Readings are passed on unvalidated apart
/// from the service's own no-data sentinel; the merge engine does the rest.
///
/// API documentation: https://waterservices.usgs.gov/docs/instantaneous-values/

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::ingest::fetch::Fetch;
use crate::model::{FetchError, RawReading};

const IV_BASE_URL: &str = "https://waterservices.usgs.gov/nwis/iv/";

/// Value USGS uses for "no data" when a series omits `noDataValue`.
pub const NO_DATA_SENTINEL: f64 = -999999.0;

// ============================================================================
// Request construction
// ============================================================================

/// Time span of an IV request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IvRange {
    /// ISO 8601 duration back from now, e.g. "PT4H" or "P7D".
    Period(String),
    /// Inclusive calendar dates, sent as `startDT`/`endDT`.
    Dates { start: NaiveDate, end: NaiveDate },
}

impl IvRange {
    /// Yesterday through today relative to `now`, used for current values.
    pub fn recent(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        IvRange::Dates {
            start: (now - Duration::hours(24)).date_naive(),
            end: today,
        }
    }
}

/// Builds an IV request URL for the given sites and parameter codes.
pub fn build_iv_url(sites: &[&str], parameters: &[&str], range: &IvRange) -> String {
    let range_part = match range {
        IvRange::Period(period) => format!("period={}", period),
        IvRange::Dates { start, end } => format!(
            "startDT={}&endDT={}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ),
    };
    format!(
        "{}?format=json&sites={}&parameterCd={}&{}",
        IV_BASE_URL,
        sites.join(","),
        parameters.join(","),
        range_part
    )
}

// ============================================================================
// IV API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct IvResponse {
    value: IvValue,
}

#[derive(Debug, Deserialize)]
struct IvValue {
    #[serde(rename = "timeSeries", default)]
    time_series: Vec<IvTimeSeries>,
}

#[derive(Debug, Deserialize)]
struct IvTimeSeries {
    #[serde(rename = "sourceInfo")]
    source_info: SourceInfo,
    variable: Option<Variable>,
    #[serde(default)]
    values: Vec<IvValues>,
}

#[derive(Debug, Deserialize)]
struct SourceInfo {
    #[serde(rename = "siteName")]
    site_name: String,
    #[serde(rename = "siteCode", default)]
    site_code: Vec<CodeEntry>,
    #[serde(rename = "geoLocation")]
    geo_location: Option<GeoLocation>,
}

#[derive(Debug, Deserialize)]
struct CodeEntry {
    value: String,
}

#[derive(Debug, Deserialize)]
struct GeoLocation {
    #[serde(rename = "geogLocation")]
    geog_location: GeogLocation,
}

#[derive(Debug, Deserialize)]
struct GeogLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Variable {
    #[serde(rename = "variableCode", default)]
    variable_code: Vec<CodeEntry>,
    #[serde(rename = "noDataValue")]
    no_data_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IvValues {
    #[serde(default)]
    value: Vec<RawReading>,
}

/// First time series of an IV response, ready for the merge engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IvSeries {
    pub site_code: String,
    pub site_name: String,
    pub parameter_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub readings: Vec<RawReading>,
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parses an IV JSON body, keeping the first time series and its first
/// block of values.
///
/// Readings equal to the series' no-data value are dropped here. Other
/// malformed readings are left for the merge engine to filter.
pub fn parse_iv_response(body: &str) -> Result<IvSeries, FetchError> {
    let response: IvResponse =
        serde_json::from_str(body).map_err(|e| FetchError::ParseError(e.to_string()))?;

    let Some(series) = response.value.time_series.into_iter().next() else {
        return Err(FetchError::NoDataAvailable(
            "No timeSeries entries in response".to_string(),
        ));
    };

    let no_data = series
        .variable
        .as_ref()
        .and_then(|v| v.no_data_value)
        .unwrap_or(NO_DATA_SENTINEL);
    let parameter_code = series
        .variable
        .and_then(|v| v.variable_code.into_iter().next())
        .map(|c| c.value);

    let readings = series
        .values
        .into_iter()
        .next()
        .map(|block| block.value)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| {
            r.value
                .as_ref()
                .and_then(|v| v.as_finite())
                .is_none_or(|v| v != no_data)
        })
        .collect();

    let site_code = series
        .source_info
        .site_code
        .into_iter()
        .next()
        .map(|c| c.value)
        .unwrap_or_default();
    let (latitude, longitude) = match series.source_info.geo_location {
        Some(geo) => (
            Some(geo.geog_location.latitude),
            Some(geo.geog_location.longitude),
        ),
        None => (None, None),
    };

    Ok(IvSeries {
        site_code,
        site_name: series.source_info.site_name,
        parameter_code,
        latitude,
        longitude,
        readings,
    })
}

/// Fetches one station's series for one parameter.
///
/// A response for a different site than requested is `SiteNotFound`.
pub fn fetch_station_series<F: Fetch>(
    fetcher: &F,
    site_code: &str,
    parameter: &str,
    range: &IvRange,
) -> Result<IvSeries, FetchError> {
    let url = build_iv_url(&[site_code], &[parameter], range);
    let body = fetcher.fetch(&url)?;
    let series = parse_iv_response(&body)?;

    if !series.site_code.is_empty() && series.site_code != site_code {
        return Err(FetchError::SiteNotFound(site_code.to_string()));
    }
    Ok(series)
}

// ============================================================================
// Tests
// ============================================================================
