/// Station selection rules.
///
/// The service watches a handful of stations picked by the user. Station
/// ids are USGS site numbers: 8 to 15 ASCII digits. Anything else would be
/// silently dropped by the IV API, so it is rejected up front.

/// Default cap on simultaneously selected stations.
pub const DEFAULT_MAX_STATIONS: usize = 4;

/// Returns `true` for a plausible USGS site number (8–15 digits).
pub fn is_valid_station_id(id: &str) -> bool {
    (8..=15).contains(&id.len()) && id.chars().all(|c| c.is_ascii_digit())
}

/// Trims surrounding whitespace, the way ids typed into a form arrive.
pub fn normalize_station_id(raw: &str) -> &str {
    raw.trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
