/// Parameter catalog.
///
/// Maps USGS parameter codes to the display metadata the presentation layer
/// needs (name, unit, decimal precision). The analysis core never formats
/// values itself; it only passes this metadata through with each snapshot.
/// Unknown codes resolve to `FALLBACK_PARAMETER` instead of failing.

use serde::Serialize;

pub use crate::model::{PARAM_DISCHARGE, PARAM_STAGE, PARAM_TEMPERATURE, PARAM_TURBIDITY};

/// Display metadata for one parameter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterInfo {
    /// 5-digit USGS parameter code, empty for the fallback entry.
    pub code: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    /// Number of decimal places the presentation layer should show.
    pub precision: usize,
}

/// All parameters the service knows how to label.
pub static PARAMETER_CATALOG: &[ParameterInfo] = &[
    ParameterInfo {
        code: PARAM_DISCHARGE,
        display_name: "Discharge",
        unit: "ft³/s",
        precision: 1,
    },
    ParameterInfo {
        code: PARAM_STAGE,
        display_name: "Gage Height",
        unit: "ft",
        precision: 2,
    },
    ParameterInfo {
        code: PARAM_TEMPERATURE,
        display_name: "Temperature",
        unit: "°C",
        precision: 1,
    },
    ParameterInfo {
        code: PARAM_TURBIDITY,
        display_name: "Turbidity",
        unit: "NTU",
        precision: 1,
    },
];

/// Used for any code missing from `PARAMETER_CATALOG`.
pub static FALLBACK_PARAMETER: ParameterInfo = ParameterInfo {
    code: "",
    display_name: "Unknown Parameter",
    unit: "",
    precision: 2,
};

/// Looks up a parameter by code. Returns `None` if not cataloged.
pub fn find_parameter(code: &str) -> Option<&'static ParameterInfo> {
    PARAMETER_CATALOG.iter().find(|p| p.code == code)
}

/// Looks up a parameter, falling back to `FALLBACK_PARAMETER`.
pub fn parameter_info(code: &str) -> &'static ParameterInfo {
    find_parameter(code).unwrap_or(&FALLBACK_PARAMETER)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
