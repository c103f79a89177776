/// Service configuration.
///
/// Settings come from a TOML file (default `./gagewatch.toml`, overridable
/// with `GAGEWATCH_CONFIG`), after `.env` has been loaded into the process
/// environment. Every section and key is optional; a missing file yields
/// the defaults. `GAGEWATCH_LOG_LEVEL` overrides `[logging] level`.
///
/// Detection and trend thresholds are constants in `alert::rapid_increase`
/// and `analysis::trend`, not settings.
///
/// ```toml
/// [session]
/// max_stations = 4
/// stale_after_minutes = 60
///
/// [series]
/// duplicate_policy = "first_wins"
///
/// [fetch]
/// timeout_secs = 30
/// use_proxies = true
///
/// [[fetch.proxies]]
/// name = "ThingProxy"
/// kind = "path_prefix"
/// base = "https://thingproxy.freeboard.io/fetch/"
///
/// [logging]
/// level = "info"
/// file = "gagewatch.log"
/// timestamps = true
/// ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::ingest::fetch::{ProxyKind, ProxyRoute};
use crate::logging::LogLevel;
use crate::series::DuplicatePolicy;
use crate::stations::DEFAULT_MAX_STATIONS;

pub const CONFIG_PATH_VAR: &str = "GAGEWATCH_CONFIG";
pub const LOG_LEVEL_VAR: &str = "GAGEWATCH_LOG_LEVEL";
pub const DEFAULT_CONFIG_PATH: &str = "./gagewatch.toml";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    /// Parsed fine but a value is out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config read error: {}", e),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_stations: usize,
    pub stale_after_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_stations: DEFAULT_MAX_STATIONS,
            stale_after_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Route requests through `proxies` (in order) instead of directly.
    pub use_proxies: bool,
    pub proxies: Vec<ProxyRoute>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout_secs: 30,
            use_proxies: false,
            proxies: vec![
                ProxyRoute {
                    name: "ThingProxy".to_string(),
                    kind: ProxyKind::PathPrefix,
                    base: "https://thingproxy.freeboard.io/fetch/".to_string(),
                },
                ProxyRoute {
                    name: "CorsProxy.io".to_string(),
                    kind: ProxyKind::QueryParam {
                        param: "url".to_string(),
                    },
                    base: "https://corsproxy.io/".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            file: None,
            timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub series: SeriesConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file. A missing file is not an error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        Config::from_toml_str(&text)
    }

    /// Loads `.env`, then the config file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Config::from_file(Path::new(&path))?;

        if let Ok(level) = std::env::var(LOG_LEVEL_VAR) {
            config.logging.level = level.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_stations == 0 {
            return Err(ConfigError::Invalid(
                "session.max_stations must be at least 1".to_string(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.fetch.use_proxies && self.fetch.proxies.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.use_proxies is set but no fetch.proxies are configured".to_string(),
            ));
        }
        Ok(())
    }
}
