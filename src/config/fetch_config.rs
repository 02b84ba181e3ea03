//! Fetch Configuration - site, projection, gateway and pipeline settings as TOML
//!
//! Every section implements `Default`, so an empty file (or no file at all)
//! yields a working configuration. Only the site identity has no useful
//! default and must be supplied by the file or the command line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{
    CACHE_PRECISION_DECIMALS, CROPSCAPE_URL, DEFAULT_FETCH_DISTANCE_M, GATEWAY_RETRIES,
    GATEWAY_RETRY_BACKOFF_MS, GATEWAY_TIMEOUT_MS, MAX_CONCURRENT_CLASSIFICATIONS, MISSING_VALUE,
};
use crate::geodesy::ProjectionMethod;
use crate::types::{Coordinate, SiteKey};

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "FLUXFETCH_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fluxfetch.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one attribution run.
///
/// Load with `FetchConfig::load()` which searches:
/// 1. `$FLUXFETCH_CONFIG` env var
/// 2. `./fluxfetch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Site identity and location
    #[serde(default)]
    pub site: SiteConfig,

    /// Footprint projection
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Land-cover classification service
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Batch execution policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Column mapping for sample files
    #[serde(default)]
    pub input: InputConfig,
}

impl FetchConfig {
    /// Load configuration using the standard search order:
    /// 1. `$FLUXFETCH_CONFIG` environment variable
    /// 2. `./fluxfetch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), site = %config.site.key(), "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        // 2. Check ./fluxfetch.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(site = %config.site.key(), "Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;

        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(&config);
        for w in &range_warnings {
            warn!("{}", w);
        }
        if !range_errors.is_empty() {
            return Err(ConfigError::Validation(range_errors));
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all settings, collecting every problem.
    ///
    /// Rules:
    /// - Footprint distance must be finite and non-negative
    /// - Gateway timeout and pipeline concurrency must be positive
    /// - Optional limits, when set, must be positive
    /// - Site latitude/longitude must be in range and set together
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let d = self.projection.distance_m;
        if !d.is_finite() || d < 0.0 {
            errors.push(format!(
                "projection.distance_m must be a finite, non-negative number of metres (got {d})"
            ));
        }

        if self.gateway.timeout_ms == 0 {
            errors.push("gateway.timeout_ms must be > 0".to_string());
        }
        if !(self.gateway.base_url.starts_with("http://")
            || self.gateway.base_url.starts_with("https://"))
        {
            errors.push(format!(
                "gateway.base_url must be an http(s) URL (got '{}')",
                self.gateway.base_url
            ));
        }
        if self.gateway.cache_precision > 9 {
            errors.push(format!(
                "gateway.cache_precision must be <= 9 decimal places (got {})",
                self.gateway.cache_precision
            ));
        }

        if self.pipeline.max_concurrency == 0 {
            errors.push("pipeline.max_concurrency must be >= 1".to_string());
        }
        if self.pipeline.batch_deadline_secs == Some(0) {
            errors.push("pipeline.batch_deadline_secs must be > 0 when set".to_string());
        }
        if self.pipeline.max_consecutive_failures == Some(0) {
            errors.push("pipeline.max_consecutive_failures must be > 0 when set".to_string());
        }

        match (self.site.latitude, self.site.longitude) {
            (Some(lat), Some(lon)) => {
                if !Coordinate::new(lat, lon).is_valid() {
                    errors.push(format!(
                        "site.latitude/longitude ({lat}, {lon}) is outside the geographic range"
                    ));
                }
            }
            (None, None) => {}
            _ => errors.push("site.latitude and site.longitude must be set together".to_string()),
        }

        for (name, column) in [
            ("input.time_column", &self.input.time_column),
            ("input.bearing_column", &self.input.bearing_column),
            ("input.latitude_column", &self.input.latitude_column),
            ("input.longitude_column", &self.input.longitude_column),
        ] {
            if column.trim().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Site
// ============================================================================

/// Which site the samples come from and where it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Network code, e.g. "sgp"
    #[serde(default)]
    pub network: String,

    /// Facility code, e.g. "E14"
    #[serde(default)]
    pub facility: String,

    /// Instrument latitude, used when the sample file has no latitude column
    #[serde(default)]
    pub latitude: Option<f64>,

    /// Instrument longitude, used when the sample file has no longitude column
    #[serde(default)]
    pub longitude: Option<f64>,

    /// Sector table file; the built-in table is used when unset
    #[serde(default)]
    pub sector_file: Option<PathBuf>,
}

impl SiteConfig {
    pub fn key(&self) -> SiteKey {
        SiteKey::new(&self.network, &self.facility)
    }

    pub fn origin(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        }
    }
}

// ============================================================================
// Projection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Upwind footprint distance in metres
    #[serde(default = "default_distance_m")]
    pub distance_m: f64,

    /// "vincenty" (WGS-84 ellipsoid) or "spherical"
    #[serde(default)]
    pub method: ProjectionMethod,
}

fn default_distance_m() -> f64 { DEFAULT_FETCH_DISTANCE_M }

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            distance_m: default_distance_m(),
            method: ProjectionMethod::default(),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// CropScape `GetCDLValue` endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts for retryable failures
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base retry backoff (ms), doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Decimal places of the coordinate kept in the cache key
    #[serde(default = "default_cache_precision")]
    pub cache_precision: u32,
}

fn default_base_url() -> String { CROPSCAPE_URL.to_string() }
fn default_timeout_ms() -> u64 { GATEWAY_TIMEOUT_MS }
fn default_retries() -> u32 { GATEWAY_RETRIES }
fn default_retry_backoff_ms() -> u64 { GATEWAY_RETRY_BACKOFF_MS }
fn default_cache_precision() -> u32 { CACHE_PRECISION_DECIMALS }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cache_precision: default_cache_precision(),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classifier calls in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Overall deadline for a batch (seconds); unlimited when unset
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,

    /// Abort the batch after this many consecutive gateway failures;
    /// never abort when unset
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

fn default_max_concurrency() -> usize { MAX_CONCURRENT_CLASSIFICATIONS }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            batch_deadline_secs: None,
            max_consecutive_failures: None,
        }
    }
}

// ============================================================================
// Input
// ============================================================================

/// Column names in sample CSV files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_time_column")]
    pub time_column: String,

    #[serde(default = "default_bearing_column")]
    pub bearing_column: String,

    #[serde(default = "default_latitude_column")]
    pub latitude_column: String,

    #[serde(default = "default_longitude_column")]
    pub longitude_column: String,

    /// Upstream QC column; samples assessed "Bad" are dropped before attribution
    #[serde(default)]
    pub upstream_qc_column: Option<String>,

    /// Numeric sentinel treated as missing
    #[serde(default = "default_missing_value")]
    pub missing_value: f64,
}

fn default_time_column() -> String { "time".to_string() }
fn default_bearing_column() -> String { "wind_dir".to_string() }
fn default_latitude_column() -> String { "lat".to_string() }
fn default_longitude_column() -> String { "lon".to_string() }
fn default_missing_value() -> f64 { MISSING_VALUE }

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            time_column: default_time_column(),
            bearing_column: default_bearing_column(),
            latitude_column: default_latitude_column(),
            longitude_column: default_longitude_column(),
            upstream_qc_column: None,
            missing_value: default_missing_value(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
