//! Configuration management for feltmap.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "feltmap";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "feltmap.db";

/// Default GeoNet API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.geonet.org.nz";

/// Approximate length of New Zealand; reports further than this from the
/// epicentre are treated as bad coordinates.
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 1500.0;

/// Intensity range accepted by the GeoNet quake endpoint.
const MMI_RANGE: std::ops::RangeInclusive<i32> = -1..=8;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FELTMAP_`, sections separated
///    by `__`, e.g. `FELTMAP_API__MIN_MMI=4`)
/// 2. TOML config file at `~/.config/feltmap/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GeoNet API configuration.
    pub api: ApiConfig,
    /// Analysis thresholds.
    pub analysis: AnalysisConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// CSV export configuration.
    pub export: ExportConfig,
}

/// API client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the quake API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after a transient failure.
    pub max_retries: u32,
    /// Only quakes with at least this modelled intensity are fetched.
    pub min_mmi: i32,
}

/// Analysis thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Reports further than this from the epicentre are discarded.
    pub max_distance_km: f64,
    /// Map points west of this longitude are discarded.
    pub min_longitude: f64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/feltmap/feltmap.db`
    pub database_path: Option<PathBuf>,
}

/// CSV export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory the CSV files are written to.
    pub output_dir: PathBuf,
    /// File name of the processed quake list.
    pub quakes_file: String,
    /// File name of the full sensitivity table.
    pub sensitivity_file: String,
    /// File name of the deduplicated map layer.
    pub map_file: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            min_mmi: 5,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            min_longitude: 0.0,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            quakes_file: "quakes.csv".to_string(),
            sensitivity_file: "sensitivity.csv".to_string(),
            map_file: "map_points.csv".to_string(),
        }
    }
}

impl ApiConfig {
    /// Per-request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ExportConfig {
    /// Full path of the quake list.
    #[must_use]
    pub fn quakes_path(&self) -> PathBuf {
        self.output_dir.join(&self.quakes_file)
    }

    /// Full path of the sensitivity table.
    #[must_use]
    pub fn sensitivity_path(&self) -> PathBuf {
        self.output_dir.join(&self.sensitivity_file)
    }

    /// Full path of the map layer.
    #[must_use]
    pub fn map_path(&self) -> PathBuf {
        self.output_dir.join(&self.map_file)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FELTMAP_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(invalid(format!(
                "api.base_url is not a URL: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(invalid("api.timeout_secs must be greater than 0"));
        }

        if !MMI_RANGE.contains(&self.api.min_mmi) {
            return Err(invalid(format!(
                "api.min_mmi ({}) must be between {} and {}",
                self.api.min_mmi,
                MMI_RANGE.start(),
                MMI_RANGE.end()
            )));
        }

        if !(self.analysis.max_distance_km.is_finite() && self.analysis.max_distance_km > 0.0) {
            return Err(invalid(format!(
                "analysis.max_distance_km ({}) must be a positive number",
                self.analysis.max_distance_km
            )));
        }

        if !(-180.0..=180.0).contains(&self.analysis.min_longitude) {
            return Err(invalid(format!(
                "analysis.min_longitude ({}) must be between -180 and 180",
                self.analysis.min_longitude
            )));
        }

        for (key, name) in [
            ("export.quakes_file", &self.export.quakes_file),
            ("export.sensitivity_file", &self.export.sensitivity_file),
            ("export.map_file", &self.export.map_file),
        ] {
            if name.trim().is_empty() {
                return Err(invalid(format!("{key} must not be empty")));
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
