//! Configuration management for the `UrbanFix` core
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::UrbanFixError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UrbanFixConfig {
    /// Local persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Reverse geocoding settings
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    /// Detection and report services
    #[serde(default)]
    pub services: ServicesConfig,
    /// Map clustering settings
    #[serde(default)]
    pub map: MapConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP surface
    #[serde(default)]
    pub server: ServerConfig,
    /// Fixed device position for headless deployments
    #[serde(default)]
    pub location: LocationConfig,
}

/// Local persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the marker file and the key-value store
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Marker collection file name inside `data_dir`
    #[serde(default = "default_markers_file")]
    pub markers_file: String,
}

/// Reverse geocoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// Base URL of the Nominatim-compatible service
    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,
    /// User-Agent sent with every lookup
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Preferred language of place names
    #[serde(default = "default_language")]
    pub language: String,
    /// Request timeout in seconds
    #[serde(default = "default_geocoding_timeout")]
    pub timeout_seconds: u32,
    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Lifetime of persisted place names in hours
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_hours: u32,
}

/// Detection and report-generation services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Base URL hosting `/analyze/` and `/generate_report/`
    #[serde(default = "default_services_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_services_timeout")]
    pub timeout_seconds: u32,
}

/// Map clustering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_min_zoom")]
    pub min_zoom: i32,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: i32,
    /// Cluster cell size in screen pixels
    #[serde(default = "default_cluster_radius")]
    pub cluster_radius_px: f64,
    /// Smallest group rendered as a cluster
    #[serde(default = "default_min_cluster_points")]
    pub min_cluster_points: usize,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocationConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// Default value functions
fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("urbanfix").display().to_string())
        .unwrap_or_else(|| "~/.local/share/urbanfix".to_string())
}

fn default_markers_file() -> String {
    "markers.json".to_string()
}

fn default_geocoding_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    "urban-ai".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_geocoding_timeout() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_cache_ttl() -> u32 {
    24 * 30
}

fn default_services_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_services_timeout() -> u32 {
    30
}

fn default_min_zoom() -> i32 {
    5
}

fn default_max_zoom() -> i32 {
    20
}

fn default_cluster_radius() -> f64 {
    40.0
}

fn default_min_cluster_points() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            markers_file: default_markers_file(),
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            user_agent: default_user_agent(),
            language: default_language(),
            timeout_seconds: default_geocoding_timeout(),
            max_retries: default_max_retries(),
            cache_ttl_hours: default_cache_ttl(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: default_services_base_url(),
            timeout_seconds: default_services_timeout(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            cluster_radius_px: default_cluster_radius(),
            min_cluster_points: default_min_cluster_points(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~` expanded to the home directory
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.data_dir)),
            None => PathBuf::from(&self.data_dir),
        }
    }
}

impl UrbanFixConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from file if path is provided or use default location
        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment overrides, e.g. URBANFIX_SERVER__PORT=8080
        builder = builder.add_source(
            Environment::with_prefix("URBANFIX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: UrbanFixConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("urbanfix").join("config.toml"))
    }

    /// Apply default values to empty configuration fields
    pub fn apply_defaults(&mut self) {
        if self.storage.data_dir.is_empty() {
            self.storage.data_dir = default_data_dir();
        }
        if self.storage.markers_file.is_empty() {
            self.storage.markers_file = default_markers_file();
        }
        if self.geocoding.base_url.is_empty() {
            self.geocoding.base_url = default_geocoding_base_url();
        }
        if self.geocoding.user_agent.is_empty() {
            self.geocoding.user_agent = default_user_agent();
        }
        if self.geocoding.timeout_seconds == 0 {
            self.geocoding.timeout_seconds = default_geocoding_timeout();
        }
        if self.geocoding.cache_ttl_hours == 0 {
            self.geocoding.cache_ttl_hours = default_cache_ttl();
        }
        if self.services.base_url.is_empty() {
            self.services.base_url = default_services_base_url();
        }
        if self.services.timeout_seconds == 0 {
            self.services.timeout_seconds = default_services_timeout();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        self.validate_location()?;
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.geocoding.timeout_seconds > 300 || self.services.timeout_seconds > 300 {
            return Err(UrbanFixError::config("Request timeout cannot exceed 300 seconds").into());
        }

        if self.geocoding.max_retries > 10 {
            return Err(UrbanFixError::config("Geocoding max retries cannot exceed 10").into());
        }

        if self.geocoding.cache_ttl_hours > 24 * 365 {
            return Err(UrbanFixError::config("Geocode cache TTL cannot exceed one year").into());
        }

        if !(0..=22).contains(&self.map.min_zoom)
            || !(0..=22).contains(&self.map.max_zoom)
            || self.map.min_zoom >= self.map.max_zoom
        {
            return Err(UrbanFixError::config(
                "Map zoom range must satisfy 0 <= min_zoom < max_zoom <= 22",
            )
            .into());
        }

        if !(self.map.cluster_radius_px > 0.0) {
            return Err(UrbanFixError::config("Cluster radius must be positive").into());
        }

        if self.map.min_cluster_points < 2 {
            return Err(UrbanFixError::config("A cluster needs at least 2 points").into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(UrbanFixError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(UrbanFixError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        for (name, url) in [
            ("Geocoding", &self.geocoding.base_url),
            ("Services", &self.services.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(UrbanFixError::config(format!(
                    "{name} base URL must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        Ok(())
    }

    fn validate_location(&self) -> Result<()> {
        match (self.location.latitude, self.location.longitude) {
            (None, None) => Ok(()),
            (Some(lat), Some(lon))
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
            {
                Ok(())
            }
            (Some(_), Some(_)) => {
                Err(UrbanFixError::config("Configured location is out of range").into())
            }
            _ => Err(UrbanFixError::config(
                "Configured location needs both latitude and longitude",
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = UrbanFixConfig::default();
        assert_eq!(config.geocoding.base_url, "https://nominatim.openstreetmap.org");
        assert_eq!(config.storage.markers_file, "markers.json");
        assert_eq!(config.map.min_zoom, 5);
        assert_eq!(config.map.max_zoom, 20);
        assert_eq!(config.logging.level, "info");
        assert!(config.location.latitude.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = UrbanFixConfig::default();
        config.logging.level = "invalid".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_config_validation_numeric_ranges() {
        let mut config = UrbanFixConfig::default();
        config.geocoding.timeout_seconds = 500;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeout cannot exceed"));
    }

    #[test]
    fn test_config_validation_zoom_range() {
        let mut config = UrbanFixConfig::default();
        config.map.min_zoom = 20;
        config.map.max_zoom = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_half_location() {
        let mut config = UrbanFixConfig::default();
        config.location.latitude = Some(40.0);
        assert!(config.validate().is_err());
        config.location.longitude = Some(-73.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 8081\n\n[map]\ncluster_radius_px = 60.0\n\n[location]\nlatitude = 45.07\nlongitude = 7.68"
        )
        .unwrap();

        let config = UrbanFixConfig::load_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.map.cluster_radius_px, 60.0);
        assert_eq!(config.map.min_zoom, 5);
        assert_eq!(config.location.latitude, Some(45.07));
    }

    #[test]
    fn test_tilde_expansion() {
        let storage = StorageConfig {
            data_dir: "~/urbanfix-data".to_string(),
            markers_file: default_markers_file(),
        };
        let resolved = storage.resolved_data_dir();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("urbanfix-data"));
    }

    #[test]
    fn test_config_path_generation() {
        let path = UrbanFixConfig::get_config_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains("urbanfix"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
