//! Service configuration
//!
//! TOML file with environment-variable path resolution. Every field has a
//! workable default so a bare `stratus run` against the public endpoints
//! needs no config file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

fn default_snapshot_url() -> String {
    "https://data.vatsim.net/v3/vatsim-data.json".to_string()
}

fn default_transceivers_url() -> String {
    "https://data.vatsim.net/v3/transceivers-data.json".to_string()
}

fn default_cycle_secs() -> u64 {
    15
}

fn default_fir_url() -> String {
    "https://map.vatsim.net/livedata/firboundaries.json".to_string()
}

fn default_tracon_url() -> String {
    "https://map.vatsim.net/livedata/traconboundaries.json".to_string()
}

fn default_reports_url() -> String {
    "https://aviationweather.gov/data/cache/metars.cache.xml.gz".to_string()
}

fn default_forecasts_url() -> String {
    "https://aviationweather.gov/data/cache/tafs.cache.xml.gz".to_string()
}

fn default_weather_check_secs() -> u64 {
    60
}

fn default_airports_csv() -> PathBuf {
    PathBuf::from("./airports.csv")
}

fn default_metrics_port() -> u16 {
    9184
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
    #[serde(default = "default_transceivers_url")]
    pub transceivers_url: String,
    /// Seconds between fusion cycles
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    #[serde(default = "default_fir_url")]
    pub fir_url: String,
    #[serde(default = "default_tracon_url")]
    pub tracon_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_reports_url")]
    pub reports_url: String,
    #[serde(default = "default_forecasts_url")]
    pub forecasts_url: String,
    /// Seconds between refresh-due checks (the cache itself enforces the
    /// ten-minute refresh interval)
    #[serde(default = "default_weather_check_secs")]
    pub check_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// OurAirports airports.csv dump
    #[serde(default = "default_airports_csv")]
    pub airports_csv: PathBuf,
    /// Optional fleet registry JSON; registrations pass through raw
    /// when absent
    #[serde(default)]
    pub fleet_json: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub boundaries: BoundaryConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_url: default_snapshot_url(),
            transceivers_url: default_transceivers_url(),
            cycle_secs: default_cycle_secs(),
        }
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            fir_url: default_fir_url(),
            tracon_url: default_tracon_url(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            reports_url: default_reports_url(),
            forecasts_url: default_forecasts_url(),
            check_secs: default_weather_check_secs(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            airports_csv: default_airports_csv(),
            fleet_json: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            feed: FeedConfig::default(),
            boundaries: BoundaryConfig::default(),
            weather: WeatherConfig::default(),
            reference: ReferenceConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file means defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `STRATUS_CONFIG` env var
/// 2. `/etc/stratus/stratus.toml` (production/staging)
/// 3. `./stratus.toml` (development)
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("STRATUS_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("STRATUS_ENV").as_deref() {
        Ok("production") | Ok("staging") => PathBuf::from("/etc/stratus/stratus.toml"),
        _ => PathBuf::from("./stratus.toml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.feed.cycle_secs, 15);
        assert!(config.feed.snapshot_url.starts_with("https://"));
        assert!(config.reference.fleet_json.is_none());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"
[feed]
cycle_secs = 30

[reference]
airports_csv = "/srv/stratus/airports.csv"
"#,
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.feed.cycle_secs, 30);
        assert_eq!(config.feed.snapshot_url, default_snapshot_url());
        assert_eq!(
            config.reference.airports_csv,
            PathBuf::from("/srv/stratus/airports.csv")
        );
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let config = Config::load(Path::new("/nonexistent/stratus.toml")).unwrap();
        assert_eq!(config.feed.cycle_secs, 15);
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.feed.snapshot_url, config.feed.snapshot_url);
        assert_eq!(parsed.metrics_port, config.metrics_port);
    }
}
