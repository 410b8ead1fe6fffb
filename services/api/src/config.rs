//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use location_tracking_core::{GeoPoint, MapConfig, SessionConfig, WatchOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// When absent, consent and locations live in memory only.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub allowed_origin: String,
    pub consent_prompt_delay: Duration,
    pub geo_timeout: Duration,
    pub geo_maximum_age: Duration,
    pub map_tile_url: String,
    pub map_fallback_tile_url: String,
    pub map_center: GeoPoint,
    pub map_zoom: u8,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let map_defaults = MapConfig::default();

        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000".parse::<SocketAddr>())?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let allowed_origin =
            lookup("ALLOWED_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Tracking Settings ---
        let consent_prompt_delay = millis(&lookup, "CONSENT_PROMPT_DELAY_MS", 2_000)?;
        let geo_timeout = millis(&lookup, "GEO_TIMEOUT_MS", WatchOptions::CONTINUOUS.timeout.as_millis() as u64)?;
        let geo_maximum_age = millis(
            &lookup,
            "GEO_MAXIMUM_AGE_MS",
            WatchOptions::CONTINUOUS.maximum_age.as_millis() as u64,
        )?;

        // --- Map Settings ---
        let map_tile_url = lookup("MAP_TILE_URL").unwrap_or(map_defaults.tile_url);
        let map_fallback_tile_url =
            lookup("MAP_FALLBACK_TILE_URL").unwrap_or(map_defaults.fallback_tile_url);
        let map_center = GeoPoint {
            latitude: parse_or(&lookup, "MAP_CENTER_LAT", Ok::<_, ConfigError>(map_defaults.center.latitude))?,
            longitude: parse_or(&lookup, "MAP_CENTER_LNG", Ok::<_, ConfigError>(map_defaults.center.longitude))?,
        };
        let map_zoom = parse_or(&lookup, "MAP_ZOOM", Ok::<_, ConfigError>(map_defaults.zoom))?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            allowed_origin,
            consent_prompt_delay,
            geo_timeout,
            geo_maximum_age,
            map_tile_url,
            map_fallback_tile_url,
            map_center,
            map_zoom,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            prompt_delay: self.consent_prompt_delay,
            watch: WatchOptions {
                enable_high_accuracy: true,
                timeout: self.geo_timeout,
                maximum_age: self.geo_maximum_age,
            },
        }
    }

    pub fn map_config(&self) -> MapConfig {
        MapConfig {
            center: self.map_center,
            zoom: self.map_zoom,
            tile_url: self.map_tile_url.clone(),
            fallback_tile_url: self.map_fallback_tile_url.clone(),
            ..MapConfig::default()
        }
    }
}

/// Parses `name` if set, otherwise returns the (already parsed) default.
fn parse_or<F, T, E>(lookup: &F, name: &str, default: Result<T, E>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
    E: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}

fn millis<F>(lookup: &F, name: &str, default_ms: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, Ok::<_, ConfigError>(default_ms)).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_tracking_constants() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert!(config.database_url.is_none());
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.consent_prompt_delay, Duration::from_secs(2));
        assert_eq!(config.session_config().watch, WatchOptions::CONTINUOUS);
        assert_eq!(config.map_config().init_retry_delay, Duration::from_millis(200));
        assert_eq!(config.map_zoom, 13);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("DATABASE_URL", "postgres://localhost/hrms"),
            ("CONSENT_PROMPT_DELAY_MS", "500"),
            ("GEO_TIMEOUT_MS", "15000"),
            ("MAP_CENTER_LAT", "12.97"),
            ("MAP_ZOOM", "15"),
        ])
        .unwrap();
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/hrms"));
        assert_eq!(config.consent_prompt_delay, Duration::from_millis(500));
        assert_eq!(config.geo_timeout, Duration::from_secs(15));
        assert_eq!(config.map_center.latitude, 12.97);
        assert_eq!(config.map_zoom, 15);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config_from(&[("MAP_ZOOM", "far")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "MAP_ZOOM"));

        let err = config_from(&[("RUST_LOG", "loud")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "RUST_LOG"));
    }
}
