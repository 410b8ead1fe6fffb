//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(zoom: &str) -> Result<crate::config::Config, ApiError> {
        let zoom = zoom.to_string();
        Ok(crate::config::Config::from_lookup(|name| (name == "MAP_ZOOM").then(|| zoom.clone()))?)
    }

    #[test]
    fn startup_failures_keep_their_source() {
        let err = load("far").unwrap_err();
        assert!(matches!(err, ApiError::Config(ConfigError::InvalidValue(ref name, _)) if name == "MAP_ZOOM"));
        assert!(err.to_string().starts_with("Configuration error:"));
        assert!(load("12").is_ok());
    }
}
