//! Error types for cachepulse-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cachepulse-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Probe supervision errors
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task join failure
    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two datasources whose names collide under case-folding cannot be
    /// normalized deterministically; reject the configuration outright.
    #[error("datasource name {name:?} collides with another entry under case-insensitive comparison")]
    DuplicateDatasource { name: String },

    #[error("more than one datasource is marked as default")]
    MultipleDefaults,

    #[error("datasource {name:?} has an empty log directory")]
    EmptyLogDir { name: String },
}

/// Probe process supervision errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe executable not found at {0}")]
    ExecutableMissing(PathBuf),

    #[error("failed to spawn probe process: {0}")]
    Spawn(std::io::Error),

    #[error("probe stdio handle missing (stdout/stderr not piped)")]
    StdioMissing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().starts_with("storage error"));
    }

    #[test]
    fn config_error_mentions_colliding_name() {
        let err = ConfigError::DuplicateDatasource {
            name: "Steam".to_string(),
        };
        assert!(err.to_string().contains("Steam"));
    }

    #[test]
    fn probe_error_mentions_path() {
        let err = ProbeError::ExecutableMissing(PathBuf::from("/opt/probe"));
        assert!(err.to_string().contains("/opt/probe"));
    }
}
