//! Typed errors for the analytics library.
//!
//! The scoring components never return these; malformed inputs are skipped.
//! Errors are reserved for configuration and for converting external labels
//! into the engine's enums.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading an `EngineConfig`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised when an external label does not name a known variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("unknown program: {0}")]
    Program(String),

    #[error("unknown exclusion scope: {0}")]
    Scope(String),

    #[error("unknown risk status: {0}")]
    RiskStatus(String),
}
