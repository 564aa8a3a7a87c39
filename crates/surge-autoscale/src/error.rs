//! Error types for the Surge autoscaler.

use thiserror::Error;

/// Result type alias for controller lifecycle operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Result type alias for policy file handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced when a controller's monitor loop terminates abnormally.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("monitor loop panicked in a policy callback: {0}")]
    MonitorPanicked(String),

    #[error("monitor task could not be joined: {0}")]
    Join(String),
}

/// Errors that can occur while loading a policy file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize policy: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid bounds: min {min} exceeds max {max}")]
    InvalidBounds { min: i64, max: i64 },
}
