//! Core error types for flashdeck-core.
//!
//! The engine loop itself never returns these: collaborator failures are
//! caught where they happen, logged, and treated as no-ops. They surface only
//! from configuration I/O, media probing and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for flashdeck-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Media open/decode/extraction errors
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// A collaborator (ducking, surfaces, hotkeys, audio output) failed
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not name a settings field
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// No usable configuration directory
    #[error("Configuration directory unavailable: {0}")]
    NoDataDir(String),
}

/// Media errors. "Nothing available" is never one of these: an empty
/// listing is an ordinary result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The decoder could not open the file
    #[error("Failed to open {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// Reading or seeking a frame failed mid-stream
    #[error("Frame decode failed: {0}")]
    DecodeFailed(String),

    /// Audio track extraction (external codec process) failed
    #[error("Audio extraction failed for {path}: {message}")]
    ExtractionFailed { path: PathBuf, message: String },
}

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} failed: {message}")]
pub struct ServiceError {
    pub service: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_display_names_the_service() {
        let err = ServiceError::new("ducker", "endpoint missing");
        assert_eq!(err.to_string(), "ducker failed: endpoint missing");
    }

    #[test]
    fn test_config_error_converts_into_core_error() {
        let err: CoreError = ConfigError::UnknownKey("flash.nope".into()).into();
        assert!(matches!(err, CoreError::Config(ConfigError::UnknownKey(_))));
        assert_eq!(
            err.to_string(),
            "Configuration error: Unknown configuration key: flash.nope"
        );
    }
}
