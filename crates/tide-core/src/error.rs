//! Error types for policy configuration.

use thiserror::Error;

/// Result type alias for configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a policy file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration {input:?}: {reason}")]
    Duration { input: String, reason: String },

    #[error("duplicate policy id: {0}")]
    DuplicateId(String),

    #[error("policy {id}: {reason}")]
    Invalid { id: String, reason: String },
}
