//! Error types for policy sources and handlers.

use thiserror::Error;
use tidegrid_plugins::PluginError;

/// A fatal condition reported by a policy source.
///
/// A source may aggregate several underlying causes into one error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("{0}")]
    Failed(String),

    #[error("{} errors occurred: {}", .0.len(), .0.join("; "))]
    Multiple(Vec<String>),
}

impl SourceError {
    /// Build an error from a list of causes, collapsing a single cause.
    pub fn from_causes(mut causes: Vec<String>) -> Self {
        if causes.len() == 1 {
            SourceError::Failed(causes.remove(0))
        } else {
            SourceError::Multiple(causes)
        }
    }

    pub fn causes(&self) -> Vec<&str> {
        match self {
            SourceError::Failed(msg) => vec![msg.as_str()],
            SourceError::Multiple(causes) => causes.iter().map(String::as_str).collect(),
        }
    }
}

/// Conditions that terminate a policy handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("policy source failed: {0}")]
    PolicySource(#[from] SourceError),

    #[error("timeout: failed to read policy in time")]
    PolicyReadTimeout,

    #[error("failed to dispense target plugin {name:?}: {source}")]
    Dispense {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("plugin {name:?} is not a target plugin")]
    NotATarget { name: String },

    #[error("policy handler has already been started")]
    AlreadyStarted,

    #[error("policy handler is not running")]
    NotRunning,
}
