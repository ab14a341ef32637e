//! tide-core — shared types for the tidegrid autoscaler.
//!
//! Holds the policy and evaluation model passed between the policy
//! source, the per-policy handler and the evaluation consumer, plus the
//! TOML policy file format and the duration strings it uses.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::PolicyFile;
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
