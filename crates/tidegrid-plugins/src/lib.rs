//! tidegrid-plugins — pluggable target backends.
//!
//! Policies name the target they scale; handlers resolve that name through
//! a [`PluginResolver`] and query the resulting plugin's [`Target`]
//! capability for readiness and metadata.
//!
//! # Architecture
//!
//! ```text
//! PluginManager (PluginResolver)
//!   └── (PluginType, name) → Arc<dyn Plugin>
//!         └── as_target() → Arc<dyn Target>
//!               └── status(config) → Option<TargetStatus>
//! ```

pub mod manager;
pub mod plugin;
pub mod static_target;
pub mod target;

pub use manager::{PluginError, PluginManager, PluginResolver};
pub use plugin::{Plugin, PluginInfo, PluginType};
pub use static_target::{STATIC_TARGET_NAME, StaticTarget};
pub use target::Target;
