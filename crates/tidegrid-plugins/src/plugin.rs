//! Plugin identity and capability discovery.

use std::fmt;
use std::sync::Arc;

use crate::target::Target;

/// Family of capability a plugin is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    /// Reports status of the thing being scaled.
    Target,
    /// Computes scaling decisions from an evaluation.
    Strategy,
    /// Supplies application metrics.
    Apm,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Target => "target",
            PluginType::Strategy => "strategy",
            PluginType::Apm => "apm",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub kind: PluginType,
}

/// A dispensable plugin instance.
///
/// Capabilities are discovered at runtime: a plugin exposes the target
/// capability by overriding [`Plugin::as_target`].
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        None
    }
}
