//! Plugin registry.
//!
//! The `PluginManager` keeps one shared instance per `(type, name)` and
//! hands out clones of it. It is `Send + Sync` and is shared by every
//! policy handler in the process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::plugin::{Plugin, PluginType};

/// Errors returned when resolving plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no {kind} plugin named {name:?} is registered")]
    NotFound { name: String, kind: PluginType },
}

/// Resolves a plugin by name and type.
pub trait PluginResolver: Send + Sync {
    fn dispense(&self, name: &str, kind: PluginType) -> Result<Arc<dyn Plugin>, PluginError>;
}

type PluginKey = (PluginType, String);

/// In-process registry of plugin instances.
#[derive(Default)]
pub struct PluginManager {
    plugins: RwLock<HashMap<PluginKey, Arc<dyn Plugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under the name and type it reports.
    ///
    /// Returns the plugin previously registered under the same key.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Option<Arc<dyn Plugin>> {
        let info = plugin.info();
        debug!(plugin = %info.name, kind = %info.kind, "registering plugin");

        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((info.kind, info.name), plugin)
    }

    pub fn deregister(&self, name: &str, kind: PluginType) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, name.to_string()))
    }

    /// Sorted names of the plugins registered for `kind`.
    pub fn names(&self, kind: PluginType) -> Vec<String> {
        let plugins = self.plugins.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = plugins
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl PluginResolver for PluginManager {
    fn dispense(&self, name: &str, kind: PluginType) -> Result<Arc<dyn Plugin>, PluginError> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
                kind,
            })
    }
}
