//! Built-in `static` target.
//!
//! Reports a status taken entirely from the policy's target config. Useful
//! for dry runs and for exercising policies without a real backend.
//!
//! | key          | effect                                              |
//! |--------------|-----------------------------------------------------|
//! | `exists`     | `"false"` reports the target as gone                |
//! | `ready`      | `"false"` reports the target as not ready           |
//! | `count`      | copied to `meta["count"]`                           |
//! | `last_event` | copied to the last-event metadata key               |

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tide_core::{META_KEY_LAST_EVENT, TargetStatus};

use crate::plugin::{Plugin, PluginInfo, PluginType};
use crate::target::Target;

pub const STATIC_TARGET_NAME: &str = "static";

#[derive(Debug, Default, Clone)]
pub struct StaticTarget;

impl StaticTarget {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for StaticTarget {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: STATIC_TARGET_NAME.to_string(),
            kind: PluginType::Target,
        }
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn Target>> {
        Some(self)
    }
}

#[async_trait]
impl Target for StaticTarget {
    async fn status(
        &self,
        config: &HashMap<String, String>,
    ) -> anyhow::Result<Option<TargetStatus>> {
        if !parse_flag(config, "exists")? {
            return Ok(None);
        }

        let mut status = TargetStatus {
            ready: parse_flag(config, "ready")?,
            meta: HashMap::new(),
        };
        if let Some(count) = config.get("count") {
            status.meta.insert("count".to_string(), count.clone());
        }
        if let Some(ts) = config.get("last_event") {
            status.meta.insert(META_KEY_LAST_EVENT.to_string(), ts.clone());
        }

        Ok(Some(status))
    }
}

/// Read a boolean config flag that defaults to true.
fn parse_flag(config: &HashMap<String, String>, key: &str) -> anyhow::Result<bool> {
    match config.get(key).map(|v| v.trim()) {
        None => Ok(true),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => bail!("invalid value {other:?} for {key}: expected true or false"),
    }
}
