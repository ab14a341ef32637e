//! The target capability.

use std::collections::HashMap;

use async_trait::async_trait;
use tide_core::TargetStatus;

/// A scalable resource that can report its readiness.
#[async_trait]
pub trait Target: Send + Sync {
    /// Query the current status of the target described by `config`.
    ///
    /// `Ok(None)` means the target no longer exists.
    async fn status(
        &self,
        config: &HashMap<String, String>,
    ) -> anyhow::Result<Option<TargetStatus>>;
}
