//! Domain types shared by the policy source, handler and consumers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a scaling policy.
pub type PolicyId = String;

/// Target status metadata key holding the last time the target was scaled,
/// as a base-10 nanosecond Unix timestamp.
pub const META_KEY_LAST_EVENT: &str = "tidegrid.last_event";

// ── Policy ────────────────────────────────────────────────────────

/// A scaling policy snapshot.
///
/// Policies are always delivered whole; a newer snapshot replaces the
/// previous one entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    /// Disabled policies are still monitored but never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How often the policy is considered for evaluation (e.g., "10s").
    #[serde(with = "crate::duration::serde_str")]
    pub evaluation_interval: Duration,
    /// Quiet period after a scaling action (e.g., "5m").
    #[serde(with = "crate::duration::serde_str", default)]
    pub cooldown: Duration,
    pub target: PolicyTarget,
}

/// Reference to the target plugin a policy scales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTarget {
    /// Name of the target plugin to dispense.
    pub name: String,
    /// Plugin-specific configuration passed to every status query.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

// ── Target status ─────────────────────────────────────────────────

/// Readiness and metadata reported by a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub ready: bool,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl TargetStatus {
    pub fn ready() -> Self {
        Self {
            ready: true,
            meta: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Raw value of the last-event metadata key, if present.
    pub fn last_event(&self) -> Option<&str> {
        self.meta.get(META_KEY_LAST_EVENT).map(String::as_str)
    }
}

// ── Evaluation ────────────────────────────────────────────────────

/// A request for the scaling strategy: the policy together with the target
/// status observed when the evaluation was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub policy: Policy,
    pub target_status: TargetStatus,
}
