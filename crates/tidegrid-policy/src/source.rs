//! Policy sources: where handlers get policy snapshots from.
//!
//! A source streams full policy snapshots for one policy id into the
//! handler's policy channel and reports fatal conditions on the error
//! channel. It runs until the shutdown signal flips to `true`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tide_core::{Policy, PolicyFile, PolicyId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::error::SourceError;
use crate::signal::signalled;

/// Streams snapshots of a single policy.
#[async_trait]
pub trait Source: Send + Sync {
    /// Monitor `policy_id`, sending every new snapshot on `policy_tx` and
    /// fatal conditions on `err_tx`, until `shutdown` becomes `true`.
    async fn monitor_policy(
        &self,
        policy_id: PolicyId,
        shutdown: watch::Receiver<bool>,
        policy_tx: mpsc::Sender<Policy>,
        err_tx: mpsc::Sender<SourceError>,
    );
}

// ── File source ───────────────────────────────────────────────────

/// Reads policies from a TOML policy file, polling it for changes.
pub struct FileSource {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_policy(&self, policy_id: &str) -> Result<Policy, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::Failed(format!(
                "failed to read policy file {}: {e}",
                self.path.display()
            ))
        })?;

        let file = PolicyFile::from_toml_str(&content).map_err(|e| {
            SourceError::from_causes(vec![
                format!(
                    "failed to load policy {policy_id} from {}",
                    self.path.display()
                ),
                e.to_string(),
            ])
        })?;

        file.get(policy_id).cloned().ok_or_else(|| {
            SourceError::Failed(format!(
                "policy {policy_id} not found in {}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl Source for FileSource {
    async fn monitor_policy(
        &self,
        policy_id: PolicyId,
        mut shutdown: watch::Receiver<bool>,
        policy_tx: mpsc::Sender<Policy>,
        err_tx: mpsc::Sender<SourceError>,
    ) {
        debug!(%policy_id, path = %self.path.display(), "file policy monitor starting");

        let mut last_sent: Option<Policy> = None;
        let mut poll = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    match self.read_policy(&policy_id).await {
                        Ok(policy) => {
                            if last_sent.as_ref() == Some(&policy) {
                                continue;
                            }
                            trace!(%policy_id, "policy file changed");
                            if policy_tx.send(policy.clone()).await.is_err() {
                                break;
                            }
                            last_sent = Some(policy);
                        }
                        Err(e) => {
                            let _ = err_tx.send(e).await;
                            break;
                        }
                    }
                }
                _ = signalled(&mut shutdown) => break,
            }
        }

        debug!(%policy_id, "file policy monitor stopped");
    }
}

// ── Memory source ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Policy),
    Failed(SourceError),
}

/// In-process policy store for embedding the handler in another service.
///
/// Policies are pushed with [`MemorySource::set_policy`]; monitors see the
/// latest snapshot. Rapid successive updates may be coalesced into the
/// newest one.
#[derive(Default)]
pub struct MemorySource {
    slots: Mutex<HashMap<PolicyId, watch::Sender<Slot>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot for `policy.id`.
    pub fn set_policy(&self, policy: Policy) {
        let id = policy.id.clone();
        self.publish(&id, Slot::Ready(policy));
    }

    /// Report a fatal error to the monitors of `policy_id`.
    pub fn fail_policy(&self, policy_id: &str, err: SourceError) {
        self.publish(policy_id, Slot::Failed(err));
    }

    fn publish(&self, policy_id: &str, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(policy_id.to_string())
            .or_insert_with(|| watch::channel(Slot::Pending).0)
            .send_replace(slot);
    }

    fn subscribe(&self, policy_id: &str) -> watch::Receiver<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(policy_id.to_string())
            .or_insert_with(|| watch::channel(Slot::Pending).0)
            .subscribe()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn monitor_policy(
        &self,
        policy_id: PolicyId,
        mut shutdown: watch::Receiver<bool>,
        policy_tx: mpsc::Sender<Policy>,
        err_tx: mpsc::Sender<SourceError>,
    ) {
        let mut updates = self.subscribe(&policy_id);

        loop {
            let slot = updates.borrow_and_update().clone();
            match slot {
                Slot::Pending => {}
                Slot::Ready(policy) => {
                    if policy_tx.send(policy).await.is_err() {
                        return;
                    }
                }
                Slot::Failed(err) => {
                    let _ = err_tx.send(err).await;
                    return;
                }
            }

            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = signalled(&mut shutdown) => return,
            }
        }
    }
}
