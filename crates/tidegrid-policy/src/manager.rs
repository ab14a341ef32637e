//! Policy manager. Owns one handler task per policy.
//!
//! The manager starts a [`Handler`] for every policy id it is told about,
//! stops handlers whose policy went away, and replaces handlers that have
//! terminated (fatally or because their target disappeared) with fresh ones
//! on the next [`PolicyManager::reconcile`] pass. Handlers never retry on
//! their own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tide_core::{Evaluation, PolicyId};
use tidegrid_plugins::PluginResolver;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Span, debug, error, info, info_span};

use crate::error::HandlerError;
use crate::handler::{Handler, HandlerState};
use crate::source::Source;

/// A running handler and its task.
struct HandlerSlot {
    handler: Arc<Handler>,
    task: JoinHandle<()>,
}

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<PolicyId>,
    pub stopped: Vec<PolicyId>,
    pub restarted: Vec<PolicyId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

/// Manages the policy handlers of a process.
pub struct PolicyManager {
    plugins: Arc<dyn PluginResolver>,
    source: Arc<dyn Source>,
    eval_tx: mpsc::Sender<Evaluation>,
    shutdown: watch::Receiver<bool>,
    /// Active handlers: policy_id → slot.
    handlers: RwLock<HashMap<PolicyId, HandlerSlot>>,
    span: Span,
}

impl PolicyManager {
    /// Create a manager. Every handler sends evaluations on `eval_tx` and
    /// exits when `shutdown` becomes `true`.
    pub fn new(
        plugins: Arc<dyn PluginResolver>,
        source: Arc<dyn Source>,
        eval_tx: mpsc::Sender<Evaluation>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            plugins,
            source,
            eval_tx,
            shutdown,
            handlers: RwLock::new(HashMap::new()),
            span: info_span!("policy_manager"),
        }
    }

    /// Start a handler for `policy_id`, stopping any existing one.
    pub async fn start_handler(&self, policy_id: &str) {
        let slot = self.spawn_handler(policy_id);

        let mut handlers = self.handlers.write().await;
        if let Some(old) = handlers.insert(policy_id.to_string(), slot) {
            old.handler.stop();
        }
        info!(%policy_id, "policy handler started");
    }

    /// Stop the handler for `policy_id`. Returns whether one was registered.
    pub async fn stop_handler(&self, policy_id: &str) -> bool {
        let slot = self.handlers.write().await.remove(policy_id);
        match slot {
            Some(slot) => {
                slot.handler.stop();
                info!(%policy_id, "policy handler stopping");
                true
            }
            None => false,
        }
    }

    /// Stop every handler and wait for their tasks to finish.
    pub async fn stop_all(&self) {
        let slots: Vec<(PolicyId, HandlerSlot)> = self.handlers.write().await.drain().collect();

        for (_, slot) in &slots {
            slot.handler.stop();
        }
        for (policy_id, slot) in slots {
            if let Err(e) = slot.task.await {
                error!(%policy_id, error = %e, "policy handler task failed");
            }
        }
        info!("all policy handlers stopped");
    }

    /// Sorted ids of the registered handlers.
    pub async fn active_handlers(&self) -> Vec<PolicyId> {
        let handlers = self.handlers.read().await;
        let mut ids: Vec<PolicyId> = handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether the handler for `policy_id` is registered and has neither
    /// stopped nor exited.
    pub async fn is_running(&self, policy_id: &str) -> bool {
        let handlers = self.handlers.read().await;
        handlers.get(policy_id).is_some_and(|slot| {
            !slot.task.is_finished() && slot.handler.state() != HandlerState::Stopped
        })
    }

    /// Ask the handler for `policy_id` to enter cooldown for `period`.
    pub async fn request_cooldown(
        &self,
        policy_id: &str,
        period: Duration,
    ) -> Result<(), HandlerError> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(policy_id)
                .map(|slot| Arc::clone(&slot.handler))
                .ok_or(HandlerError::NotRunning)?
        };
        handler.request_cooldown(period).await
    }

    /// Bring the set of handlers in line with `policy_ids`.
    ///
    /// New ids get a handler, ids no longer listed are stopped, and handlers
    /// whose task has ended are replaced by a new handler.
    pub async fn reconcile(&self, policy_ids: &[PolicyId]) -> ReconcileReport {
        let wanted: HashSet<&str> = policy_ids.iter().map(String::as_str).collect();
        let mut report = ReconcileReport::default();
        let mut handlers = self.handlers.write().await;

        let removed: Vec<PolicyId> = handlers
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for policy_id in removed {
            if let Some(slot) = handlers.remove(&policy_id) {
                slot.handler.stop();
                report.stopped.push(policy_id);
            }
        }
        report.stopped.sort();

        for policy_id in policy_ids {
            match handlers.get(policy_id) {
                Some(slot) if !slot.task.is_finished() => continue,
                Some(_) => report.restarted.push(policy_id.clone()),
                None => report.started.push(policy_id.clone()),
            }
            handlers.insert(policy_id.clone(), self.spawn_handler(policy_id));
        }

        if report.is_empty() {
            debug!(handlers = handlers.len(), "policy handlers up to date");
        } else {
            info!(
                started = ?report.started,
                stopped = ?report.stopped,
                restarted = ?report.restarted,
                "policy handlers reconciled"
            );
        }
        report
    }

    fn spawn_handler(&self, policy_id: &str) -> HandlerSlot {
        let handler = Arc::new(Handler::new(
            policy_id.to_string(),
            &self.span,
            Arc::clone(&self.plugins),
            Arc::clone(&self.source),
        ));

        let runner = Arc::clone(&handler);
        let shutdown = self.shutdown.clone();
        let eval_tx = self.eval_tx.clone();
        let policy_id = policy_id.to_string();

        let task = tokio::spawn(async move {
            match runner.run(shutdown, eval_tx).await {
                Ok(()) => info!(%policy_id, "policy handler exited"),
                Err(e) => error!(%policy_id, error = %e, "policy handler terminated"),
            }
        });

        HandlerSlot { handler, task }
    }
}
