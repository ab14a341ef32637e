//! Daemon mode. Wires the plugin registry, file policy source and policy
//! manager together and runs until Ctrl-C.
//!
//! Background tasks:
//! 1. Evaluation consumer: logs every evaluation sent by the handlers
//! 2. Reconcile loop: re-reads the policy file and syncs the handler set

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tide_core::{Evaluation, PolicyFile};
use tidegrid_plugins::{PluginManager, PluginType, StaticTarget};
use tidegrid_policy::{FileSource, MAX_TICK_PERIOD, PolicyManager, ReconcileReport, signalled};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

pub struct DaemonConfig {
    pub policies: PathBuf,
    pub poll_interval: Duration,
    pub reconcile_interval: Duration,
    pub eval_buffer: usize,
}

/// Run the daemon until Ctrl-C.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!(policies = %config.policies.display(), "tidegrid daemon starting");

    // Fail fast on a broken file; later reload errors only warn.
    let file = PolicyFile::from_file(&config.policies)?;
    info!(count = file.policies.len(), "policy file loaded");

    // ── Plugins ───────────────────────────────────────────────────
    let plugins = Arc::new(PluginManager::new());
    plugins.register(Arc::new(StaticTarget::new()));
    info!(targets = ?plugins.names(PluginType::Target), "plugins registered");

    // ── Policy source ─────────────────────────────────────────────
    let source = Arc::new(FileSource::new(&config.policies, config.poll_interval));

    // ── Shutdown signal ───────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Evaluation consumer ───────────────────────────────────────
    let (eval_tx, eval_rx) = mpsc::channel(config.eval_buffer.max(1));
    let consumer_handle = tokio::spawn(consume_evaluations(eval_rx));

    // ── Policy manager ────────────────────────────────────────────
    let manager = Arc::new(PolicyManager::new(
        plugins,
        source,
        eval_tx,
        shutdown_rx.clone(),
    ));
    manager.reconcile(&file.ids()).await;

    let reconcile_handle = tokio::spawn(reconcile_loop(
        Arc::clone(&manager),
        config.policies.clone(),
        config.reconcile_interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    join_task(reconcile_handle, "reconcile_loop").await;
    manager.stop_all().await;

    // The consumer ends once the last evaluation sender is gone.
    drop(manager);
    join_task(consumer_handle, "evaluation_consumer").await;

    info!("tidegrid daemon stopped");
    Ok(())
}

/// Wait for a background task. A panic or cancellation is logged.
///
/// Returns whether the task finished normally.
async fn join_task(handle: JoinHandle<()>, task: &str) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, "background task failed");
            false
        }
    }
}

/// Log every evaluation until all senders are dropped.
async fn consume_evaluations(mut eval_rx: mpsc::Receiver<Evaluation>) {
    while let Some(eval) = eval_rx.recv().await {
        info!(
            policy_id = %eval.policy.id,
            target = %eval.policy.target.name,
            ready = eval.target_status.ready,
            meta = ?eval.target_status.meta,
            "evaluation received"
        );
    }
}

/// Periodically sync the running handlers with the policy file.
async fn reconcile_loop(
    manager: Arc<PolicyManager>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = interval.clamp(Duration::from_secs(1), MAX_TICK_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reconcile_once(&manager, &path).await {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "policy file reload failed, keeping current handlers"
                    );
                }
            }
            _ = signalled(&mut shutdown) => break,
        }
    }
}

/// Re-read the policy file and reconcile the manager against its ids.
async fn reconcile_once(
    manager: &PolicyManager,
    path: &Path,
) -> anyhow::Result<ReconcileReport> {
    let file = PolicyFile::from_file(path)?;
    Ok(manager.reconcile(&file.ids()).await)
}
