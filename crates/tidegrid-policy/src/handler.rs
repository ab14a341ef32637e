//! Policy handler. Drives the evaluation loop of a single policy.
//!
//! The handler owns one policy id for its whole life. It starts a monitor
//! task against the policy source, keeps the latest snapshot, and on every
//! tick decides whether an [`Evaluation`] should be sent. All state except
//! the lifecycle flag lives inside the event loop task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tide_core::{Evaluation, Policy, PolicyId};
use tidegrid_plugins::{PluginResolver, PluginType};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{Instrument, Span, debug, error, info_span, trace, warn};

use crate::cooldown::{epoch_nanos, is_in_cooldown, remaining_cooldown};
use crate::error::{HandlerError, SourceError};
use crate::signal::signalled;
use crate::source::Source;

/// Ticker period used until the first policy snapshot arrives. A tick
/// before any snapshot means the policy could not be read.
pub const POLICY_READ_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Longest ticker period. Longer intervals tick at this rate instead of
/// overflowing the clock.
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifecycle of a handler. A stopped handler is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Running,
    Stopped,
}

/// Monitors one policy and sends it for evaluation when appropriate.
pub struct Handler {
    policy_id: PolicyId,
    span: Span,
    /// Used to dispense the target plugin named by the policy.
    plugins: Arc<dyn PluginResolver>,
    /// Used to monitor the policy for changes.
    policy_source: Arc<dyn Source>,
    state: Mutex<HandlerState>,
    /// Flipped to `true` exactly once, when the handler stops.
    done_tx: watch::Sender<bool>,
    cooldown_tx: mpsc::Sender<Duration>,
    /// Taken by `run`.
    cooldown_rx: Mutex<Option<mpsc::Receiver<Duration>>>,
}

impl Handler {
    /// Create a handler for `policy_id`. Its log span is a child of `parent`.
    pub fn new(
        policy_id: PolicyId,
        parent: &Span,
        plugins: Arc<dyn PluginResolver>,
        policy_source: Arc<dyn Source>,
    ) -> Self {
        let span = info_span!(parent: parent, "policy_handler", policy_id = %policy_id);
        let (done_tx, _) = watch::channel(false);
        let (cooldown_tx, cooldown_rx) = mpsc::channel(1);

        Self {
            policy_id,
            span,
            plugins,
            policy_source,
            state: Mutex::new(HandlerState::Created),
            done_tx,
            cooldown_tx,
            cooldown_rx: Mutex::new(Some(cooldown_rx)),
        }
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    pub fn state(&self) -> HandlerState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == HandlerState::Running
    }

    /// Run the handler, periodically sending the policy for evaluation on
    /// `eval_tx`.
    ///
    /// Blocks until `shutdown` becomes `true` (or its sender is dropped),
    /// [`Handler::stop`] is called, the target disappears, or a fatal error
    /// occurs. Fatal errors are logged and returned; every other exit is
    /// `Ok(())`. A handler can only be run once.
    pub async fn run(
        &self,
        shutdown: watch::Receiver<bool>,
        eval_tx: mpsc::Sender<Evaluation>,
    ) -> Result<(), HandlerError> {
        self.event_loop(shutdown, eval_tx)
            .instrument(self.span.clone())
            .await
    }

    /// Stop the handler and its policy monitor. Safe to call from any task,
    /// any number of times.
    ///
    /// Stopping a handler that has not been run yet makes a later `run`
    /// return immediately.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        match *state {
            HandlerState::Running => {
                self.span.in_scope(|| trace!("stopping handler"));
                self.done_tx.send_replace(true);
                *state = HandlerState::Stopped;
            }
            HandlerState::Created => *state = HandlerState::Stopped,
            HandlerState::Stopped => {}
        }
    }

    /// Place the handler into cooldown for `period`, typically right after
    /// the owner dispatched a scaling action for this policy.
    ///
    /// Waits until the event loop has room for the request.
    pub async fn request_cooldown(&self, period: Duration) -> Result<(), HandlerError> {
        if self.state() == HandlerState::Stopped {
            return Err(HandlerError::NotRunning);
        }
        self.cooldown_tx
            .send(period)
            .await
            .map_err(|_| HandlerError::NotRunning)
    }

    async fn event_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        eval_tx: mpsc::Sender<Evaluation>,
    ) -> Result<(), HandlerError> {
        let Some(mut cooldown_rx) = self.start()? else {
            trace!("policy handler stopped before it started");
            return Ok(());
        };
        trace!("starting policy handler");

        let (policy_tx, mut policy_rx) = mpsc::channel::<Policy>(1);
        let (err_tx, mut err_rx) = mpsc::channel::<SourceError>(1);
        let mut done = self.done_tx.subscribe();

        // The monitor follows this handler's own stop signal rather than the
        // caller's, so `stop` tears it down while `shutdown` is still live.
        let source = Arc::clone(&self.policy_source);
        let policy_id = self.policy_id.clone();
        let monitor_shutdown = self.done_tx.subscribe();
        let monitor = tokio::spawn(
            async move {
                source
                    .monitor_policy(policy_id, monitor_shutdown, policy_tx, err_tx)
                    .await;
            }
            .instrument(self.span.clone()),
        );
        let _guard = ExitGuard {
            handler: self,
            monitor,
        };

        let mut current: Option<Policy> = None;
        let mut ticker = new_ticker(POLICY_READ_TIMEOUT);

        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => {
                    trace!("shutdown requested");
                    return Ok(());
                }
                _ = signalled(&mut done) => {
                    trace!("handler stopped");
                    return Ok(());
                }
                Some(err) = err_rx.recv() => {
                    log_source_error(&err);
                    return Err(err.into());
                }
                Some(policy) = policy_rx.recv() => {
                    apply_policy_update(current.as_ref(), &policy, &mut ticker);
                    current = Some(policy);
                }
                _ = ticker.tick() => {
                    // Timestamp the tick once so cooldown checks are consistent.
                    let now = epoch_nanos();

                    let eval = match self.generate_evaluation(current.as_ref()).await {
                        Ok(Some(eval)) => eval,
                        Ok(None) => continue,
                        Err(e) => {
                            error!(error = %e, "policy handler failed");
                            return Err(e);
                        }
                    };

                    // Targets scaled outside of the autoscaler report when it
                    // happened; respect the policy cooldown from that point.
                    if let Some(period) = cooldown_from_last_event(&eval, now) {
                        if !enforce_cooldown(period, &mut shutdown, &mut done).await {
                            return Ok(());
                        }
                        // The evaluation is stale after the wait; let a new tick occur.
                        continue;
                    }

                    tokio::select! {
                        sent = eval_tx.send(eval) => {
                            if sent.is_err() {
                                warn!("evaluation channel closed, stopping handler");
                                return Ok(());
                            }
                        }
                        _ = signalled(&mut shutdown) => return Ok(()),
                        _ = signalled(&mut done) => return Ok(()),
                    }
                }
                Some(period) = cooldown_rx.recv() => {
                    if !enforce_cooldown(period, &mut shutdown, &mut done).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Move from `Created` to `Running`, handing out the cooldown receiver.
    ///
    /// `None` when the handler was stopped before it ever ran.
    fn start(&self) -> Result<Option<mpsc::Receiver<Duration>>, HandlerError> {
        let mut state = self.lock_state();
        match *state {
            HandlerState::Created => {}
            HandlerState::Running => return Err(HandlerError::AlreadyStarted),
            HandlerState::Stopped => return Ok(None),
        }
        let cooldown_rx = self
            .cooldown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HandlerError::AlreadyStarted)?;
        *state = HandlerState::Running;
        Ok(Some(cooldown_rx))
    }

    /// Build an evaluation if the policy should be evaluated this tick.
    ///
    /// `Ok(None)` skips the tick. An error stops the handler.
    async fn generate_evaluation(
        &self,
        policy: Option<&Policy>,
    ) -> Result<Option<Evaluation>, HandlerError> {
        trace!("tick");

        // The bootstrap ticker fired before any snapshot arrived.
        let Some(policy) = policy else {
            return Err(HandlerError::PolicyReadTimeout);
        };

        if !policy.enabled {
            debug!("policy is not enabled");
            return Ok(None);
        }

        let name = &policy.target.name;
        let plugin = self
            .plugins
            .dispense(name, PluginType::Target)
            .map_err(|source| HandlerError::Dispense {
                name: name.clone(),
                source,
            })?;
        let target = plugin
            .as_target()
            .ok_or_else(|| HandlerError::NotATarget { name: name.clone() })?;

        trace!("getting target status");
        let status = match target.status(&policy.target.config).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "failed to get target status");
                return Ok(None);
            }
        };

        // The target is gone, so there is nothing left to monitor.
        let Some(status) = status else {
            trace!(config = ?policy.target.config, "target doesn't exist anymore");
            self.stop();
            return Ok(None);
        };

        if !status.ready {
            trace!("target is not ready");
            return Ok(None);
        }

        trace!("sending policy for evaluation");
        Ok(Some(Evaluation {
            policy: policy.clone(),
            target_status: status,
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stops the handler and its monitor however the event loop exits.
struct ExitGuard<'a> {
    handler: &'a Handler,
    monitor: JoinHandle<()>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.handler.stop();
        self.monitor.abort();
    }
}

/// Reset the ticker on the first snapshot or when the interval changes.
fn apply_policy_update(current: Option<&Policy>, next: &Policy, ticker: &mut Interval) {
    match current {
        None => trace!("received policy"),
        Some(current) => trace!(?current, ?next, "received policy change"),
    }

    if current.is_none_or(|c| c.evaluation_interval != next.evaluation_interval) {
        *ticker = new_ticker(next.evaluation_interval);
    }
}

/// A ticker whose first tick is one full `period` away.
fn new_ticker(period: Duration) -> Interval {
    // interval_at panics on a zero period.
    let period = period.clamp(Duration::from_millis(1), MAX_TICK_PERIOD);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Remaining cooldown if the target's last event is inside the policy's
/// cooldown window. A malformed timestamp is logged and ignored.
fn cooldown_from_last_event(eval: &Evaluation, now: u64) -> Option<Duration> {
    let raw = eval.target_status.last_event()?;
    let Some(last_event) = parse_last_event(raw) else {
        warn!(value = raw, "failed to parse last event timestamp as u64");
        return None;
    };

    let cooldown = eval.policy.cooldown;
    is_in_cooldown(cooldown, now, last_event)
        .then(|| remaining_cooldown(cooldown, now, last_event))
}

/// Parse a base-10 nanosecond timestamp. Signs and whitespace are rejected.
fn parse_last_event(raw: &str) -> Option<u64> {
    if raw.starts_with('+') {
        return None;
    }
    raw.parse().ok()
}

/// Block until `period` has elapsed or the handler is told to exit.
///
/// Returns `true` if the full period passed without interruption.
async fn enforce_cooldown(
    period: Duration,
    shutdown: &mut watch::Receiver<bool>,
    done: &mut watch::Receiver<bool>,
) -> bool {
    // Cooldown blocks the ticker, so this is the only sign of it operators get.
    debug!(cooldown = ?period, "scaling policy has been placed into cooldown");

    tokio::select! {
        _ = time::sleep(period) => true,
        _ = signalled(shutdown) => false,
        _ = signalled(done) => false,
    }
}

/// Log a policy source error, flattening aggregated causes into a primary
/// message plus an `errors` list.
fn log_source_error(err: &SourceError) {
    match split_causes(err) {
        Some((first, rest)) => error!(errors = ?rest, "{first}"),
        None => error!("{err}"),
    }
}

/// The primary cause and the remaining ones, when `err` aggregates more
/// than one cause.
fn split_causes(err: &SourceError) -> Option<(&str, Vec<&str>)> {
    match err.causes().as_slice() {
        [first, rest @ ..] if !rest.is_empty() => Some((*first, rest.to_vec())),
        _ => None,
    }
}
