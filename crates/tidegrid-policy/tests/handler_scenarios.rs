//! Handler scenario tests.
//!
//! Drive a real `Handler` against an in-memory policy source and the
//! built-in static target on paused tokio time, so ticks and cooldowns
//! advance instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tide_core::{Evaluation, Policy, PolicyFile, PolicyTarget};
use tidegrid_plugins::{Plugin, PluginInfo, PluginManager, PluginType, StaticTarget};
use tidegrid_policy::*;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::Span;

const SECOND_NS: u64 = 1_000_000_000;

fn test_policy(interval: Duration, config: &[(&str, &str)]) -> Policy {
    Policy {
        id: "web".to_string(),
        enabled: true,
        evaluation_interval: interval,
        cooldown: Duration::from_secs(60),
        target: PolicyTarget {
            name: "static".to_string(),
            config: config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        },
    }
}

/// A target plugin that does not expose the target capability.
struct OpaquePlugin;

impl Plugin for OpaquePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "opaque".to_string(),
            kind: PluginType::Target,
        }
    }
}

struct Harness {
    handler: Arc<Handler>,
    source: Arc<MemorySource>,
    shutdown_tx: watch::Sender<bool>,
    eval_rx: mpsc::Receiver<Evaluation>,
    task: JoinHandle<Result<(), HandlerError>>,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(MemorySource::new())
    }

    fn start_with(source: MemorySource) -> Self {
        let plugins = Arc::new(PluginManager::new());
        plugins.register(Arc::new(StaticTarget::new()));
        plugins.register(Arc::new(OpaquePlugin));

        let source = Arc::new(source);
        let handler = Arc::new(Handler::new(
            "web".to_string(),
            &Span::none(),
            plugins,
            source.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (eval_tx, eval_rx) = mpsc::channel(4);

        let runner = Arc::clone(&handler);
        let task = tokio::spawn(async move { runner.run(shutdown_rx, eval_tx).await });

        Self {
            handler,
            source,
            shutdown_tx,
            eval_rx,
            task,
        }
    }

    async fn next_eval(&mut self, within: Duration) -> Option<Evaluation> {
        timeout(within, self.eval_rx.recv()).await.ok().flatten()
    }

    async fn finish(self, within: Duration) -> Result<(), HandlerError> {
        timeout(within, self.task)
            .await
            .expect("handler did not exit in time")
            .expect("handler task panicked")
    }
}

#[tokio::test(start_paused = true)]
async fn ready_target_is_evaluated_every_interval() {
    let mut h = Harness::start();
    h.source
        .set_policy(test_policy(Duration::from_secs(5), &[("count", "3")]));

    let start = Instant::now();
    let eval = h.next_eval(Duration::from_secs(10)).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(eval.policy.id, "web");
    assert!(eval.target_status.ready);
    assert_eq!(eval.target_status.meta.get("count").map(String::as_str), Some("3"));

    h.next_eval(Duration::from_secs(10)).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(10));

    h.shutdown_tx.send(true).unwrap();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn recent_last_event_enforces_cooldown_without_sending() {
    let mut h = Harness::start();
    let last_event = epoch_nanos() - 30 * SECOND_NS;
    h.source.set_policy(test_policy(
        Duration::from_secs(1),
        &[("last_event", &last_event.to_string())],
    ));

    // Every tick lands inside the cooldown window, so nothing is sent.
    assert!(h.next_eval(Duration::from_secs(120)).await.is_none());
    assert!(h.handler.is_running());

    // Once the target reports an event outside the window the loop
    // evaluates again.
    let old_event = epoch_nanos() - 600 * SECOND_NS;
    h.source.set_policy(test_policy(
        Duration::from_secs(1),
        &[("last_event", &old_event.to_string())],
    ));
    let eval = h.next_eval(Duration::from_secs(600)).await.unwrap();
    assert_eq!(eval.target_status.last_event(), Some(old_event.to_string().as_str()));

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn cooldown_wait_lasts_remaining_window() {
    let mut h = Harness::start();
    // A window that ends 20s after the first tick; the wait must cover it
    // before the next evaluation attempt.
    let last_event = epoch_nanos() - 40 * SECOND_NS;
    h.source.set_policy(test_policy(
        Duration::from_secs(1),
        &[("last_event", &last_event.to_string())],
    ));

    sleep(Duration::from_millis(1500)).await;
    // Drop the event so the tick after the wait can evaluate.
    let start = Instant::now();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));

    h.next_eval(Duration::from_secs(600)).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(18));

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn malformed_last_event_still_evaluates() {
    let mut h = Harness::start();
    h.source.set_policy(test_policy(
        Duration::from_secs(1),
        &[("last_event", "not-a-number")],
    ));

    let eval = h.next_eval(Duration::from_secs(5)).await.unwrap();
    assert_eq!(eval.target_status.last_event(), Some("not-a-number"));

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn disabled_policy_is_never_evaluated() {
    let mut h = Harness::start();
    let mut policy = test_policy(Duration::from_secs(1), &[]);
    policy.enabled = false;
    h.source.set_policy(policy);

    assert!(h.next_eval(Duration::from_secs(60)).await.is_none());
    assert!(h.handler.is_running());

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn target_gone_stops_handler_cleanly() {
    let mut h = Harness::start();
    h.source
        .set_policy(test_policy(Duration::from_secs(1), &[("exists", "false")]));

    let handler = Arc::clone(&h.handler);
    assert!(h.next_eval(Duration::from_secs(5)).await.is_none());
    assert!(h.finish(Duration::from_secs(5)).await.is_ok());
    assert!(!handler.is_running());
    assert_eq!(handler.state(), HandlerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn interval_change_resets_ticker() {
    let mut h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(10), &[]));
    sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));

    let eval = h.next_eval(Duration::from_secs(20)).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(eval.policy.evaluation_interval, Duration::from_secs(1));

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn huge_interval_from_policy_file_keeps_handler_alive() {
    let file = PolicyFile::from_toml_str(
        r#"
[[policy]]
id = "web"
evaluation_interval = "3000000000000000h"
target = { name = "static" }
"#,
    )
    .unwrap();

    let mut h = Harness::start();
    h.source.set_policy(file.get("web").unwrap().clone());

    assert!(h.next_eval(Duration::from_secs(3600)).await.is_none());
    assert!(h.handler.is_running());

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn missing_policy_times_out() {
    let h = Harness::start();

    let result = h.finish(POLICY_READ_TIMEOUT + Duration::from_secs(1)).await;
    assert!(matches!(result, Err(HandlerError::PolicyReadTimeout)));
}

#[tokio::test(start_paused = true)]
async fn policy_source_error_is_fatal() {
    let source = MemorySource::new();
    source.fail_policy(
        "web",
        SourceError::Multiple(vec![
            "failed to load policy web".to_string(),
            "invalid duration".to_string(),
        ]),
    );
    let h = Harness::start_with(source);

    let handler = Arc::clone(&h.handler);
    let result = h.finish(Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(HandlerError::PolicySource(SourceError::Multiple(ref causes))) if causes.len() == 2
    ));
    assert!(!handler.is_running());
}

#[tokio::test(start_paused = true)]
async fn unknown_target_plugin_is_fatal() {
    let h = Harness::start();
    let mut policy = test_policy(Duration::from_secs(1), &[]);
    policy.target.name = "aws-asg".to_string();
    h.source.set_policy(policy);

    let result = h.finish(Duration::from_secs(5)).await;
    assert!(matches!(result, Err(HandlerError::Dispense { ref name, .. }) if name == "aws-asg"));
}

#[tokio::test(start_paused = true)]
async fn plugin_without_target_capability_is_fatal() {
    let h = Harness::start();
    let mut policy = test_policy(Duration::from_secs(1), &[]);
    policy.target.name = "opaque".to_string();
    h.source.set_policy(policy);

    let result = h.finish(Duration::from_secs(5)).await;
    assert!(matches!(result, Err(HandlerError::NotATarget { ref name }) if name == "opaque"));
}

#[tokio::test(start_paused = true)]
async fn status_failures_and_unready_targets_skip_ticks() {
    let mut h = Harness::start();
    h.source
        .set_policy(test_policy(Duration::from_secs(1), &[("ready", "maybe")]));
    assert!(h.next_eval(Duration::from_secs(5)).await.is_none());
    assert!(h.handler.is_running());

    h.source
        .set_policy(test_policy(Duration::from_secs(1), &[("ready", "false")]));
    assert!(h.next_eval(Duration::from_secs(5)).await.is_none());
    assert!(h.handler.is_running());

    h.source
        .set_policy(test_policy(Duration::from_secs(1), &[("ready", "true")]));
    assert!(h.next_eval(Duration::from_secs(5)).await.is_some());

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn requested_cooldown_blocks_ticks() {
    let mut h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));

    h.next_eval(Duration::from_secs(5)).await.unwrap();
    h.handler
        .request_cooldown(Duration::from_secs(30))
        .await
        .unwrap();

    // At most one more tick may slip in before the request is picked up;
    // somewhere in the next few evaluations there is a full cooldown gap.
    let mut prev = Instant::now();
    let mut widest = Duration::ZERO;
    for _ in 0..3 {
        h.next_eval(Duration::from_secs(60)).await.unwrap();
        widest = widest.max(prev.elapsed());
        prev = Instant::now();
    }
    assert!(widest >= Duration::from_secs(30));

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_cooldown() {
    let h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));
    h.handler
        .request_cooldown(Duration::from_secs(3600))
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;

    h.handler.stop();
    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn shutdown_signal_exits_and_marks_stopped() {
    let h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));
    sleep(Duration::from_millis(10)).await;
    assert!(h.handler.is_running());

    let handler = Arc::clone(&h.handler);
    h.shutdown_tx.send(true).unwrap();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());

    assert!(!handler.is_running());
    handler.stop();
    assert!(matches!(
        handler.request_cooldown(Duration::from_secs(1)).await,
        Err(HandlerError::NotRunning)
    ));
}

#[tokio::test(start_paused = true)]
async fn closed_evaluation_channel_stops_handler() {
    let h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));

    let Harness {
        handler,
        eval_rx,
        task,
        shutdown_tx: _shutdown_tx,
        ..
    } = h;
    drop(eval_rx);

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(!handler.is_running());
}

#[tokio::test(start_paused = true)]
async fn handler_runs_only_once() {
    let h = Harness::start();
    h.source.set_policy(test_policy(Duration::from_secs(1), &[]));
    sleep(Duration::from_millis(10)).await;

    let (_tx, rx) = watch::channel(false);
    let (eval_tx, _eval_rx) = mpsc::channel(1);
    let second = h.handler.run(rx, eval_tx).await;
    assert!(matches!(second, Err(HandlerError::AlreadyStarted)));
    assert!(h.handler.is_running());

    h.handler.stop();
    assert!(h.finish(Duration::from_secs(1)).await.is_ok());
}
