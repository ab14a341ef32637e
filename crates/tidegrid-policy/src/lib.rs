//! tidegrid-policy — per-policy evaluation loop.
//!
//! Each scaling policy gets a [`Handler`] that follows the policy's
//! definition as it changes, ticks at the policy's evaluation interval,
//! queries the policy's target and emits an [`Evaluation`] for the scaling
//! strategy whenever the target is ready and not cooling down.
//!
//! # Architecture
//!
//! ```text
//! PolicyManager
//!   └── Handler (one task per policy)
//!         ├── monitor task: Source::monitor_policy → policy / error channels
//!         └── event loop (tokio::select!)
//!               ├── caller shutdown / Handler::stop
//!               ├── policy snapshot → reset ticker on interval change
//!               ├── policy source error → fatal
//!               ├── tick → dispense target → status → cooldown check → Evaluation
//!               └── cooldown request → blocking, preemptible wait
//! ```
//!
//! # Cooldown
//!
//! A target may report the last time it was scaled through the
//! `tidegrid.last_event` metadata key. When
//! `last_event + policy.cooldown >= now` the handler waits out the rest of
//! the window and drops the tick's evaluation, so targets scaled outside the
//! autoscaler are not immediately scaled again. Owners that dispatch a
//! scaling action themselves call [`Handler::request_cooldown`].
//!
//! [`Evaluation`]: tide_core::Evaluation

pub mod cooldown;
pub mod error;
pub mod handler;
pub mod manager;
pub mod signal;
pub mod source;

pub use cooldown::{epoch_nanos, is_in_cooldown, remaining_cooldown};
pub use error::{HandlerError, SourceError};
pub use handler::{Handler, HandlerState, MAX_TICK_PERIOD, POLICY_READ_TIMEOUT};
pub use manager::{PolicyManager, ReconcileReport};
pub use signal::signalled;
pub use source::{FileSource, MemorySource, Source};
