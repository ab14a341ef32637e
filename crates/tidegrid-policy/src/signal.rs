//! Shutdown signal helpers.

use tokio::sync::watch;

/// Resolves once the signal is `true` or its sender is gone.
///
/// The borrow returned by `wait_for` is dropped here, so the future stays
/// `Send` inside `select!` arms that await other work.
pub async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
