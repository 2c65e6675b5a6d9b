//! Timeout helpers built on the cooperative cancellation flag.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` once `duration` elapses, unless it is cancelled first.
pub fn cancel_after(token: CancellationToken, duration: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                tracing::debug!(timeout_ms = duration.as_millis() as u64, "run timed out");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
