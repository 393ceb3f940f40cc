//! Background persistence for stores that snapshot on a timer.

use pulsemon_storage::Storage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

/// Resolves once `true` is published on the shutdown channel or the sender
/// is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Periodically persists `storage` until shutdown. The first snapshot is
/// taken one full `every` after start.
pub fn spawn_flusher(
    storage: Arc<dyn Storage>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + every, every);
        let stopped = wait_for_shutdown(shutdown);
        tokio::pin!(stopped);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = storage.snapshot().await {
                        tracing::error!(error = %e, "Periodic snapshot failed");
                    }
                }
                _ = &mut stopped => break,
            }
        }
        tracing::debug!("Flusher stopped");
    })
}
