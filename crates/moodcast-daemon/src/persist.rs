//! Writes the room's durability snapshots off the actor task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use moodcast_core::PresenceSnapshot;

use crate::store::Store;

/// Drain `rx` into the store until cancelled or the room goes away.
/// Failures are logged and the snapshot is skipped; the next one retries.
pub async fn run_snapshot_writer(
    store: Arc<Store>,
    mut rx: mpsc::Receiver<PresenceSnapshot>,
    cancel: CancellationToken,
) {
    info!("persist: snapshot writer started");
    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                match snapshot {
                    Some(snapshot) => write(&store, snapshot).await,
                    None => break,
                }
            }
            _ = cancel.cancelled() => {
                // Keep whatever the room handed over before shutdown.
                while let Ok(snapshot) = rx.try_recv() {
                    write(&store, snapshot).await;
                }
                break;
            }
        }
    }
    info!("persist: snapshot writer stopped");
}

async fn write(store: &Arc<Store>, snapshot: PresenceSnapshot) {
    let store = store.clone();
    let count = snapshot.count;
    match tokio::task::spawn_blocking(move || store.save_room_snapshot(&snapshot)).await {
        Ok(Ok(())) => debug!(count, "persist: room snapshot saved"),
        Ok(Err(e)) => warn!(error = %e, "persist: failed to save room snapshot"),
        Err(e) => warn!(error = %e, "persist: snapshot worker panicked"),
    }
}
