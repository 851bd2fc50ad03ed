//! Background task driving the synchronization loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::sync::SyncService;

/// Spawn the sync loop on its own task.
///
/// Send `true` on the returned sender to request an orderly stop; the task
/// finishes its current merge and persist before exiting.
pub fn spawn_sync_worker(service: Arc<SyncService>) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!("Sync worker started");
        service.run(shutdown_rx).await;
        info!("Sync worker stopped");
    });

    (handle, shutdown_tx)
}
