pub mod admission;
mod area_locks;
pub mod models;
pub mod reconcile;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use admission::{AreaDefaults, QueueAdmissionController};
pub use reconcile::ReconciliationLoop;

/// Periodic safety net that drains every area's queue, in case a slot was
/// freed by a process that could not admit the next item itself.
pub fn spawn_admission_loop(
    admission: Arc<QueueAdmissionController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match admission.process_all().await {
                        Ok(0) => {}
                        Ok(started) => tracing::info!(started, "Admission pass started missions"),
                        Err(e) => tracing::error!(error = %e, "Admission pass failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Admission loop stopped");
    })
}
