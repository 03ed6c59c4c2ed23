use crate::pipeline::Cycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Runs `flux` every `every` until `shutdown` flips to `true` or its sender
/// is dropped.
///
/// A tick awaits its cycle before the next one is considered, and ticks that
/// fall due during a slow cycle are skipped. Shutdown is only observed
/// between cycles, so an in-flight cycle always completes.
pub fn spawn(
    flux: Arc<dyn Cycle>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(flux = flux.name(), every_secs = every.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match flux.run_once().await {
                        Ok(0) => {}
                        Ok(persisted) => info!(flux = flux.name(), persisted, "Changes reconciled"),
                        Err(e) => error!(flux = flux.name(), error = %e, "Reconciliation cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(flux = flux.name(), "Scheduler stopped");
    })
}
