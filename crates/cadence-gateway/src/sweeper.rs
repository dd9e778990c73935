use std::sync::Arc;
use std::time::Duration;

use cadence_controller::ScheduleController;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodic maintenance: release abandoned runs, prune history, and
/// reconcile every trigger mechanism against the schedule store. The first
/// pass runs immediately so drift from a previous process is healed on start.
pub async fn run(
    controller: Arc<ScheduleController>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(every.max(Duration::from_secs(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(every_secs = every.as_secs(), "sweeper started");

    loop {
        tokio::select! {
            _ = tick.tick() => sweep_once(&controller).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("sweeper stopped");
}

async fn sweep_once(controller: &ScheduleController) {
    match controller.sweep().await {
        Ok(report) => {
            for mechanism in &report.reconciliation {
                if let Some(err) = &mechanism.error {
                    warn!(mechanism = %mechanism.mechanism, error = %err, "reconcile failed; retrying next sweep");
                }
            }
            info!(
                stale_failed = report.stale_failed,
                pruned = report.pruned,
                mechanisms = report.reconciliation.len(),
                "sweep complete"
            );
        }
        Err(e) => warn!(error = %e, "sweep failed; retrying next sweep"),
    }
}
