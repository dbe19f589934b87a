//! Periodic driver: runs a pipeline cycle on every tick until shut down.

use crate::pipeline::Pipeline;
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Sender half used to stop a running [`run`] loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn trigger(&self) {
        // No receivers left means the driver is already gone.
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Run cycles every `period` until `shutdown` flips to true. The flag is
/// checked between cycles, so an in-flight cycle always completes. Returns
/// the number of cycles run.
pub async fn run<S: Store + 'static>(pipeline: Arc<Pipeline<S>>, period: Duration, mut shutdown: watch::Receiver<bool>) -> u64 {
    info!(interval_secs = period.as_secs(), "pipeline driver started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = 0u64;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                let report = pipeline.run_cycle().await;
                cycles += 1;
                debug!(cycle = cycles, failed_stages = report.failed_stages.len(), "driver tick done");
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender dropped; nobody can ask us to stop any more.
                    break;
                }
            }
        }
    }

    info!(cycles, "pipeline driver stopped");
    cycles
}
