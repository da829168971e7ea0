//! Background workers: a generic periodic runner, the scheduled sync and
//! conflict purge tasks it drives, and the on-demand sync runner.

mod on_demand;
mod purge_task;
mod sync_task;

pub use on_demand::spawn_on_demand_sync;
pub use purge_task::ConflictPurgeTask;
pub use sync_task::{ScheduledSyncTask, SyncBackoff};

use crate::error::SyncError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A unit of work run on every tick of a [`PeriodicWorker`]
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), SyncError>;
}

/// Runs a task immediately, then once per interval until stopped.
///
/// Stopping is cooperative: a pass in progress finishes, no new pass starts.
pub struct PeriodicWorker {
    task: Arc<dyn PeriodicTask>,
    interval: Duration,
}

impl PeriodicWorker {
    pub fn new(task: Arc<dyn PeriodicTask>, interval: Duration) -> Self {
        Self {
            task,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn start(self) -> WorkerHandle {
        let name = self.task.name().to_string();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = self.task;
        let interval = self.interval;

        info!(worker = %name, interval_secs = interval.as_secs(), "Worker started");

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        debug!(worker = task.name(), "Worker pass started");
                        if let Err(err) = task.run().await {
                            warn!(worker = task.name(), error = %err, "Worker pass failed");
                        }
                    }
                }
            }
            info!(worker = task.name(), "Worker stopped");
        });

        WorkerHandle {
            name,
            stop: stop_tx,
            join,
        }
    }
}

/// Handle to a spawned worker
pub struct WorkerHandle {
    name: String,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn from_parts(name: &str, stop: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            stop,
            join,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the worker to stop; returns immediately
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to exit
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            warn!(worker = %self.name, error = %err, "Worker task panicked");
        }
    }

    /// Stop the worker and wait for its current pass to finish
    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}
