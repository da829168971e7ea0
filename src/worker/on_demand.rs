use super::WorkerHandle;
use crate::error::SyncError;
use crate::reconciliation::Reconciler;
use crate::state_machine::TriggerReceiver;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Run a pass for every list id received on `triggers`, without waiting for
/// the scheduler. Each pass runs in its own task.
pub fn spawn_on_demand_sync(reconciler: Arc<Reconciler>, mut triggers: TriggerReceiver) -> WorkerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                received = triggers.recv() => {
                    let Some(list_id) = received else {
                        break;
                    };
                    let reconciler = reconciler.clone();
                    tokio::spawn(async move {
                        match reconciler.run_sync(&list_id).await {
                            Ok(result) => {
                                info!(list_id = %list_id, outcome = ?result.outcome, "On-demand sync finished")
                            }
                            Err(SyncError::AlreadyInProgress(_)) => {
                                debug!(list_id = %list_id, "On-demand sync skipped, pass already running")
                            }
                            Err(err) => warn!(list_id = %list_id, error = %err, "On-demand sync failed"),
                        }
                    });
                }
            }
        }
        debug!("On-demand sync runner stopped");
    });

    WorkerHandle::from_parts("on-demand-sync", stop_tx, join)
}
