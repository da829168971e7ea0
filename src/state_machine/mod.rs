//! Sync state machine.
//!
//! The only writer of `SyncConfig.state`. Every write is a compare-and-set
//! against the stored config revision, so lists never share a lock.

mod machine;
mod transitions;

pub use machine::{PassGuard, ReconciliationOutcome, SyncStateMachine};
pub use transitions::next_state;

use tokio::sync::mpsc;
use tracing::debug;

/// Receiving end of on-demand sync requests
pub type TriggerReceiver = mpsc::UnboundedReceiver<String>;

/// Fire-and-forget request for an immediate reconciliation of a list
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::UnboundedSender<String>,
}

impl SyncTrigger {
    pub fn fire(&self, list_id: &str) {
        if self.tx.send(list_id.to_string()).is_err() {
            debug!(list_id, "No on-demand runner listening, relying on schedule");
        }
    }
}

/// Create a trigger and the receiver an on-demand runner consumes
pub fn sync_trigger() -> (SyncTrigger, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SyncTrigger { tx }, rx)
}
