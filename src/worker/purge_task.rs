use super::PeriodicTask;
use crate::error::SyncError;
use crate::repository::SyncRepository;
use crate::utils::now;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

/// Deletes resolved and deactivated conflicts past their retention period
pub struct ConflictPurgeTask {
    repository: Arc<dyn SyncRepository>,
    retention: Duration,
}

impl ConflictPurgeTask {
    pub fn new(repository: Arc<dyn SyncRepository>, retention: Duration) -> Self {
        Self {
            repository,
            retention,
        }
    }

    /// Purge once; returns the number of deleted conflicts
    pub async fn purge(&self) -> Result<usize, SyncError> {
        let cutoff = now() - self.retention;
        let deleted = self
            .repository
            .delete_resolved_conflicts_older_than(cutoff)
            .await?;

        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Purged old conflicts");
        } else {
            debug!(cutoff = %cutoff, "No conflicts to purge");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl PeriodicTask for ConflictPurgeTask {
    fn name(&self) -> &str {
        "conflict-purge"
    }

    async fn run(&self) -> Result<(), SyncError> {
        self.purge().await.map(|_| ())
    }
}
