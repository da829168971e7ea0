use super::PeriodicTask;
use crate::error::SyncError;
use crate::model::SyncState;
use crate::reconciliation::{Reconciler, ReconciliationResult};
use crate::resolver::{AutoResolveStrategy, ConflictResolver};
use crate::state_machine::ReconciliationOutcome;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    failures: u32,
    retry_at: Instant,
}

/// Exponential retry windows for lists whose source keeps failing
#[derive(Debug)]
pub struct SyncBackoff {
    base: Duration,
    max: Duration,
    entries: HashMap<String, BackoffEntry>,
}

impl SyncBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            entries: HashMap::new(),
        }
    }

    /// `base * 2^(failures - 1)`, capped at `max`
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn failures(&self, list_id: &str) -> u32 {
        self.entries.get(list_id).map_or(0, |entry| entry.failures)
    }

    pub fn is_waiting(&self, list_id: &str, now: Instant) -> bool {
        self.entries
            .get(list_id)
            .is_some_and(|entry| entry.retry_at > now)
    }

    /// Count a failure and return the delay before the next attempt
    pub fn record_failure(&mut self, list_id: &str, now: Instant) -> Duration {
        let failures = self.failures(list_id).saturating_add(1);
        let delay = self.delay_for(failures);
        self.entries.insert(
            list_id.to_string(),
            BackoffEntry {
                failures,
                retry_at: now + delay,
            },
        );
        delay
    }

    pub fn record_success(&mut self, list_id: &str) {
        self.entries.remove(list_id);
    }

    /// Drop entries of lists that are no longer sync-enabled
    pub fn retain_lists(&mut self, enabled: &[String]) {
        self.entries.retain(|list_id, _| enabled.contains(list_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runs a reconciliation pass for every sync-enabled list
pub struct ScheduledSyncTask {
    reconciler: Arc<Reconciler>,
    max_concurrent: usize,
    backoff: Mutex<SyncBackoff>,
    auto_resolve: Option<(Arc<ConflictResolver>, AutoResolveStrategy)>,
}

#[derive(Debug, Default)]
struct PassSummary {
    synced: usize,
    conflicted: usize,
    failed: usize,
    skipped: usize,
}

impl ScheduledSyncTask {
    pub fn new(reconciler: Arc<Reconciler>, max_concurrent: usize, backoff: SyncBackoff) -> Self {
        Self {
            reconciler,
            max_concurrent: max_concurrent.max(1),
            backoff: Mutex::new(backoff),
            auto_resolve: None,
        }
    }

    /// Auto-resolve conflicts raised by scheduled passes with `strategy`
    pub fn with_auto_resolve(
        mut self,
        resolver: Arc<ConflictResolver>,
        strategy: AutoResolveStrategy,
    ) -> Self {
        self.auto_resolve = Some((resolver, strategy));
        self
    }

    pub async fn failures(&self, list_id: &str) -> u32 {
        self.backoff.lock().await.failures(list_id)
    }

    /// Lists currently tracked by the backoff
    pub async fn backoff_entries(&self) -> usize {
        self.backoff.lock().await.len()
    }

    async fn due_lists(&self, summary: &mut PassSummary) -> Result<Vec<String>, SyncError> {
        let repository = self.reconciler.repository();
        let now = Instant::now();
        let mut backoff = self.backoff.lock().await;
        let enabled = repository.list_sync_enabled().await?;
        backoff.retain_lists(&enabled);
        let mut due = Vec::new();

        for list_id in enabled {
            let state = match repository.get_sync_config(&list_id).await {
                Ok(config) => config.state,
                Err(err) => {
                    warn!(list_id = %list_id, error = %err, "Could not read sync config");
                    summary.failed += 1;
                    continue;
                }
            };
            if state == SyncState::Conflict {
                debug!(list_id = %list_id, "Skipping list with unresolved conflicts");
                summary.skipped += 1;
                continue;
            }
            if backoff.is_waiting(&list_id, now) {
                debug!(
                    list_id = %list_id,
                    failures = backoff.failures(&list_id),
                    "Skipping list in backoff"
                );
                summary.skipped += 1;
                continue;
            }
            due.push(list_id);
        }
        Ok(due)
    }

    async fn handle_result(
        &self,
        list_id: &str,
        result: Result<ReconciliationResult, SyncError>,
        summary: &mut PassSummary,
    ) {
        match result {
            Ok(result) => {
                self.backoff.lock().await.record_success(list_id);
                match result.outcome {
                    ReconciliationOutcome::CleanSync => summary.synced += 1,
                    ReconciliationOutcome::ConflictsRaised => {
                        summary.conflicted += 1;
                        self.auto_resolve(list_id).await;
                    }
                }
            }
            Err(SyncError::AlreadyInProgress(_)) => {
                debug!(list_id, "Pass already running elsewhere");
                summary.skipped += 1;
            }
            Err(err) if err.is_transient() => {
                let delay = self
                    .backoff
                    .lock()
                    .await
                    .record_failure(list_id, Instant::now());
                warn!(
                    list_id,
                    error = %err,
                    retry_in_secs = delay.as_secs(),
                    "Sync failed, backing off"
                );
                summary.failed += 1;
            }
            Err(err) => {
                warn!(list_id, error = %err, class = ?err.class(), "Sync failed");
                summary.failed += 1;
            }
        }
    }

    async fn auto_resolve(&self, list_id: &str) {
        let Some((resolver, strategy)) = &self.auto_resolve else {
            return;
        };
        match resolver.auto_resolve(list_id, *strategy).await {
            Ok(resolved) => {
                debug!(list_id, resolved = resolved.len(), strategy = %strategy, "Auto-resolved conflicts")
            }
            Err(err) => warn!(list_id, error = %err, "Auto-resolve failed"),
        }
    }
}

#[async_trait]
impl PeriodicTask for ScheduledSyncTask {
    fn name(&self) -> &str {
        "scheduled-sync"
    }

    async fn run(&self) -> Result<(), SyncError> {
        let mut summary = PassSummary::default();
        let due = self.due_lists(&mut summary).await?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut passes = JoinSet::new();

        for list_id in due {
            let reconciler = self.reconciler.clone();
            let semaphore = semaphore.clone();
            passes.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = reconciler.run_sync(&list_id).await;
                (list_id, result)
            });
        }

        while let Some(joined) = passes.join_next().await {
            match joined {
                Ok((list_id, result)) => self.handle_result(&list_id, result, &mut summary).await,
                Err(err) => {
                    error!(error = %err, "Sync pass task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            synced = summary.synced,
            conflicted = summary.conflicted,
            failed = summary.failed,
            skipped = summary.skipped,
            "Scheduled sync finished"
        );
        Ok(())
    }
}
