use super::plan::{build_change_set, ChangeKind, ChangeSet};
use crate::error::SyncError;
use crate::model::{Conflict, ConflictKind, Snapshot, SyncState};
use crate::repository::SyncRepository;
use crate::source::{ExternalSource, ExternalSourceError};
use crate::state_machine::{PassGuard, ReconciliationOutcome, SyncStateMachine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables of a reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Upper bound for each call to the external source
    pub fetch_timeout: Duration,
    /// Push local-only changes back to the source after a clean pass
    pub push_local_changes: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            push_local_changes: true,
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub list_id: String,
    pub outcome: ReconciliationOutcome,
    pub state: SyncState,
    /// Remote-side changes written into the local list
    pub applied_locally: usize,
    /// Whether the merged snapshot was pushed to the source
    pub pushed: bool,
    /// Open conflicts of the list after the pass
    pub conflicts: Vec<Uuid>,
    /// Digest of the fetched remote snapshot
    pub remote_digest: String,
}

/// Runs reconciliation passes between local lists and an external source
pub struct Reconciler {
    repository: Arc<dyn SyncRepository>,
    source: Arc<dyn ExternalSource>,
    state_machine: Arc<SyncStateMachine>,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn SyncRepository>,
        source: Arc<dyn ExternalSource>,
        state_machine: Arc<SyncStateMachine>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            repository,
            source,
            state_machine,
            options,
        }
    }

    pub fn state_machine(&self) -> &Arc<SyncStateMachine> {
        &self.state_machine
    }

    pub fn repository(&self) -> &Arc<dyn SyncRepository> {
        &self.repository
    }

    /// Run one pass for a list.
    ///
    /// At most one pass per list runs at a time; a concurrent call fails with
    /// `AlreadyInProgress`. A failed pass leaves the state unchanged and
    /// records the error on the sync config. A pass that loses its lease to a
    /// disable (or a disable and re-enable) stops before its next write and
    /// deactivates the conflicts it created.
    pub async fn run_sync(&self, list_id: &str) -> Result<ReconciliationResult, SyncError> {
        let guard = self.state_machine.begin_pass(list_id).await?;
        let mut created = Vec::new();

        match self.execute_pass(&guard, &mut created).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if matches!(err, SyncError::SyncDisabled(_) | SyncError::PassLeaseLost(_)) {
                    self.discard_conflicts(list_id, &created).await;
                }
                if let Err(release_err) = self.state_machine.abort_pass(&guard, &err).await {
                    warn!(list_id, error = %release_err, "Failed to release reconciliation lease");
                }
                Err(err)
            }
        }
    }

    async fn execute_pass(
        &self,
        guard: &PassGuard,
        created: &mut Vec<Uuid>,
    ) -> Result<ReconciliationResult, SyncError> {
        let list_id = guard.list_id();
        let external_id = guard.config().external_id.as_str();

        let remote = self.fetch_remote(external_id).await?;
        let remote_digest = remote
            .content_digest()
            .map_err(|e| ExternalSourceError::MalformedResponse(e.to_string()))?;

        self.state_machine.check_pass(guard).await?;

        let local = self.repository.get_local_snapshot(list_id).await?;
        let base = self
            .repository
            .get_base_snapshot(list_id)
            .await?
            .unwrap_or_default();

        let changes = if local.same_content(&remote) {
            debug!(list_id, "Local and remote snapshots already match");
            ChangeSet::default()
        } else {
            build_change_set(&base, &local, &remote)
        };
        log_change_set(list_id, &changes);

        let local_updates = changes.local_updates();
        if !local_updates.is_empty() {
            self.repository
                .apply_snapshot_changes(list_id, &local_updates)
                .await?;
        }

        let conflicts = changes.conflicts(list_id);
        if conflicts.is_empty() {
            let merged = local.apply(&local_updates);
            let pushed = self.options.push_local_changes && changes.has_local_only_changes();
            if pushed {
                self.state_machine.check_pass(guard).await?;
                self.push_remote(external_id, &merged).await?;
            }

            let new_base = if pushed { merged } else { remote };
            self.state_machine.check_pass(guard).await?;
            self.repository
                .set_base_snapshot(list_id, Some(new_base))
                .await?;

            let config = self
                .state_machine
                .apply_reconciliation_result(guard, ReconciliationOutcome::CleanSync)
                .await?;

            return Ok(ReconciliationResult {
                list_id: list_id.to_string(),
                outcome: ReconciliationOutcome::CleanSync,
                state: config.state,
                applied_locally: local_updates.len(),
                pushed,
                conflicts: Vec::new(),
                remote_digest,
            });
        }

        let conflict_ids = self.record_conflicts(list_id, conflicts, created).await?;
        self.state_machine.check_pass(guard).await?;
        self.repository
            .set_base_snapshot(list_id, Some(remote))
            .await?;

        let config = self
            .state_machine
            .apply_reconciliation_result(guard, ReconciliationOutcome::ConflictsRaised)
            .await?;

        Ok(ReconciliationResult {
            list_id: list_id.to_string(),
            outcome: ReconciliationOutcome::ConflictsRaised,
            state: config.state,
            applied_locally: local_updates.len(),
            pushed: false,
            conflicts: conflict_ids,
            remote_digest,
        })
    }

    /// Deactivate conflicts created by a pass that lost its lease. Conflicts
    /// it only reused belong to an earlier pass and are left alone.
    async fn discard_conflicts(&self, list_id: &str, created: &[Uuid]) {
        let mut deactivated = 0;
        for conflict_id in created {
            match self.repository.deactivate_conflict(*conflict_id).await {
                Ok(true) => deactivated += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(list_id, conflict = %conflict_id, error = %err, "Failed to discard conflict")
                }
            }
        }
        debug!(list_id, deactivated, "Discarded conflicts of an interrupted pass");
    }

    /// Persist new conflicts, reusing open ones for the same key left by an
    /// earlier failed pass.
    async fn record_conflicts(
        &self,
        list_id: &str,
        conflicts: Vec<Conflict>,
        created: &mut Vec<Uuid>,
    ) -> Result<Vec<Uuid>, SyncError> {
        let existing: HashMap<String, Uuid> = self
            .repository
            .get_open_conflicts(list_id)
            .await?
            .into_iter()
            .map(|conflict| (conflict_key(&conflict.kind), conflict.id))
            .collect();

        let mut ids = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            if let Some(id) = existing.get(&conflict_key(&conflict.kind)) {
                debug!(list_id, conflict = %id, "Conflict already recorded");
                ids.push(*id);
                continue;
            }

            info!(
                list_id,
                conflict = %conflict.id,
                conflict_type = ?conflict.conflict_type(),
                "Conflict detected"
            );
            let id = conflict.id;
            self.repository.create_conflict(conflict).await?;
            ids.push(id);
            created.push(id);
        }
        Ok(ids)
    }

    async fn fetch_remote(&self, external_id: &str) -> Result<Snapshot, SyncError> {
        let timeout = self.options.fetch_timeout;
        match tokio::time::timeout(timeout, self.source.fetch_snapshot(external_id)).await {
            Ok(snapshot) => Ok(snapshot?),
            Err(_) => Err(ExternalSourceError::Timeout(timeout).into()),
        }
    }

    async fn push_remote(&self, external_id: &str, snapshot: &Snapshot) -> Result<(), SyncError> {
        let timeout = self.options.fetch_timeout;
        match tokio::time::timeout(timeout, self.source.push_snapshot(external_id, snapshot)).await {
            Ok(pushed) => Ok(pushed?),
            Err(_) => Err(ExternalSourceError::Timeout(timeout).into()),
        }
    }
}

fn conflict_key(kind: &ConflictKind) -> String {
    match kind {
        ConflictKind::ItemUpdate { item_id, .. } | ConflictKind::StructureChange { item_id, .. } => {
            format!("item:{item_id}")
        }
        ConflictKind::SettingsChange { key, .. } => format!("setting:{key}"),
    }
}

fn log_change_set(list_id: &str, changes: &ChangeSet) {
    if changes.is_empty() {
        return;
    }
    debug!(
        list_id,
        added_remote = changes.count(ChangeKind::AddedRemote),
        added_local = changes.count(ChangeKind::AddedLocal),
        removed_remote = changes.count(ChangeKind::RemovedRemote),
        removed_local = changes.count(ChangeKind::RemovedLocal),
        updated_remote = changes.count(ChangeKind::UpdatedRemote),
        updated_local = changes.count(ChangeKind::UpdatedLocal),
        updated_both = changes.count(ChangeKind::UpdatedBoth),
        "Computed change set"
    );
}
