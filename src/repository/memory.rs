use super::{RepositoryError, SyncRepository};
use crate::model::{
    Conflict, ConflictPayload, ResolutionStrategy, Snapshot, SnapshotChange, SyncConfig, SyncState,
};
use crate::utils::now;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct ListRecord {
    config: SyncConfig,
    local: Snapshot,
    base: Option<Snapshot>,
}

#[derive(Debug, Default)]
struct MemoryState {
    lists: HashMap<String, ListRecord>,
    conflicts: HashMap<Uuid, Conflict>,
}

/// Process-local repository guarded by a single async mutex
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a list with its initial local snapshot and sync turned off.
    /// Replaces any previous record with the same id.
    pub async fn insert_list(&self, list_id: &str, local: Snapshot) {
        let mut state = self.state.lock().await;
        state.lists.insert(
            list_id.to_string(),
            ListRecord {
                local,
                ..Default::default()
            },
        );
    }

    /// Every conflict of a list, including resolved and inactive ones
    pub async fn conflicts_for(&self, list_id: &str) -> Vec<Conflict> {
        let state = self.state.lock().await;
        let mut conflicts: Vec<Conflict> = state
            .conflicts
            .values()
            .filter(|c| c.list_id == list_id)
            .cloned()
            .collect();
        conflicts.sort_by_key(|c| (c.created_at, c.id));
        conflicts
    }
}

fn list_mut<'a>(
    state: &'a mut MemoryState,
    list_id: &str,
) -> Result<&'a mut ListRecord, RepositoryError> {
    state
        .lists
        .get_mut(list_id)
        .ok_or_else(|| RepositoryError::ListNotFound(list_id.to_string()))
}

#[async_trait]
impl SyncRepository for InMemoryRepository {
    async fn get_sync_config(&self, list_id: &str) -> Result<SyncConfig, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(list_mut(&mut state, list_id)?.config.clone())
    }

    async fn set_sync_config(
        &self,
        list_id: &str,
        expected_revision: u64,
        mut config: SyncConfig,
    ) -> Result<SyncConfig, RepositoryError> {
        let mut state = self.state.lock().await;
        let record = list_mut(&mut state, list_id)?;

        if record.config.revision != expected_revision {
            return Err(RepositoryError::RevisionMismatch {
                list_id: list_id.to_string(),
                expected: expected_revision,
                actual: record.config.revision,
            });
        }

        config.revision = expected_revision + 1;
        record.config = config.clone();
        Ok(config)
    }

    async fn list_sync_enabled(&self) -> Result<Vec<String>, RepositoryError> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state
            .lists
            .iter()
            .filter(|(_, record)| record.config.state != SyncState::None)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_local_snapshot(&self, list_id: &str) -> Result<Snapshot, RepositoryError> {
        let mut state = self.state.lock().await;
        let mut snapshot = list_mut(&mut state, list_id)?.local.clone();
        snapshot.captured_at = now();
        Ok(snapshot)
    }

    async fn apply_snapshot_changes(
        &self,
        list_id: &str,
        changes: &[SnapshotChange],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let record = list_mut(&mut state, list_id)?;
        record.local = record.local.apply(changes);
        Ok(())
    }

    async fn get_base_snapshot(&self, list_id: &str) -> Result<Option<Snapshot>, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(list_mut(&mut state, list_id)?.base.clone())
    }

    async fn set_base_snapshot(
        &self,
        list_id: &str,
        snapshot: Option<Snapshot>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        list_mut(&mut state, list_id)?.base = snapshot;
        Ok(())
    }

    async fn create_conflict(&self, conflict: Conflict) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.lists.contains_key(&conflict.list_id) {
            return Err(RepositoryError::ListNotFound(conflict.list_id));
        }
        state.conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    async fn get_conflict(&self, conflict_id: Uuid) -> Result<Option<Conflict>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.conflicts.get(&conflict_id).cloned())
    }

    async fn get_open_conflicts(&self, list_id: &str) -> Result<Vec<Conflict>, RepositoryError> {
        let state = self.state.lock().await;
        let mut open: Vec<Conflict> = state
            .conflicts
            .values()
            .filter(|c| c.list_id == list_id && c.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|c| (c.created_at, c.id));
        Ok(open)
    }

    async fn deactivate_conflicts(&self, list_id: &str) -> Result<usize, RepositoryError> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for conflict in state.conflicts.values_mut() {
            if conflict.list_id == list_id && conflict.is_open() {
                conflict.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn deactivate_conflict(&self, conflict_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.conflicts.get_mut(&conflict_id) {
            Some(conflict) if conflict.is_open() => {
                conflict.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        payload: &ConflictPayload,
        strategy: ResolutionStrategy,
    ) -> Result<Conflict, RepositoryError> {
        let mut state = self.state.lock().await;
        let MemoryState { lists, conflicts } = &mut *state;
        let conflict = conflicts
            .get_mut(&conflict_id)
            .ok_or(RepositoryError::ConflictNotFound(conflict_id))?;

        if conflict.is_resolved() {
            return Err(RepositoryError::AlreadyResolved(conflict_id));
        }

        let record = lists
            .get_mut(&conflict.list_id)
            .ok_or_else(|| RepositoryError::ListNotFound(conflict.list_id.clone()))?;
        record.local = record.local.apply(&[payload.to_change()]);

        conflict.resolved_at = Some(now());
        conflict.resolution_strategy = Some(strategy);
        conflict.resolution = Some(payload.clone());
        Ok(conflict.clone())
    }

    async fn delete_resolved_conflicts_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut state = self.state.lock().await;
        let before = state.conflicts.len();
        state.conflicts.retain(|_, conflict| match conflict.resolved_at {
            Some(resolved_at) => resolved_at >= cutoff,
            None => conflict.active || conflict.created_at >= cutoff,
        });
        Ok(before - state.conflicts.len())
    }
}
