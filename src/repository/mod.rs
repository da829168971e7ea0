//! Persistence contract of the sync engine.
//!
//! Storage itself lives outside this crate; the engine only talks to a
//! [`SyncRepository`]. [`InMemoryRepository`] backs the daemon and the tests.

mod memory;

pub use memory::InMemoryRepository;

use crate::model::{Conflict, ConflictPayload, ResolutionStrategy, Snapshot, SnapshotChange, SyncConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("List {0} not found")]
    ListNotFound(String),

    #[error("Conflict {0} not found")]
    ConflictNotFound(Uuid),

    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Revision mismatch for list {list_id}: expected {expected}, found {actual}")]
    RevisionMismatch {
        list_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Storage operations the engine relies on.
///
/// `set_sync_config` is a compare-and-set: it succeeds only while the stored
/// revision equals `expected_revision`, and bumps the revision on write.
/// `resolve_conflict` stamps the resolution and writes its payload into the
/// local list in one step. It rejects resolved conflicts, and a failed call
/// changes neither the conflict nor the list.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    async fn get_sync_config(&self, list_id: &str) -> Result<SyncConfig, RepositoryError>;

    /// Store `config` if the current revision is `expected_revision`.
    /// Returns the stored config with its new revision.
    async fn set_sync_config(
        &self,
        list_id: &str,
        expected_revision: u64,
        config: SyncConfig,
    ) -> Result<SyncConfig, RepositoryError>;

    /// Ids of every list whose sync state is not `None`
    async fn list_sync_enabled(&self) -> Result<Vec<String>, RepositoryError>;

    async fn get_local_snapshot(&self, list_id: &str) -> Result<Snapshot, RepositoryError>;

    async fn apply_snapshot_changes(
        &self,
        list_id: &str,
        changes: &[SnapshotChange],
    ) -> Result<(), RepositoryError>;

    /// Remote snapshot as recorded at the end of the last completed pass
    async fn get_base_snapshot(&self, list_id: &str) -> Result<Option<Snapshot>, RepositoryError>;

    async fn set_base_snapshot(
        &self,
        list_id: &str,
        snapshot: Option<Snapshot>,
    ) -> Result<(), RepositoryError>;

    async fn create_conflict(&self, conflict: Conflict) -> Result<(), RepositoryError>;

    async fn get_conflict(&self, conflict_id: Uuid) -> Result<Option<Conflict>, RepositoryError>;

    /// Active, unresolved conflicts of a list, oldest first
    async fn get_open_conflicts(&self, list_id: &str) -> Result<Vec<Conflict>, RepositoryError>;

    /// Mark every open conflict of a list inactive. Returns how many changed.
    async fn deactivate_conflicts(&self, list_id: &str) -> Result<usize, RepositoryError>;

    /// Mark one conflict inactive if it is still open. Returns whether it changed.
    async fn deactivate_conflict(&self, conflict_id: Uuid) -> Result<bool, RepositoryError>;

    async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        payload: &ConflictPayload,
        strategy: ResolutionStrategy,
    ) -> Result<Conflict, RepositoryError>;

    /// Delete conflicts resolved before `cutoff`, and inactive ones created
    /// before it. Returns how many were deleted.
    async fn delete_resolved_conflicts_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}
