#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use listsync::model::{
    Conflict, ConflictPayload, ItemRecord, ResolutionStrategy, Snapshot, SnapshotChange,
    SyncConfig, SyncSource,
};
use listsync::reconciliation::{Reconciler, ReconcilerOptions};
use listsync::repository::{InMemoryRepository, RepositoryError, SyncRepository};
use listsync::resolver::ConflictResolver;
use listsync::source::{ExternalSource, ExternalSourceError};
use listsync::state_machine::SyncStateMachine;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const EXTERNAL_ID: &str = "abc";

/// Create a temporary directory for a test
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

pub fn item(id: &str, name: &str) -> ItemRecord {
    ItemRecord::new(id, name)
}

/// Snapshot from `(id, name)` pairs
pub fn snapshot(items: &[(&str, &str)]) -> Snapshot {
    Snapshot::new(items.iter().map(|(id, name)| item(id, name)).collect())
}

pub fn rename(item_id: &str, name: &str) -> SnapshotChange {
    SnapshotChange::UpsertItem {
        item: item(item_id, name),
    }
}

/// External source scripted by the test: remote snapshots per external id,
/// queued failures and an optional delay on fetch.
#[derive(Default)]
pub struct ScriptedSource {
    remotes: Mutex<HashMap<String, Snapshot>>,
    fetch_failures: Mutex<VecDeque<ExternalSourceError>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
    pushes: Mutex<Vec<(String, Snapshot)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote(&self, external_id: &str, snapshot: Snapshot) {
        self.remotes
            .lock()
            .unwrap()
            .insert(external_id.to_string(), snapshot);
    }

    pub fn remote(&self, external_id: &str) -> Option<Snapshot> {
        self.remotes.lock().unwrap().get(external_id).cloned()
    }

    /// Fail the next fetch with `error`
    pub fn fail_next_fetch(&self, error: ExternalSourceError) {
        self.fetch_failures.lock().unwrap().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<(String, Snapshot)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalSource for ScriptedSource {
    async fn fetch_snapshot(&self, external_id: &str) -> Result<Snapshot, ExternalSourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.remote(external_id)
            .ok_or_else(|| ExternalSourceError::Unavailable(format!("no list {external_id}")))
    }

    async fn push_snapshot(
        &self,
        external_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), ExternalSourceError> {
        self.pushes
            .lock()
            .unwrap()
            .push((external_id.to_string(), snapshot.clone()));
        self.set_remote(external_id, snapshot.clone());
        Ok(())
    }
}

/// Repository decorator that fails selected writes on demand
pub struct FlakyRepository {
    inner: Arc<InMemoryRepository>,
    failing_conflicts: Mutex<HashSet<Uuid>>,
    fail_base_writes: AtomicBool,
    fail_base_clears: AtomicBool,
    fail_snapshot_writes: AtomicBool,
    drop_lease_on_conflict: AtomicBool,
}

impl FlakyRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            failing_conflicts: Mutex::new(HashSet::new()),
            fail_base_writes: AtomicBool::new(false),
            fail_base_clears: AtomicBool::new(false),
            fail_snapshot_writes: AtomicBool::new(false),
            drop_lease_on_conflict: AtomicBool::new(false),
        }
    }

    pub fn fail_resolution_of(&self, conflict_id: Uuid) {
        self.failing_conflicts.lock().unwrap().insert(conflict_id);
    }

    pub fn heal(&self) {
        self.failing_conflicts.lock().unwrap().clear();
        self.fail_base_writes.store(false, Ordering::SeqCst);
        self.fail_base_clears.store(false, Ordering::SeqCst);
        self.fail_snapshot_writes.store(false, Ordering::SeqCst);
        self.drop_lease_on_conflict.store(false, Ordering::SeqCst);
    }

    pub fn fail_base_writes(&self) {
        self.fail_base_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_base_clears(&self) {
        self.fail_base_clears.store(true, Ordering::SeqCst);
    }

    /// Refuse every write to a local list, including the one done when
    /// resolving a conflict
    pub fn fail_snapshot_writes(&self) {
        self.fail_snapshot_writes.store(true, Ordering::SeqCst);
    }

    /// Clear the pass lease of a list right after a conflict is created for
    /// it, as if another pass had taken the list over
    pub fn drop_lease_on_conflict(&self) {
        self.drop_lease_on_conflict.store(true, Ordering::SeqCst);
    }

    fn check_snapshot_write(&self) -> Result<(), RepositoryError> {
        if self.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncRepository for FlakyRepository {
    async fn get_sync_config(&self, list_id: &str) -> Result<SyncConfig, RepositoryError> {
        self.inner.get_sync_config(list_id).await
    }

    async fn set_sync_config(
        &self,
        list_id: &str,
        expected_revision: u64,
        config: SyncConfig,
    ) -> Result<SyncConfig, RepositoryError> {
        self.inner
            .set_sync_config(list_id, expected_revision, config)
            .await
    }

    async fn list_sync_enabled(&self) -> Result<Vec<String>, RepositoryError> {
        self.inner.list_sync_enabled().await
    }

    async fn get_local_snapshot(&self, list_id: &str) -> Result<Snapshot, RepositoryError> {
        self.inner.get_local_snapshot(list_id).await
    }

    async fn apply_snapshot_changes(
        &self,
        list_id: &str,
        changes: &[SnapshotChange],
    ) -> Result<(), RepositoryError> {
        self.check_snapshot_write()?;
        self.inner.apply_snapshot_changes(list_id, changes).await
    }

    async fn get_base_snapshot(&self, list_id: &str) -> Result<Option<Snapshot>, RepositoryError> {
        self.inner.get_base_snapshot(list_id).await
    }

    async fn set_base_snapshot(
        &self,
        list_id: &str,
        snapshot: Option<Snapshot>,
    ) -> Result<(), RepositoryError> {
        if snapshot.is_some() && self.fail_base_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("base snapshot write refused".to_string()));
        }
        if snapshot.is_none() && self.fail_base_clears.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("base snapshot clear refused".to_string()));
        }
        self.inner.set_base_snapshot(list_id, snapshot).await
    }

    async fn create_conflict(&self, conflict: Conflict) -> Result<(), RepositoryError> {
        let list_id = conflict.list_id.clone();
        self.inner.create_conflict(conflict).await?;

        if self.drop_lease_on_conflict.load(Ordering::SeqCst) {
            let config = self.inner.get_sync_config(&list_id).await?;
            let revision = config.revision;
            self.inner
                .set_sync_config(
                    &list_id,
                    revision,
                    SyncConfig {
                        pass: None,
                        ..config
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn get_conflict(&self, conflict_id: Uuid) -> Result<Option<Conflict>, RepositoryError> {
        self.inner.get_conflict(conflict_id).await
    }

    async fn get_open_conflicts(&self, list_id: &str) -> Result<Vec<Conflict>, RepositoryError> {
        self.inner.get_open_conflicts(list_id).await
    }

    async fn deactivate_conflicts(&self, list_id: &str) -> Result<usize, RepositoryError> {
        self.inner.deactivate_conflicts(list_id).await
    }

    async fn deactivate_conflict(&self, conflict_id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.deactivate_conflict(conflict_id).await
    }

    async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        payload: &ConflictPayload,
        strategy: ResolutionStrategy,
    ) -> Result<Conflict, RepositoryError> {
        if self.failing_conflicts.lock().unwrap().contains(&conflict_id) {
            return Err(RepositoryError::Storage(format!(
                "write refused for conflict {conflict_id}"
            )));
        }
        self.check_snapshot_write()?;
        self.inner
            .resolve_conflict(conflict_id, payload, strategy)
            .await
    }

    async fn delete_resolved_conflicts_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        self.inner.delete_resolved_conflicts_older_than(cutoff).await
    }
}

/// The engine wired against an in-memory repository and a scripted source
pub struct Harness {
    pub memory: Arc<InMemoryRepository>,
    pub repository: Arc<dyn SyncRepository>,
    pub source: Arc<ScriptedSource>,
    pub state_machine: Arc<SyncStateMachine>,
    pub reconciler: Arc<Reconciler>,
    pub resolver: Arc<ConflictResolver>,
}

impl Harness {
    pub fn new() -> Self {
        let memory = Arc::new(InMemoryRepository::new());
        Self::with_repository(memory.clone(), memory)
    }

    pub fn with_repository(memory: Arc<InMemoryRepository>, repository: Arc<dyn SyncRepository>) -> Self {
        Self::build(memory, repository, ReconcilerOptions::default())
    }

    pub fn with_options(options: ReconcilerOptions) -> Self {
        let memory = Arc::new(InMemoryRepository::new());
        Self::build(memory.clone(), memory, options)
    }

    fn build(
        memory: Arc<InMemoryRepository>,
        repository: Arc<dyn SyncRepository>,
        options: ReconcilerOptions,
    ) -> Self {
        let source = Arc::new(ScriptedSource::new());
        let state_machine = Arc::new(SyncStateMachine::new(
            repository.clone(),
            Duration::from_secs(60),
        ));
        let reconciler = Arc::new(Reconciler::new(
            repository.clone(),
            source.clone(),
            state_machine.clone(),
            options,
        ));
        let resolver = Arc::new(ConflictResolver::new(
            repository.clone(),
            state_machine.clone(),
        ));

        Self {
            memory,
            repository,
            source,
            state_machine,
            reconciler,
            resolver,
        }
    }

    /// Create a list with `local` items, the same remote, and sync enabled
    pub async fn synced_list(&self, list_id: &str, local: Snapshot) {
        self.memory.insert_list(list_id, local.clone()).await;
        self.source.set_remote(EXTERNAL_ID, local);
        self.state_machine
            .enable(list_id, SyncSource::ExternalMapProvider, EXTERNAL_ID)
            .await
            .expect("Should enable sync");
        self.reconciler
            .run_sync(list_id)
            .await
            .expect("Initial sync should succeed");
    }

    /// Rename an item locally and record the local change
    pub async fn edit_local(&self, list_id: &str, item_id: &str, name: &str) {
        self.put_local(list_id, item(item_id, name)).await;
    }

    /// Store `record` in the local list and record the local change
    pub async fn put_local(&self, list_id: &str, record: ItemRecord) {
        self.repository
            .apply_snapshot_changes(list_id, &[SnapshotChange::UpsertItem { item: record }])
            .await
            .expect("Should edit local list");
        self.state_machine
            .mark_local_change(list_id)
            .await
            .expect("Should mark local change");
    }

    /// Rename an item on the remote side
    pub fn edit_remote(&self, item_id: &str, name: &str) {
        self.put_remote(item(item_id, name));
    }

    /// Store `record` on the remote side
    pub fn put_remote(&self, record: ItemRecord) {
        let remote = self
            .source
            .remote(EXTERNAL_ID)
            .unwrap_or_default()
            .apply(&[SnapshotChange::UpsertItem { item: record }]);
        self.source.set_remote(EXTERNAL_ID, remote);
    }

    pub async fn local_item(&self, list_id: &str, item_id: &str) -> Option<ItemRecord> {
        self.repository
            .get_local_snapshot(list_id)
            .await
            .expect("Should read local snapshot")
            .item(item_id)
            .cloned()
    }

    pub async fn local_name(&self, list_id: &str, item_id: &str) -> Option<String> {
        self.repository
            .get_local_snapshot(list_id)
            .await
            .expect("Should read local snapshot")
            .item(item_id)
            .map(|item| item.name.clone())
    }
}
