pub mod config;
pub mod error;
pub mod model;
pub mod reconciliation;
pub mod repository;
pub mod resolver;
pub mod source;
pub mod state_machine;
pub mod utils;
pub mod worker;

// Re-export commonly used types
pub use config::{read_config, read_list_seeds, write_config, ConfigError, EngineConfig, ListSeed};
pub use error::{ErrorClass, SyncError, SyncEvent};
pub use model::{
    Conflict, ConflictKind, ConflictPayload, ConflictSide, ConflictType, FieldConflict, ItemRecord,
    PassLease, ResolutionStrategy, Snapshot, SnapshotChange, SyncConfig, SyncSource, SyncState,
};
pub use reconciliation::{Reconciler, ReconcilerOptions, ReconciliationResult};
pub use repository::{InMemoryRepository, RepositoryError, SyncRepository};
pub use resolver::{AutoResolveStrategy, ConflictResolver, Decision};
pub use source::{ExternalSource, ExternalSourceError, FileSnapshotSource};
pub use state_machine::{
    sync_trigger, PassGuard, ReconciliationOutcome, SyncStateMachine, SyncTrigger, TriggerReceiver,
};
pub use worker::{
    spawn_on_demand_sync, ConflictPurgeTask, PeriodicTask, PeriodicWorker, ScheduledSyncTask,
    SyncBackoff, WorkerHandle,
};
