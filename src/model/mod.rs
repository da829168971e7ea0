//! Data model of the sync engine.
//!
//! - `SyncConfig` / `SyncState`: per-list sync settings and lifecycle state
//! - `Snapshot`: point-in-time capture of a list's items and settings
//! - `Conflict`: persisted record of an overlapping change awaiting resolution

mod conflict;
mod snapshot;
mod sync_config;

pub use conflict::{
    Conflict, ConflictKind, ConflictPayload, ConflictSide, ConflictType, FieldConflict,
    ResolutionStrategy,
};
pub use snapshot::{ItemRecord, Snapshot, SnapshotChange, NAME_FIELD};
pub use sync_config::{PassLease, SyncConfig, SyncSource, SyncState};
