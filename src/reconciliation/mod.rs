//! Reconciliation passes: a three-way diff of base, local and remote
//! snapshots, and the executor that applies it.

mod execute;
mod plan;

pub use execute::{Reconciler, ReconcilerOptions, ReconciliationResult};
pub use plan::{build_change_set, ChangeKind, ChangeSet, ItemChange, SettingChange, SideChange};
