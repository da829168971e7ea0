//! Error taxonomy of the sync engine.

use crate::model::SyncState;
use crate::repository::RepositoryError;
use crate::source::ExternalSourceError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Event fed into the sync state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    Enable,
    Disable,
    MarkLocalChange,
    BeginPass,
    CleanSync,
    ConflictsRaised,
    RemoteConflict,
    ResolveAllPartial,
    ResolveAllFull,
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEvent::Enable => "Enable",
            SyncEvent::Disable => "Disable",
            SyncEvent::MarkLocalChange => "MarkLocalChange",
            SyncEvent::BeginPass => "BeginPass",
            SyncEvent::CleanSync => "CleanSync",
            SyncEvent::ConflictsRaised => "ConflictsRaised",
            SyncEvent::RemoteConflict => "RemoteConflict",
            SyncEvent::ResolveAllPartial => "ResolveAll(partial)",
            SyncEvent::ResolveAllFull => "ResolveAll(full)",
        };
        f.write_str(name)
    }
}

/// Broad category of a [`SyncError`], deciding who reacts to it and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller supplied bad input; never retried automatically
    Configuration,
    /// Logic or race condition; surfaced, not retried
    State,
    /// Transient failure of the external source; retried by the scheduler
    External,
    /// Some work succeeded; the caller retries the remainder
    Partial,
    /// Persistence failure
    Storage,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unrecognized sync source: {0}")]
    InvalidSource(String),

    #[error("External id must not be empty")]
    MissingExternalId,

    #[error("Sync is disabled for list {0}")]
    SyncDisabled(String),

    #[error("Invalid merge payload: {0}")]
    InvalidMergePayload(String),

    #[error("Invalid transition: event {event} is not allowed in state {state}")]
    InvalidTransition { state: SyncState, event: SyncEvent },

    #[error("A reconciliation pass is already in progress for list {0}")]
    AlreadyInProgress(String),

    #[error("Reconciliation pass for list {0} lost its lease")]
    PassLeaseLost(String),

    #[error("Sync config of list {0} kept changing concurrently")]
    ConcurrentModification(String),

    #[error("List {0} not found")]
    ListNotFound(String),

    #[error("Conflict {0} not found")]
    ConflictNotFound(Uuid),

    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("External source error: {0}")]
    ExternalSource(#[from] ExternalSourceError),

    #[error("{}", partial_summary(.succeeded, .failed))]
    PartialResolution {
        succeeded: Vec<Uuid>,
        failed: Vec<(Uuid, String)>,
    },

    #[error("Repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for SyncError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ListNotFound(list_id) => SyncError::ListNotFound(list_id),
            RepositoryError::ConflictNotFound(id) => SyncError::ConflictNotFound(id),
            RepositoryError::AlreadyResolved(id) => SyncError::AlreadyResolved(id),
            other => SyncError::Repository(other),
        }
    }
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::InvalidSource(_)
            | SyncError::MissingExternalId
            | SyncError::SyncDisabled(_)
            | SyncError::InvalidMergePayload(_) => ErrorClass::Configuration,
            SyncError::InvalidTransition { .. }
            | SyncError::AlreadyInProgress(_)
            | SyncError::PassLeaseLost(_)
            | SyncError::ConcurrentModification(_)
            | SyncError::ListNotFound(_)
            | SyncError::ConflictNotFound(_)
            | SyncError::AlreadyResolved(_) => ErrorClass::State,
            SyncError::ExternalSource(_) => ErrorClass::External,
            SyncError::PartialResolution { .. } => ErrorClass::Partial,
            SyncError::Repository(_) => ErrorClass::Storage,
        }
    }

    /// Whether the scheduler should retry this failure with backoff
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::External
    }
}

fn partial_summary(succeeded: &[Uuid], failed: &[(Uuid, String)]) -> String {
    let failures = failed
        .iter()
        .map(|(id, reason)| format!("{id} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Resolved {} of {} conflicts; failed: {}",
        succeeded.len(),
        succeeded.len() + failed.len(),
        failures
    )
}
