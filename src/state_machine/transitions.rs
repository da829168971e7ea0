use crate::error::{SyncError, SyncEvent};
use crate::model::SyncState;

/// The state a list moves to when `event` happens in `state`.
///
/// ```text
/// None      --Enable-->          Pending
/// Pending   --CleanSync-->       Synced
/// Pending   --ConflictsRaised--> Conflict
/// Synced    --MarkLocalChange--> Pending
/// Synced    --RemoteConflict-->  Conflict
/// Conflict  --ResolveAll(partial)-> Pending
/// Conflict  --ResolveAll(full)-->   Synced
/// *         --Disable-->         None
/// ```
///
/// Self-loops: `MarkLocalChange` on `Pending`, `BeginPass` on `Pending` and
/// `Synced`, `CleanSync` on `Synced` (refresh of an already synced list).
pub fn next_state(state: SyncState, event: SyncEvent) -> Result<SyncState, SyncError> {
    use SyncEvent as E;
    use SyncState as S;

    let next = match (state, event) {
        (_, E::Disable) => S::None,
        (S::None, E::Enable) => S::Pending,
        (S::Pending, E::CleanSync) | (S::Synced, E::CleanSync) => S::Synced,
        (S::Pending, E::ConflictsRaised) => S::Conflict,
        (S::Synced, E::RemoteConflict) => S::Conflict,
        (S::Synced, E::MarkLocalChange) | (S::Pending, E::MarkLocalChange) => S::Pending,
        (S::Pending, E::BeginPass) => S::Pending,
        (S::Synced, E::BeginPass) => S::Synced,
        (S::Conflict, E::ResolveAllPartial) => S::Pending,
        (S::Conflict, E::ResolveAllFull) => S::Synced,
        _ => return Err(SyncError::InvalidTransition { state, event }),
    };
    Ok(next)
}
