//! Conflict resolution, manual and strategy driven.
//!
//! Resolving writes the chosen payload into the local list. Once a list has
//! no open conflicts left it leaves `Conflict`: to `Synced` when the local
//! list matches the last remote snapshot, otherwise to `Pending`.

mod strategy;

pub use strategy::{last_writer, AutoResolveStrategy, Decision};

use crate::error::SyncError;
use crate::model::{Conflict, ConflictPayload, ResolutionStrategy, SyncConfig, SyncState};
use crate::repository::SyncRepository;
use crate::state_machine::SyncStateMachine;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ConflictResolver {
    repository: Arc<dyn SyncRepository>,
    state_machine: Arc<SyncStateMachine>,
}

impl ConflictResolver {
    pub fn new(repository: Arc<dyn SyncRepository>, state_machine: Arc<SyncStateMachine>) -> Self {
        Self {
            repository,
            state_machine,
        }
    }

    /// Resolve one conflict with a manual decision.
    ///
    /// Unknown or inactive conflicts fail with `ConflictNotFound`, resolved
    /// ones with `AlreadyResolved`.
    pub async fn resolve(&self, conflict_id: Uuid, decision: Decision) -> Result<Conflict, SyncError> {
        let conflict = self.load_open(conflict_id).await?;
        let (payload, strategy) = decision.payload_for(&conflict)?;

        let resolved = self.apply(&conflict, &payload, strategy).await?;
        self.finish_if_settled(&conflict.list_id).await?;
        Ok(resolved)
    }

    /// Resolve every open conflict of a list with `strategy`.
    ///
    /// Returns the ids resolved. When some conflicts fail the call fails with
    /// `PartialResolution`; the ones that succeeded stay resolved.
    pub async fn auto_resolve(
        &self,
        list_id: &str,
        strategy: AutoResolveStrategy,
    ) -> Result<Vec<Uuid>, SyncError> {
        let open = self.repository.get_open_conflicts(list_id).await?;
        let mut succeeded = Vec::with_capacity(open.len());
        let mut failed = Vec::new();

        for conflict in &open {
            let payload = strategy.decide(conflict);
            match self
                .apply(conflict, &payload, strategy.resolution_strategy())
                .await
            {
                Ok(_) => succeeded.push(conflict.id),
                Err(err) => {
                    warn!(list_id, conflict = %conflict.id, error = %err, "Auto-resolve failed");
                    failed.push((conflict.id, err.to_string()));
                }
            }
        }

        if !failed.is_empty() {
            return Err(SyncError::PartialResolution { succeeded, failed });
        }

        info!(list_id, strategy = %strategy, resolved = succeeded.len(), "Conflicts auto-resolved");
        self.finish_if_settled(list_id).await?;
        Ok(succeeded)
    }

    async fn load_open(&self, conflict_id: Uuid) -> Result<Conflict, SyncError> {
        let conflict = self
            .repository
            .get_conflict(conflict_id)
            .await?
            .filter(|conflict| conflict.active)
            .ok_or(SyncError::ConflictNotFound(conflict_id))?;

        if conflict.is_resolved() {
            return Err(SyncError::AlreadyResolved(conflict_id));
        }
        Ok(conflict)
    }

    /// Mark the conflict resolved and write its payload into the local list.
    /// The repository does both at once, so a failure leaves the conflict open.
    async fn apply(
        &self,
        conflict: &Conflict,
        payload: &ConflictPayload,
        strategy: ResolutionStrategy,
    ) -> Result<Conflict, SyncError> {
        let resolved = self
            .repository
            .resolve_conflict(conflict.id, payload, strategy)
            .await?;

        debug!(
            list_id = %conflict.list_id,
            conflict = %conflict.id,
            strategy = %strategy,
            "Conflict resolved"
        );
        Ok(resolved)
    }

    /// Leave `Conflict` when no open conflict remains. Returns the new config
    /// if a transition happened.
    async fn finish_if_settled(&self, list_id: &str) -> Result<Option<SyncConfig>, SyncError> {
        if !self.repository.get_open_conflicts(list_id).await?.is_empty() {
            return Ok(None);
        }

        let local = self.repository.get_local_snapshot(list_id).await?;
        let matches_remote = self
            .repository
            .get_base_snapshot(list_id)
            .await?
            .is_some_and(|base| base.same_content(&local));

        match self
            .state_machine
            .resolve_all_conflicts(list_id, matches_remote)
            .await
        {
            Ok(config) => Ok(Some(config)),
            // Another resolver finished the list first, or it was disabled
            Err(SyncError::InvalidTransition { state, .. }) if state != SyncState::Conflict => {
                debug!(list_id, state = %state, "List already left conflict state");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
