use super::transitions::next_state;
use super::SyncTrigger;
use crate::error::{SyncError, SyncEvent};
use crate::model::{PassLease, SyncConfig, SyncSource, SyncState};
use crate::repository::{RepositoryError, SyncRepository};
use crate::utils::now;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts of the read/compare-and-set loop before giving up
const MAX_CAS_ATTEMPTS: usize = 8;

/// Result of a reconciliation pass as reported to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    CleanSync,
    ConflictsRaised,
}

/// Proof that the caller holds the single-flight lease of a list
#[derive(Debug, Clone)]
pub struct PassGuard {
    list_id: String,
    lease_id: Uuid,
    config: SyncConfig,
}

impl PassGuard {
    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    pub fn lease_id(&self) -> Uuid {
        self.lease_id
    }

    /// State the list was in when the pass began (`Pending` or `Synced`)
    pub fn started_from(&self) -> SyncState {
        self.config.state
    }

    /// Sync config as stored when the lease was acquired
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

/// Gatekeeper of every sync state transition
pub struct SyncStateMachine {
    repository: Arc<dyn SyncRepository>,
    lease_ttl: Duration,
    trigger: Option<SyncTrigger>,
}

impl SyncStateMachine {
    pub fn new(repository: Arc<dyn SyncRepository>, lease_ttl: std::time::Duration) -> Self {
        Self {
            repository,
            lease_ttl: Duration::from_std(lease_ttl).unwrap_or(Duration::minutes(10)),
            trigger: None,
        }
    }

    /// Fire `trigger` whenever sync gets enabled
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub async fn config(&self, list_id: &str) -> Result<SyncConfig, SyncError> {
        Ok(self.repository.get_sync_config(list_id).await?)
    }

    pub async fn state(&self, list_id: &str) -> Result<SyncState, SyncError> {
        Ok(self.config(list_id).await?.state)
    }

    /// Turn sync on. Requires state `None`; moves to `Pending` and requests an
    /// immediate reconciliation.
    pub async fn enable(
        &self,
        list_id: &str,
        source: SyncSource,
        external_id: &str,
    ) -> Result<SyncConfig, SyncError> {
        let external_id = external_id.trim();

        // A pass interrupted by an earlier disable may have left a base behind.
        // Cleared before the transition so a failure leaves the list disabled.
        if self.repository.get_sync_config(list_id).await?.state == SyncState::None {
            self.repository.set_base_snapshot(list_id, None).await?;
        }

        let (config, _) = self
            .update(list_id, |current| {
                let state = next_state(current.state, SyncEvent::Enable)?;
                if source == SyncSource::None {
                    return Err(SyncError::InvalidSource(source.to_string()));
                }
                if external_id.is_empty() {
                    return Err(SyncError::MissingExternalId);
                }
                Ok(Some(SyncConfig {
                    source,
                    external_id: external_id.to_string(),
                    state,
                    last_synced_at: None,
                    last_error: None,
                    revision: current.revision,
                    pass: None,
                }))
            })
            .await?;

        info!(list_id, source = %source, external_id, "Sync enabled");

        if let Some(trigger) = &self.trigger {
            trigger.fire(list_id);
        }
        Ok(config)
    }

    /// Turn sync off from any state. Open conflicts are marked inactive and
    /// the recorded base snapshot is dropped.
    pub async fn disable(&self, list_id: &str) -> Result<SyncConfig, SyncError> {
        let (config, _) = self
            .update(list_id, |current| {
                let state = next_state(current.state, SyncEvent::Disable)?;
                Ok(Some(SyncConfig {
                    state,
                    revision: current.revision,
                    ..SyncConfig::disabled()
                }))
            })
            .await?;

        self.repository.set_base_snapshot(list_id, None).await?;
        let deactivated = self.repository.deactivate_conflicts(list_id).await?;

        info!(list_id, deactivated, "Sync disabled");
        Ok(config)
    }

    /// Record that the list was edited locally (`Synced -> Pending`).
    pub async fn mark_local_change(&self, list_id: &str) -> Result<SyncConfig, SyncError> {
        let (config, changed) = self
            .update(list_id, |current| {
                let state = next_state(current.state, SyncEvent::MarkLocalChange)?;
                if state == current.state {
                    return Ok(None);
                }
                Ok(Some(SyncConfig {
                    state,
                    ..current.clone()
                }))
            })
            .await?;

        if changed {
            debug!(list_id, "Local change recorded, list pending sync");
        }
        Ok(config)
    }

    /// Acquire the single-flight lease for a reconciliation pass.
    ///
    /// Fails with `AlreadyInProgress` while another pass holds a live lease.
    /// An expired lease is taken over.
    pub async fn begin_pass(&self, list_id: &str) -> Result<PassGuard, SyncError> {
        let started = now();
        let lease = PassLease::new(started, self.lease_ttl);
        let lease_id = lease.id;

        let (config, _) = self
            .update(list_id, |current| {
                if current.state == SyncState::None {
                    return Err(SyncError::SyncDisabled(list_id.to_string()));
                }
                next_state(current.state, SyncEvent::BeginPass)?;
                if current.live_pass(started).is_some() {
                    return Err(SyncError::AlreadyInProgress(list_id.to_string()));
                }
                if let Some(stale) = &current.pass {
                    warn!(
                        list_id,
                        stale_lease = %stale.id,
                        acquired_at = %stale.acquired_at,
                        "Taking over expired reconciliation lease"
                    );
                }
                Ok(Some(SyncConfig {
                    pass: Some(lease.clone()),
                    ..current.clone()
                }))
            })
            .await?;

        debug!(list_id, lease = %lease_id, state = %config.state, "Reconciliation pass started");
        Ok(PassGuard {
            list_id: list_id.to_string(),
            lease_id,
            config,
        })
    }

    /// Apply the result of a pass and release its lease.
    ///
    /// `CleanSync` moves `Pending -> Synced`; `ConflictsRaised` moves
    /// `Pending -> Conflict`, or `Synced -> Conflict` for a pass that found
    /// remote conflicts on an already synced list.
    pub async fn apply_reconciliation_result(
        &self,
        guard: &PassGuard,
        outcome: ReconciliationOutcome,
    ) -> Result<SyncConfig, SyncError> {
        let list_id = guard.list_id();
        let completed = now();

        let (config, _) = self
            .update(list_id, |current| {
                self.check_lease(current, guard)?;

                let event = match (current.state, outcome) {
                    (SyncState::Synced, ReconciliationOutcome::ConflictsRaised) => {
                        SyncEvent::RemoteConflict
                    }
                    (_, ReconciliationOutcome::ConflictsRaised) => SyncEvent::ConflictsRaised,
                    (_, ReconciliationOutcome::CleanSync) => SyncEvent::CleanSync,
                };
                let state = next_state(current.state, event)?;

                let last_synced_at = match outcome {
                    ReconciliationOutcome::CleanSync => Some(completed),
                    ReconciliationOutcome::ConflictsRaised => current.last_synced_at,
                };
                Ok(Some(SyncConfig {
                    state,
                    last_synced_at,
                    last_error: None,
                    pass: None,
                    ..current.clone()
                }))
            })
            .await?;

        info!(list_id, outcome = ?outcome, state = %config.state, "Reconciliation pass finished");
        Ok(config)
    }

    /// Fail with `SyncDisabled` or `PassLeaseLost` unless `guard` still holds
    /// the lease. Passes call this before writing to the repository.
    pub async fn check_pass(&self, guard: &PassGuard) -> Result<(), SyncError> {
        let current = self.repository.get_sync_config(guard.list_id()).await?;
        self.check_lease(&current, guard)
    }

    /// Release the lease of a failed pass, recording the error. The state
    /// is left as is so the list stays eligible for the next pass.
    pub async fn abort_pass(
        &self,
        guard: &PassGuard,
        error: &SyncError,
    ) -> Result<SyncConfig, SyncError> {
        let message = error.to_string();

        let (config, released) = self
            .update(guard.list_id(), |current| {
                if !current.holds_pass(guard.lease_id()) {
                    return Ok(None);
                }
                Ok(Some(SyncConfig {
                    last_error: Some(message.clone()),
                    pass: None,
                    ..current.clone()
                }))
            })
            .await?;

        if released {
            warn!(list_id = guard.list_id(), error = %message, "Reconciliation pass failed");
        }
        Ok(config)
    }

    /// Leave `Conflict` once every conflict of the list is resolved.
    ///
    /// Goes to `Synced` when the resolved local snapshot already matches the
    /// remote one, otherwise to `Pending` so the result gets re-synced.
    pub async fn resolve_all_conflicts(
        &self,
        list_id: &str,
        matches_remote: bool,
    ) -> Result<SyncConfig, SyncError> {
        let event = if matches_remote {
            SyncEvent::ResolveAllFull
        } else {
            SyncEvent::ResolveAllPartial
        };
        let resolved_at = now();

        let (config, _) = self
            .update(list_id, |current| {
                let state = next_state(current.state, event)?;
                Ok(Some(SyncConfig {
                    state,
                    last_error: None,
                    last_synced_at: if matches_remote {
                        Some(resolved_at)
                    } else {
                        current.last_synced_at
                    },
                    ..current.clone()
                }))
            })
            .await?;

        info!(list_id, state = %config.state, "All conflicts resolved");
        Ok(config)
    }

    fn check_lease(&self, current: &SyncConfig, guard: &PassGuard) -> Result<(), SyncError> {
        if current.holds_pass(guard.lease_id()) {
            return Ok(());
        }
        if current.state == SyncState::None {
            Err(SyncError::SyncDisabled(guard.list_id().to_string()))
        } else {
            Err(SyncError::PassLeaseLost(guard.list_id().to_string()))
        }
    }

    /// Read the config, let `step` derive the next one, and store it if the
    /// revision is unchanged. Retries on concurrent writes.
    ///
    /// `step` returning `None` means no write is needed.
    async fn update<F>(&self, list_id: &str, mut step: F) -> Result<(SyncConfig, bool), SyncError>
    where
        F: FnMut(&SyncConfig) -> Result<Option<SyncConfig>, SyncError> + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.repository.get_sync_config(list_id).await?;
            let Some(next) = step(&current)? else {
                return Ok((current, false));
            };
            debug_assert!(next.is_consistent(), "inconsistent sync config: {next:?}");

            match self
                .repository
                .set_sync_config(list_id, current.revision, next)
                .await
            {
                Ok(stored) => return Ok((stored, true)),
                Err(RepositoryError::RevisionMismatch { .. }) => {
                    debug!(list_id, attempt, "Sync config changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::ConcurrentModification(list_id.to_string()))
    }
}
