use crate::error::SyncError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Where a list's items are synchronized from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncSource {
    /// Sync is not configured
    #[default]
    None,
    /// Imported list from an external map provider
    ExternalMapProvider,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::None => "none",
            SyncSource::ExternalMapProvider => "external-map-provider",
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncSource {
    type Err = SyncError;

    /// Parse a source name. Accepts the short alias `maps`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(SyncSource::None),
            "external-map-provider" | "maps" => Ok(SyncSource::ExternalMapProvider),
            other => Err(SyncError::InvalidSource(other.to_string())),
        }
    }
}

/// Lifecycle state of a list's synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    None,
    Pending,
    Synced,
    Conflict,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::None => "none",
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// Marker of a reconciliation pass in flight for a list.
///
/// Held from the start of a pass until its result is applied. A lease past
/// `expires_at` belongs to a pass that died and may be taken over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassLease {
    pub id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PassLease {
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Sync settings attached to a list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub source: SyncSource,
    /// Opaque identifier of the list in the external system
    pub external_id: String,
    pub state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Optimistic concurrency token, bumped by the repository on every write
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<PassLease>,
}

impl SyncConfig {
    /// A config with sync turned off
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.state != SyncState::None
    }

    /// `state == None` iff `source == None` and the external id is empty.
    pub fn is_consistent(&self) -> bool {
        match self.state {
            SyncState::None => self.source == SyncSource::None && self.external_id.is_empty(),
            _ => self.source != SyncSource::None && !self.external_id.is_empty(),
        }
    }

    /// The lease of a pass that is still considered alive
    pub fn live_pass(&self, now: DateTime<Utc>) -> Option<&PassLease> {
        self.pass.as_ref().filter(|lease| !lease.is_expired(now))
    }

    /// Whether `lease_id` is the current lease holder
    pub fn holds_pass(&self, lease_id: Uuid) -> bool {
        self.pass.as_ref().is_some_and(|lease| lease.id == lease_id)
    }
}
