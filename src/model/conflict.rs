use super::snapshot::{ItemRecord, SnapshotChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Flat conflict category, for filtering and display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictType {
    ItemUpdate,
    StructureChange,
    SettingsChange,
}

/// One field whose value differs between the local and remote item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: String,
    pub base: Option<Value>,
    pub local: Option<Value>,
    pub remote: Option<Value>,
}

impl FieldConflict {
    pub fn local_touched(&self) -> bool {
        self.local != self.base
    }

    pub fn remote_touched(&self) -> bool {
        self.remote != self.base
    }
}

/// What conflicted, with the payload shape each kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConflictKind {
    /// The same item was edited on both sides with different results
    #[serde(rename_all = "camelCase")]
    ItemUpdate {
        item_id: String,
        base: Option<ItemRecord>,
        local: ItemRecord,
        remote: ItemRecord,
        fields: Vec<FieldConflict>,
    },
    /// Sides disagree on whether the item exists (add/remove clashes)
    #[serde(rename_all = "camelCase")]
    StructureChange {
        item_id: String,
        base: Option<ItemRecord>,
        local: Option<ItemRecord>,
        remote: Option<ItemRecord>,
    },
    /// A list-level setting was changed differently on both sides
    #[serde(rename_all = "camelCase")]
    SettingsChange {
        key: String,
        base: Option<Value>,
        local: Option<Value>,
        remote: Option<Value>,
    },
}

impl ConflictKind {
    pub fn conflict_type(&self) -> ConflictType {
        match self {
            ConflictKind::ItemUpdate { .. } => ConflictType::ItemUpdate,
            ConflictKind::StructureChange { .. } => ConflictType::StructureChange,
            ConflictKind::SettingsChange { .. } => ConflictType::SettingsChange,
        }
    }

    /// Item key, absent for list-level conflicts
    pub fn item_id(&self) -> Option<&str> {
        match self {
            ConflictKind::ItemUpdate { item_id, .. }
            | ConflictKind::StructureChange { item_id, .. } => Some(item_id),
            ConflictKind::SettingsChange { .. } => None,
        }
    }
}

/// Which side of a conflict to take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictSide {
    Local,
    Remote,
}

/// The value written to the local snapshot when a conflict is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum ConflictPayload {
    /// `record: None` removes the item
    #[serde(rename_all = "camelCase")]
    Item {
        item_id: String,
        record: Option<ItemRecord>,
    },
    /// `value: None` removes the setting
    Setting { key: String, value: Option<Value> },
}

impl ConflictPayload {
    pub fn to_change(&self) -> SnapshotChange {
        match self {
            ConflictPayload::Item {
                record: Some(record),
                ..
            } => SnapshotChange::UpsertItem {
                item: record.clone(),
            },
            ConflictPayload::Item {
                item_id,
                record: None,
            } => SnapshotChange::RemoveItem {
                item_id: item_id.clone(),
            },
            ConflictPayload::Setting {
                key,
                value: Some(value),
            } => SnapshotChange::SetSetting {
                key: key.clone(),
                value: value.clone(),
            },
            ConflictPayload::Setting { key, value: None } => {
                SnapshotChange::RemoveSetting { key: key.clone() }
            }
        }
    }

    /// JSON view of the payload's data (`null` for removals)
    pub fn data(&self) -> Value {
        match self {
            ConflictPayload::Item { record, .. } => record
                .as_ref()
                .and_then(|record| serde_json::to_value(record).ok())
                .unwrap_or(Value::Null),
            ConflictPayload::Setting { value, .. } => value.clone().unwrap_or(Value::Null),
        }
    }
}

/// How a conflict ended up resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStrategy {
    UseLocal,
    UseRemote,
    Merged,
    LastWriteWins,
    SourcePriority,
    LocalPriority,
    MergeFields,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::UseLocal => "use_local",
            ResolutionStrategy::UseRemote => "use_remote",
            ResolutionStrategy::Merged => "merged",
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::SourcePriority => "source_priority",
            ResolutionStrategy::LocalPriority => "local_priority",
            ResolutionStrategy::MergeFields => "merge_fields",
        };
        f.write_str(name)
    }
}

/// Persisted record of an overlapping change that could not be merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: Uuid,
    pub list_id: String,
    pub kind: ConflictKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<ResolutionStrategy>,
    /// Payload written to the local snapshot on resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictPayload>,
    /// Cleared when sync is disabled for the list
    pub active: bool,
    pub local_modified_at: Option<DateTime<Utc>>,
    pub remote_modified_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn new(
        list_id: impl Into<String>,
        kind: ConflictKind,
        local_modified_at: Option<DateTime<Utc>>,
        remote_modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            list_id: list_id.into(),
            kind,
            created_at: Utc::now(),
            resolved_at: None,
            resolution_strategy: None,
            resolution: None,
            active: true,
            local_modified_at,
            remote_modified_at,
        }
    }

    pub fn conflict_type(&self) -> ConflictType {
        self.kind.conflict_type()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.kind.item_id()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Active and not yet resolved
    pub fn is_open(&self) -> bool {
        self.active && !self.is_resolved()
    }

    /// The payload that taking `side` would write
    pub fn payload(&self, side: ConflictSide) -> ConflictPayload {
        match &self.kind {
            ConflictKind::ItemUpdate {
                item_id,
                local,
                remote,
                ..
            } => ConflictPayload::Item {
                item_id: item_id.clone(),
                record: Some(match side {
                    ConflictSide::Local => local.clone(),
                    ConflictSide::Remote => remote.clone(),
                }),
            },
            ConflictKind::StructureChange {
                item_id,
                local,
                remote,
                ..
            } => ConflictPayload::Item {
                item_id: item_id.clone(),
                record: match side {
                    ConflictSide::Local => local.clone(),
                    ConflictSide::Remote => remote.clone(),
                },
            },
            ConflictKind::SettingsChange {
                key, local, remote, ..
            } => ConflictPayload::Setting {
                key: key.clone(),
                value: match side {
                    ConflictSide::Local => local.clone(),
                    ConflictSide::Remote => remote.clone(),
                },
            },
        }
    }

    pub fn local_data(&self) -> Value {
        self.payload(ConflictSide::Local).data()
    }

    pub fn remote_data(&self) -> Value {
        self.payload(ConflictSide::Remote).data()
    }
}
