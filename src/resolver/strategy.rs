use crate::error::SyncError;
use crate::model::{
    Conflict, ConflictKind, ConflictPayload, ConflictSide, ItemRecord, ResolutionStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Manual choice for a single conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    UseLocal,
    UseRemote,
    /// Caller-supplied value: an item record (or `null` to remove the item)
    /// for item conflicts, any JSON value for settings (`null` removes it)
    Merged(Value),
}

impl Decision {
    /// Payload and recorded strategy for resolving `conflict` this way
    pub fn payload_for(
        &self,
        conflict: &Conflict,
    ) -> Result<(ConflictPayload, ResolutionStrategy), SyncError> {
        match self {
            Decision::UseLocal => Ok((
                conflict.payload(ConflictSide::Local),
                ResolutionStrategy::UseLocal,
            )),
            Decision::UseRemote => Ok((
                conflict.payload(ConflictSide::Remote),
                ResolutionStrategy::UseRemote,
            )),
            Decision::Merged(value) => {
                Ok((merged_payload(conflict, value)?, ResolutionStrategy::Merged))
            }
        }
    }
}

/// Strategy applied to every open conflict of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoResolveStrategy {
    LastWriteWins,
    SourcePriority,
    LocalPriority,
    MergeFields,
}

impl AutoResolveStrategy {
    pub fn resolution_strategy(&self) -> ResolutionStrategy {
        match self {
            AutoResolveStrategy::LastWriteWins => ResolutionStrategy::LastWriteWins,
            AutoResolveStrategy::SourcePriority => ResolutionStrategy::SourcePriority,
            AutoResolveStrategy::LocalPriority => ResolutionStrategy::LocalPriority,
            AutoResolveStrategy::MergeFields => ResolutionStrategy::MergeFields,
        }
    }

    /// Payload this strategy picks for `conflict`
    pub fn decide(&self, conflict: &Conflict) -> ConflictPayload {
        match self {
            AutoResolveStrategy::LastWriteWins => conflict.payload(last_writer(
                conflict.local_modified_at,
                conflict.remote_modified_at,
            )),
            AutoResolveStrategy::SourcePriority => conflict.payload(ConflictSide::Remote),
            AutoResolveStrategy::LocalPriority => conflict.payload(ConflictSide::Local),
            AutoResolveStrategy::MergeFields => merge_fields(conflict),
        }
    }
}

impl fmt::Display for AutoResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolution_strategy())
    }
}

impl FromStr for AutoResolveStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "lastwritewins" | "lww" => Ok(AutoResolveStrategy::LastWriteWins),
            "sourcepriority" | "remote" => Ok(AutoResolveStrategy::SourcePriority),
            "localpriority" | "local" => Ok(AutoResolveStrategy::LocalPriority),
            "mergefields" => Ok(AutoResolveStrategy::MergeFields),
            _ => Err(format!("unknown auto-resolve strategy: {s}")),
        }
    }
}

/// Later modification wins. Remote wins ties and the case where neither side
/// carries a timestamp; a lone timestamp wins over a missing one.
pub fn last_writer(
    local: Option<DateTime<Utc>>,
    remote: Option<DateTime<Utc>>,
) -> ConflictSide {
    match (local, remote) {
        (Some(local), Some(remote)) if local > remote => ConflictSide::Local,
        (Some(_), None) => ConflictSide::Local,
        _ => ConflictSide::Remote,
    }
}

/// Field-level merge of an item update; other kinds use last-write-wins
fn merge_fields(conflict: &Conflict) -> ConflictPayload {
    let ConflictKind::ItemUpdate {
        item_id,
        local,
        remote,
        fields,
        ..
    } = &conflict.kind
    else {
        return conflict.payload(last_writer(
            conflict.local_modified_at,
            conflict.remote_modified_at,
        ));
    };

    let overlap_winner = last_writer(conflict.local_modified_at, conflict.remote_modified_at);
    let mut merged = remote.clone();

    for field in fields {
        let take_local = match (field.local_touched(), field.remote_touched()) {
            (true, false) => true,
            (true, true) => overlap_winner == ConflictSide::Local,
            _ => false,
        };
        if take_local {
            merged.set_field_value(&field.field, field.local.clone());
        }
    }
    merged.modified_at = local.modified_at.max(remote.modified_at);

    ConflictPayload::Item {
        item_id: item_id.clone(),
        record: Some(merged),
    }
}

fn merged_payload(conflict: &Conflict, value: &Value) -> Result<ConflictPayload, SyncError> {
    match &conflict.kind {
        ConflictKind::ItemUpdate { item_id, .. } => {
            let record = parse_record(item_id, value)?
                .ok_or_else(|| SyncError::InvalidMergePayload(
                    "an item update must resolve to an item record".to_string(),
                ))?;
            Ok(ConflictPayload::Item {
                item_id: item_id.clone(),
                record: Some(record),
            })
        }
        ConflictKind::StructureChange { item_id, .. } => Ok(ConflictPayload::Item {
            item_id: item_id.clone(),
            record: parse_record(item_id, value)?,
        }),
        ConflictKind::SettingsChange { key, .. } => Ok(ConflictPayload::Setting {
            key: key.clone(),
            value: (!value.is_null()).then(|| value.clone()),
        }),
    }
}

fn parse_record(item_id: &str, value: &Value) -> Result<Option<ItemRecord>, SyncError> {
    if value.is_null() {
        return Ok(None);
    }
    let record: ItemRecord = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::InvalidMergePayload(e.to_string()))?;
    if record.id != item_id {
        return Err(SyncError::InvalidMergePayload(format!(
            "record id {} does not match conflicting item {}",
            record.id, item_id
        )));
    }
    Ok(Some(record))
}
