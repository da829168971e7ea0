use crate::utils::{compute_json_hash, now};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Field key under which an item's name takes part in field-level diffs
pub const NAME_FIELD: &str = "name";

/// A single entry of a list (a place, a show, an activity...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Opaque revision marker assigned by whichever side produced the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: BTreeMap::new(),
            revision: None,
            modified_at: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Equal name and fields. Revision markers and timestamps are ignored.
    pub fn same_content(&self, other: &ItemRecord) -> bool {
        self.name == other.name && self.fields == other.fields
    }

    /// Value of a field, with `name` addressable as [`NAME_FIELD`]
    pub fn field_value(&self, key: &str) -> Option<Value> {
        if key == NAME_FIELD {
            Some(Value::String(self.name.clone()))
        } else {
            self.fields.get(key).cloned()
        }
    }

    /// Set or clear a field, with `name` addressable as [`NAME_FIELD`]
    pub fn set_field_value(&mut self, key: &str, value: Option<Value>) {
        if key == NAME_FIELD {
            self.name = match value {
                Some(Value::String(name)) => name,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return;
        }

        match value {
            Some(value) => {
                self.fields.insert(key.to_string(), value);
            }
            None => {
                self.fields.remove(key);
            }
        }
    }

    /// Every field key present on either record, including [`NAME_FIELD`]
    pub fn field_keys<'a>(records: impl IntoIterator<Item = &'a ItemRecord>) -> BTreeSet<String> {
        let mut keys = BTreeSet::from([NAME_FIELD.to_string()]);
        for record in records {
            keys.extend(record.fields.keys().cloned());
        }
        keys
    }
}

/// A single mutation of a list's local representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SnapshotChange {
    UpsertItem { item: ItemRecord },
    RemoveItem { item_id: String },
    SetSetting { key: String, value: Value },
    RemoveSetting { key: String },
}

/// Point-in-time capture of a list, local or remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    /// List-level settings (title, description, visibility...)
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_updated_at: Option<DateTime<Utc>>,
    #[serde(default = "now")]
    pub captured_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Snapshot {
    pub fn new(items: Vec<ItemRecord>) -> Self {
        Self {
            items,
            settings: BTreeMap::new(),
            settings_updated_at: None,
            captured_at: now(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn item(&self, id: &str) -> Option<&ItemRecord> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Items keyed by id
    pub fn item_map(&self) -> BTreeMap<&str, &ItemRecord> {
        self.items.iter().map(|item| (item.id.as_str(), item)).collect()
    }

    /// Same items (by content, order-insensitive) and same settings
    pub fn same_content(&self, other: &Snapshot) -> bool {
        if self.items.len() != other.items.len() || self.settings != other.settings {
            return false;
        }
        let theirs = other.item_map();
        self.items.iter().all(|item| {
            theirs
                .get(item.id.as_str())
                .is_some_and(|other| item.same_content(other))
        })
    }

    /// SHA-256 over the content that takes part in diffs
    pub fn content_digest(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct ContentView<'a> {
            items: BTreeMap<&'a str, (&'a str, &'a BTreeMap<String, Value>)>,
            settings: &'a BTreeMap<String, Value>,
        }

        let view = ContentView {
            items: self
                .items
                .iter()
                .map(|item| (item.id.as_str(), (item.name.as_str(), &item.fields)))
                .collect(),
            settings: &self.settings,
        };
        compute_json_hash(&view)
    }

    /// A new snapshot with `changes` applied in order.
    ///
    /// Upserts replace an existing item in place; new items are appended.
    pub fn apply(&self, changes: &[SnapshotChange]) -> Snapshot {
        let mut next = self.clone();
        for change in changes {
            match change {
                SnapshotChange::UpsertItem { item } => {
                    match next.items.iter_mut().find(|existing| existing.id == item.id) {
                        Some(existing) => *existing = item.clone(),
                        None => next.items.push(item.clone()),
                    }
                }
                SnapshotChange::RemoveItem { item_id } => {
                    next.items.retain(|existing| &existing.id != item_id);
                }
                SnapshotChange::SetSetting { key, value } => {
                    next.settings.insert(key.clone(), value.clone());
                }
                SnapshotChange::RemoveSetting { key } => {
                    next.settings.remove(key);
                }
            }
        }
        next
    }
}
