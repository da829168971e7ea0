use crate::model::{
    Conflict, ConflictKind, FieldConflict, ItemRecord, Snapshot, SnapshotChange,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

/// How one side moved away from the base snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideChange {
    Unchanged,
    Added,
    Removed,
    Updated,
}

impl SideChange {
    fn between<T>(base: Option<&T>, side: Option<&T>, same: impl Fn(&T, &T) -> bool) -> Self {
        match (base, side) {
            (None, None) => SideChange::Unchanged,
            (None, Some(_)) => SideChange::Added,
            (Some(_), None) => SideChange::Removed,
            (Some(base), Some(side)) if same(base, side) => SideChange::Unchanged,
            (Some(_), Some(_)) => SideChange::Updated,
        }
    }

    pub fn is_change(&self) -> bool {
        *self != SideChange::Unchanged
    }
}

/// Classification of a change to one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    AddedRemote,
    AddedLocal,
    RemovedRemote,
    RemovedLocal,
    UpdatedRemote,
    UpdatedLocal,
    /// Both sides changed the key (edits, or add/remove clashes)
    UpdatedBoth,
}

fn classify(local: SideChange, remote: SideChange) -> ChangeKind {
    match (local, remote) {
        (SideChange::Unchanged, SideChange::Added) => ChangeKind::AddedRemote,
        (SideChange::Unchanged, SideChange::Removed) => ChangeKind::RemovedRemote,
        (SideChange::Unchanged, _) => ChangeKind::UpdatedRemote,
        (SideChange::Added, SideChange::Unchanged) => ChangeKind::AddedLocal,
        (SideChange::Removed, SideChange::Unchanged) => ChangeKind::RemovedLocal,
        (_, SideChange::Unchanged) => ChangeKind::UpdatedLocal,
        _ => ChangeKind::UpdatedBoth,
    }
}

/// Change to one item, with its three versions
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    pub item_id: String,
    pub local_change: SideChange,
    pub remote_change: SideChange,
    pub base: Option<ItemRecord>,
    pub local: Option<ItemRecord>,
    pub remote: Option<ItemRecord>,
}

impl ItemChange {
    pub fn kind(&self) -> ChangeKind {
        classify(self.local_change, self.remote_change)
    }

    pub fn is_remote_only(&self) -> bool {
        self.remote_change.is_change() && !self.local_change.is_change()
    }

    pub fn is_local_only(&self) -> bool {
        self.local_change.is_change() && !self.remote_change.is_change()
    }

    /// Both sides changed the item and ended up different
    pub fn is_conflicting(&self) -> bool {
        let both = self.local_change.is_change() && self.remote_change.is_change();
        let converged = match (&self.local, &self.remote) {
            (None, None) => true,
            (Some(local), Some(remote)) => local.same_content(remote),
            _ => false,
        };
        both && !converged
    }

    fn to_conflict(&self, list_id: &str) -> Conflict {
        let kind = match (&self.local, &self.remote) {
            (Some(local), Some(remote))
                if self.local_change == SideChange::Updated
                    && self.remote_change == SideChange::Updated =>
            {
                ConflictKind::ItemUpdate {
                    item_id: self.item_id.clone(),
                    base: self.base.clone(),
                    local: local.clone(),
                    remote: remote.clone(),
                    fields: field_conflicts(self.base.as_ref(), local, remote),
                }
            }
            _ => ConflictKind::StructureChange {
                item_id: self.item_id.clone(),
                base: self.base.clone(),
                local: self.local.clone(),
                remote: self.remote.clone(),
            },
        };

        Conflict::new(
            list_id,
            kind,
            self.local.as_ref().and_then(|item| item.modified_at),
            self.remote.as_ref().and_then(|item| item.modified_at),
        )
    }
}

/// Change to one list-level setting
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub local_change: SideChange,
    pub remote_change: SideChange,
    pub base: Option<Value>,
    pub local: Option<Value>,
    pub remote: Option<Value>,
}

impl SettingChange {
    pub fn kind(&self) -> ChangeKind {
        classify(self.local_change, self.remote_change)
    }

    pub fn is_remote_only(&self) -> bool {
        self.remote_change.is_change() && !self.local_change.is_change()
    }

    pub fn is_local_only(&self) -> bool {
        self.local_change.is_change() && !self.remote_change.is_change()
    }

    pub fn is_conflicting(&self) -> bool {
        self.local_change.is_change() && self.remote_change.is_change() && self.local != self.remote
    }
}

/// Three-way diff of a list between the base, local and remote snapshots.
///
/// Only keys that changed on at least one side are listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub items: Vec<ItemChange>,
    pub settings: Vec<SettingChange>,
    pub local_settings_updated_at: Option<DateTime<Utc>>,
    pub remote_settings_updated_at: Option<DateTime<Utc>>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.settings.is_empty()
    }

    /// Remote-only changes, as mutations of the local snapshot
    pub fn local_updates(&self) -> Vec<SnapshotChange> {
        let items = self
            .items
            .iter()
            .filter(|change| change.is_remote_only())
            .map(|change| match &change.remote {
                Some(item) => SnapshotChange::UpsertItem { item: item.clone() },
                None => SnapshotChange::RemoveItem {
                    item_id: change.item_id.clone(),
                },
            });

        let settings = self
            .settings
            .iter()
            .filter(|change| change.is_remote_only())
            .map(|change| match &change.remote {
                Some(value) => SnapshotChange::SetSetting {
                    key: change.key.clone(),
                    value: value.clone(),
                },
                None => SnapshotChange::RemoveSetting {
                    key: change.key.clone(),
                },
            });

        items.chain(settings).collect()
    }

    /// Whether the local side holds changes the remote has not seen
    pub fn has_local_only_changes(&self) -> bool {
        self.items.iter().any(ItemChange::is_local_only)
            || self.settings.iter().any(SettingChange::is_local_only)
    }

    /// One conflict per overlapping change that did not converge
    pub fn conflicts(&self, list_id: &str) -> Vec<Conflict> {
        let items = self
            .items
            .iter()
            .filter(|change| change.is_conflicting())
            .map(|change| change.to_conflict(list_id));

        let settings = self
            .settings
            .iter()
            .filter(|change| change.is_conflicting())
            .map(|change| {
                Conflict::new(
                    list_id,
                    ConflictKind::SettingsChange {
                        key: change.key.clone(),
                        base: change.base.clone(),
                        local: change.local.clone(),
                        remote: change.remote.clone(),
                    },
                    self.local_settings_updated_at,
                    self.remote_settings_updated_at,
                )
            });

        items.chain(settings).collect()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.items.iter().filter(|c| c.kind() == kind).count()
            + self.settings.iter().filter(|c| c.kind() == kind).count()
    }
}

/// Diff `local` and `remote` against their common `base`
pub fn build_change_set(base: &Snapshot, local: &Snapshot, remote: &Snapshot) -> ChangeSet {
    let base_items = base.item_map();
    let local_items = local.item_map();
    let remote_items = remote.item_map();

    let item_ids: BTreeSet<&str> = base_items
        .keys()
        .chain(local_items.keys())
        .chain(remote_items.keys())
        .copied()
        .collect();

    let items = item_ids
        .into_iter()
        .filter_map(|id| {
            let base = base_items.get(id).copied();
            let local = local_items.get(id).copied();
            let remote = remote_items.get(id).copied();
            let same = |a: &&ItemRecord, b: &&ItemRecord| a.same_content(b);

            let local_change = SideChange::between(base.as_ref(), local.as_ref(), same);
            let remote_change = SideChange::between(base.as_ref(), remote.as_ref(), same);
            if !local_change.is_change() && !remote_change.is_change() {
                return None;
            }

            Some(ItemChange {
                item_id: id.to_string(),
                local_change,
                remote_change,
                base: base.cloned(),
                local: local.cloned(),
                remote: remote.cloned(),
            })
        })
        .collect();

    let setting_keys: BTreeSet<&String> = base
        .settings
        .keys()
        .chain(local.settings.keys())
        .chain(remote.settings.keys())
        .collect();

    let settings = setting_keys
        .into_iter()
        .filter_map(|key| {
            let base_value = base.settings.get(key);
            let local_value = local.settings.get(key);
            let remote_value = remote.settings.get(key);
            let same = |a: &Value, b: &Value| a == b;

            let local_change = SideChange::between(base_value, local_value, same);
            let remote_change = SideChange::between(base_value, remote_value, same);
            if !local_change.is_change() && !remote_change.is_change() {
                return None;
            }

            Some(SettingChange {
                key: key.clone(),
                local_change,
                remote_change,
                base: base_value.cloned(),
                local: local_value.cloned(),
                remote: remote_value.cloned(),
            })
        })
        .collect();

    ChangeSet {
        items,
        settings,
        local_settings_updated_at: local.settings_updated_at,
        remote_settings_updated_at: remote.settings_updated_at,
    }
}

/// Fields whose local and remote values differ
fn field_conflicts(
    base: Option<&ItemRecord>,
    local: &ItemRecord,
    remote: &ItemRecord,
) -> Vec<FieldConflict> {
    ItemRecord::field_keys(base.into_iter().chain([local, remote]))
        .into_iter()
        .filter_map(|field| {
            let local_value = local.field_value(&field);
            let remote_value = remote.field_value(&field);
            if local_value == remote_value {
                return None;
            }
            Some(FieldConflict {
                base: base.and_then(|item| item.field_value(&field)),
                local: local_value,
                remote: remote_value,
                field,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConflictType;
    use serde_json::json;

    fn item(id: &str, name: &str) -> ItemRecord {
        ItemRecord::new(id, name)
    }

    #[test]
    fn test_identical_snapshots_produce_no_changes() {
        let snapshot = Snapshot::new(vec![item("1", "Cafe")]);
        let changes = build_change_set(&snapshot, &snapshot, &snapshot);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_one_sided_changes_are_classified() {
        let base = Snapshot::new(vec![item("1", "Cafe"), item("2", "Park"), item("3", "Pier")]);
        let local = Snapshot::new(vec![item("1", "Cafe Local"), item("2", "Park"), item("3", "Pier"), item("4", "Zoo")]);
        let remote = Snapshot::new(vec![item("1", "Cafe"), item("3", "Pier Remote"), item("5", "Museum")]);

        let changes = build_change_set(&base, &local, &remote);

        assert_eq!(changes.count(ChangeKind::UpdatedLocal), 1);
        assert_eq!(changes.count(ChangeKind::AddedLocal), 1);
        assert_eq!(changes.count(ChangeKind::RemovedRemote), 1);
        assert_eq!(changes.count(ChangeKind::UpdatedRemote), 1);
        assert_eq!(changes.count(ChangeKind::AddedRemote), 1);
        assert!(changes.conflicts("L1").is_empty());
        assert!(changes.has_local_only_changes());

        let updates = changes.local_updates();
        assert_eq!(updates.len(), 3);
        assert!(updates.contains(&SnapshotChange::RemoveItem {
            item_id: "2".to_string()
        }));
    }

    #[test]
    fn test_both_sides_renaming_item_conflicts() {
        let base = Snapshot::new(vec![item("item1", "Cafe")]);
        let local = Snapshot::new(vec![item("item1", "Cafe Local")]);
        let remote = Snapshot::new(vec![item("item1", "Cafe Remote")]);

        let changes = build_change_set(&base, &local, &remote);
        let conflicts = changes.conflicts("L1");

        assert_eq!(changes.count(ChangeKind::UpdatedBoth), 1);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type(), ConflictType::ItemUpdate);
        match &conflicts[0].kind {
            ConflictKind::ItemUpdate { fields, .. } => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "name");
                assert!(fields[0].local_touched() && fields[0].remote_touched());
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(changes.local_updates().is_empty());
    }

    #[test]
    fn test_identical_edits_converge() {
        let base = Snapshot::new(vec![item("1", "Cafe")]);
        let edited = Snapshot::new(vec![item("1", "Cafe New")]);

        let changes = build_change_set(&base, &edited, &edited);
        assert_eq!(changes.count(ChangeKind::UpdatedBoth), 1);
        assert!(changes.conflicts("L1").is_empty());
        assert!(changes.local_updates().is_empty());
        assert!(!changes.has_local_only_changes());
    }

    #[test]
    fn test_edit_versus_removal_is_structure_change() {
        let base = Snapshot::new(vec![item("1", "Cafe")]);
        let local = Snapshot::new(vec![item("1", "Cafe Local")]);
        let remote = Snapshot::new(vec![]);

        let conflicts = build_change_set(&base, &local, &remote).conflicts("L1");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type(), ConflictType::StructureChange);
    }

    #[test]
    fn test_both_adding_same_key_differently_is_structure_change() {
        let base = Snapshot::default();
        let local = Snapshot::new(vec![item("1", "Cafe")]);
        let remote = Snapshot::new(vec![item("1", "Bakery")]);

        let conflicts = build_change_set(&base, &local, &remote).conflicts("L1");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type(), ConflictType::StructureChange);
    }

    #[test]
    fn test_both_removing_converges() {
        let base = Snapshot::new(vec![item("1", "Cafe")]);
        let empty = Snapshot::default();

        let changes = build_change_set(&base, &empty, &empty);
        assert!(changes.conflicts("L1").is_empty());
        assert!(changes.local_updates().is_empty());
    }

    #[test]
    fn test_settings_conflict() {
        let base = Snapshot::default().with_setting("title", json!("Trips"));
        let local = Snapshot::default().with_setting("title", json!("Summer"));
        let remote = Snapshot::default()
            .with_setting("title", json!("Road"))
            .with_setting("public", json!(true));

        let changes = build_change_set(&base, &local, &remote);
        let conflicts = changes.conflicts("L1");

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type(), ConflictType::SettingsChange);
        assert_eq!(
            changes.local_updates(),
            vec![SnapshotChange::SetSetting {
                key: "public".to_string(),
                value: json!(true)
            }]
        );
    }

    #[test]
    fn test_field_conflicts_cover_one_sided_field_edits() {
        let base = item("1", "Cafe").with_field("rating", json!(3));
        let local = item("1", "Cafe Local").with_field("rating", json!(3));
        let remote = item("1", "Cafe Remote").with_field("rating", json!(5));

        let fields = field_conflicts(Some(&base), &local, &remote);
        assert_eq!(fields.len(), 2);

        let rating = fields.iter().find(|f| f.field == "rating").unwrap();
        assert!(!rating.local_touched());
        assert!(rating.remote_touched());
    }
}
