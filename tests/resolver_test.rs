mod common;

use chrono::{DateTime, Duration, Utc};
use common::{item, snapshot, FlakyRepository, Harness};
use listsync::model::{ConflictType, ResolutionStrategy, Snapshot, SyncState};
use listsync::repository::{InMemoryRepository, SyncRepository};
use listsync::resolver::{AutoResolveStrategy, Decision};
use listsync::{ErrorClass, SyncError};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn hours_from(start: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    start + Duration::hours(hours)
}

/// Synced list of `items`, then both sides rename every item
async fn conflicted_list(harness: &Harness, list_id: &str, items: &[&str]) -> Vec<Uuid> {
    let pairs: Vec<(&str, &str)> = items.iter().map(|id| (*id, "Original")).collect();
    harness.synced_list(list_id, snapshot(&pairs)).await;

    for id in items {
        harness.edit_local(list_id, id, &format!("{id} local")).await;
        harness.edit_remote(id, &format!("{id} remote"));
    }

    let result = harness.reconciler.run_sync(list_id).await.unwrap();
    assert_eq!(result.state, SyncState::Conflict);
    assert_eq!(result.conflicts.len(), items.len());
    result.conflicts
}

#[tokio::test]
async fn test_use_local_leaves_list_pending() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    let resolved = harness
        .resolver
        .resolve(ids[0], Decision::UseLocal)
        .await
        .unwrap();

    assert!(resolved.is_resolved());
    assert_eq!(resolved.resolution_strategy, Some(ResolutionStrategy::UseLocal));
    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("item1 local"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);
}

#[tokio::test]
async fn test_use_remote_leaves_list_synced() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    harness
        .resolver
        .resolve(ids[0], Decision::UseRemote)
        .await
        .unwrap();

    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("item1 remote"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_list_stays_in_conflict_until_last_resolution() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1", "item2"]).await;

    harness
        .resolver
        .resolve(ids[0], Decision::UseRemote)
        .await
        .unwrap();
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Conflict);

    harness
        .resolver
        .resolve(ids[1], Decision::UseRemote)
        .await
        .unwrap();
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_resolving_twice_fails_without_touching_resolved_at() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    let first = harness
        .resolver
        .resolve(ids[0], Decision::UseLocal)
        .await
        .unwrap();

    let err = harness
        .resolver
        .resolve(ids[0], Decision::UseRemote)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyResolved(id) if id == ids[0]));

    let stored = harness.repository.get_conflict(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.resolved_at, first.resolved_at);
    assert_eq!(stored.resolution_strategy, Some(ResolutionStrategy::UseLocal));
    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("item1 local"));
}

#[tokio::test]
async fn test_unknown_and_inactive_conflicts_are_not_found() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    let unknown = Uuid::new_v4();
    let err = harness
        .resolver
        .resolve(unknown, Decision::UseLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConflictNotFound(id) if id == unknown));

    harness.state_machine.disable("L1").await.unwrap();
    let err = harness
        .resolver
        .resolve(ids[0], Decision::UseLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConflictNotFound(_)));
}

#[tokio::test]
async fn test_merged_payload() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    let err = harness
        .resolver
        .resolve(ids[0], Decision::Merged(json!({"id": "item9", "name": "Wrong"})))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidMergePayload(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);

    let resolved = harness
        .resolver
        .resolve(
            ids[0],
            Decision::Merged(json!({"id": "item1", "name": "Cafe both"})),
        )
        .await
        .unwrap();

    assert_eq!(resolved.resolution_strategy, Some(ResolutionStrategy::Merged));
    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("Cafe both"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);
}

#[tokio::test]
async fn test_source_priority_takes_remote_values() {
    let harness = Harness::new();
    let ids = conflicted_list(&harness, "L1", &["item1", "item2", "item3"]).await;

    let open = harness.repository.get_open_conflicts("L1").await.unwrap();
    assert!(open
        .iter()
        .all(|c| c.conflict_type() == ConflictType::ItemUpdate));

    let mut resolved = harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::SourcePriority)
        .await
        .unwrap();
    resolved.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(resolved, expected);

    for id in ["item1", "item2", "item3"] {
        assert_eq!(
            harness.local_name("L1", id).await,
            Some(format!("{id} remote"))
        );
    }
    assert!(harness.repository.get_open_conflicts("L1").await.unwrap().is_empty());
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_local_priority_then_resync_pushes_resolution() {
    let harness = Harness::new();
    conflicted_list(&harness, "L1", &["item1"]).await;

    harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::LocalPriority)
        .await
        .unwrap();
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);

    let result = harness.reconciler.run_sync("L1").await.unwrap();
    assert_eq!(result.state, SyncState::Synced);
    assert!(result.pushed);
    assert_eq!(
        harness.source.remote(common::EXTERNAL_ID).unwrap().item("item1").unwrap().name,
        "item1 local"
    );
}

#[tokio::test]
async fn test_partial_auto_resolve_reports_each_conflict() {
    let memory = Arc::new(InMemoryRepository::new());
    let flaky = Arc::new(FlakyRepository::new(memory.clone()));
    let harness = Harness::with_repository(memory, flaky.clone());
    let ids = conflicted_list(&harness, "L1", &["item1", "item2"]).await;

    flaky.fail_resolution_of(ids[1]);
    let err = harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::SourcePriority)
        .await
        .unwrap_err();

    match &err {
        SyncError::PartialResolution { succeeded, failed } => {
            assert_eq!(succeeded, &vec![ids[0]]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, ids[1]);
        }
        other => panic!("expected partial resolution, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::Partial);
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Conflict);
    assert!(harness.repository.get_conflict(ids[0]).await.unwrap().unwrap().is_resolved());

    flaky.heal();
    let resolved = harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::SourcePriority)
        .await
        .unwrap();
    assert_eq!(resolved, vec![ids[1]]);
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_failed_resolution_write_keeps_conflict_open() {
    let memory = Arc::new(InMemoryRepository::new());
    let flaky = Arc::new(FlakyRepository::new(memory.clone()));
    let harness = Harness::with_repository(memory, flaky.clone());
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    flaky.fail_snapshot_writes();
    let err = harness
        .resolver
        .resolve(ids[0], Decision::UseRemote)
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Storage);

    let stored = harness.repository.get_conflict(ids[0]).await.unwrap().unwrap();
    assert!(!stored.is_resolved());
    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("item1 local"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Conflict);

    flaky.heal();
    harness
        .resolver
        .resolve(ids[0], Decision::UseRemote)
        .await
        .unwrap();
    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("item1 remote"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_failed_auto_resolve_write_can_be_retried() {
    let memory = Arc::new(InMemoryRepository::new());
    let flaky = Arc::new(FlakyRepository::new(memory.clone()));
    let harness = Harness::with_repository(memory, flaky.clone());
    let ids = conflicted_list(&harness, "L1", &["item1"]).await;

    flaky.fail_snapshot_writes();
    let err = harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::LocalPriority)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PartialResolution { ref succeeded, .. } if succeeded.is_empty()));
    assert_eq!(harness.repository.get_open_conflicts("L1").await.unwrap().len(), 1);

    flaky.heal();
    let resolved = harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::LocalPriority)
        .await
        .unwrap();
    assert_eq!(resolved, ids);
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);
}

#[tokio::test]
async fn test_last_write_wins_keeps_later_local_edit() {
    let harness = Harness::new();
    let start = Utc::now();
    harness.synced_list("L1", snapshot(&[("item1", "Cafe")])).await;
    harness
        .put_local("L1", item("item1", "Cafe Local").with_modified_at(hours_from(start, 2)))
        .await;
    harness.put_remote(item("item1", "Cafe Remote").with_modified_at(hours_from(start, 1)));

    let result = harness.reconciler.run_sync("L1").await.unwrap();
    let conflict = harness
        .repository
        .get_conflict(result.conflicts[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conflict.local_modified_at, Some(hours_from(start, 2)));
    assert_eq!(conflict.remote_modified_at, Some(hours_from(start, 1)));

    harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::LastWriteWins)
        .await
        .unwrap();

    assert_eq!(harness.local_name("L1", "item1").await.as_deref(), Some("Cafe Local"));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);

    let stored = harness.repository.get_conflict(conflict.id).await.unwrap().unwrap();
    assert_eq!(stored.resolution_strategy, Some(ResolutionStrategy::LastWriteWins));
}

#[tokio::test]
async fn test_last_write_wins_takes_later_remote_edit() {
    let harness = Harness::new();
    let start = Utc::now();
    harness.synced_list("L1", snapshot(&[("item1", "Cafe")])).await;
    harness
        .put_local("L1", item("item1", "Cafe Local").with_modified_at(hours_from(start, 1)))
        .await;
    harness.put_remote(item("item1", "Cafe Remote").with_modified_at(hours_from(start, 3)));
    harness.reconciler.run_sync("L1").await.unwrap();

    harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::LastWriteWins)
        .await
        .unwrap();

    let local = harness.local_item("L1", "item1").await.unwrap();
    assert_eq!(local.name, "Cafe Remote");
    assert_eq!(local.modified_at, Some(hours_from(start, 3)));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Synced);
}

#[tokio::test]
async fn test_merge_fields_combines_both_edits() {
    let harness = Harness::new();
    let start = Utc::now();
    let original = item("item1", "Cafe").with_field("note", json!("quiet"));
    harness
        .synced_list("L1", Snapshot::new(vec![original.clone()]))
        .await;

    // Both renamed, only the remote touched the note; the local rename is later
    let mut local = original.clone().with_modified_at(hours_from(start, 2));
    local.name = "Cafe Local".to_string();
    harness.put_local("L1", local).await;

    let mut remote = original
        .with_field("note", json!("busy"))
        .with_modified_at(hours_from(start, 1));
    remote.name = "Cafe Remote".to_string();
    harness.put_remote(remote);

    let result = harness.reconciler.run_sync("L1").await.unwrap();
    assert_eq!(result.conflicts.len(), 1);

    harness
        .resolver
        .auto_resolve("L1", AutoResolveStrategy::MergeFields)
        .await
        .unwrap();

    let merged = harness.local_item("L1", "item1").await.unwrap();
    assert_eq!(merged.name, "Cafe Local");
    assert_eq!(merged.fields.get("note"), Some(&json!("busy")));
    assert_eq!(merged.modified_at, Some(hours_from(start, 2)));
    assert_eq!(harness.state_machine.state("L1").await.unwrap(), SyncState::Pending);

    let result = harness.reconciler.run_sync("L1").await.unwrap();
    assert_eq!(result.state, SyncState::Synced);
    assert!(result.pushed);
    let pushed = harness.source.remote(common::EXTERNAL_ID).unwrap();
    assert_eq!(pushed.item("item1").unwrap().name, "Cafe Local");
    assert_eq!(pushed.item("item1").unwrap().fields.get("note"), Some(&json!("busy")));
}
