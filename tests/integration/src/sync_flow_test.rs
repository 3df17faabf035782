//! End-to-end sync flows: detection, resolution, coordinated runs
//!
//! These tests wire the conflict registry, coordinator and mode tracker
//! together over in-memory doubles the way a deployment would.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use sync_core::{
    ConflictRegistry, ConflictStatus, CoordinatorConfig, Mode, ModeConsistencyTracker,
    ObjectType, ResolutionStrategy, SyncCoordinator, SyncItem,
};
use sync_store::VersionStore;
use sync_test_utils::fixtures::{base_time, edited_workflow, sample_workflow, side_at};
use sync_test_utils::remote::{InMemoryRemote, InMemorySource};

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        batch_delay: Duration::ZERO,
        ..CoordinatorConfig::default()
    }
}

fn item(id: &str) -> SyncItem {
    SyncItem {
        object_type: ObjectType::Workflow,
        object_id: id.to_string(),
        last_modified: Utc::now(),
    }
}

/// A renamed workflow edited in two places: the more recently updated
/// side wins under timestamp priority, and the winner lands in the store
/// as a new version on top of the existing history.
#[test]
fn name_conflict_resolved_by_timestamp_priority() {
    let store = Arc::new(VersionStore::in_memory());
    store
        .create_version("wf-1", &sample_workflow("wf-1", "Original"), "alice", None)
        .unwrap();

    let registry = ConflictRegistry::new(Arc::clone(&store));
    let local = side_at(sample_workflow("wf-1", "Local rename"), 1, 10);
    let remote = side_at(sample_workflow("wf-1", "Remote rename"), 1, 600);

    let conflict = registry
        .detect(ObjectType::Workflow, "wf-1", local, remote)
        .unwrap()
        .expect("diverged names must conflict");

    let resolved = registry
        .resolve(
            &conflict.id,
            ResolutionStrategy::TimestampPriority,
            "alice",
            None,
            None,
        )
        .unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);

    // Local was edited last, so version 2 carries the local rename
    let winner = store.get_version("wf-1", 2).unwrap();
    assert_eq!(winner.name.as_deref(), Some("Local rename"));
    // The original version is untouched
    assert_eq!(
        store.get_version("wf-1", 1).unwrap().name.as_deref(),
        Some("Original")
    );
}

/// A 25-item full sync with injected remote failures and unresolvable
/// divergences still visits every item and accounts for each one exactly
/// once.
#[test]
fn large_full_sync_accounts_for_every_item() {
    let source = InMemorySource::new();
    let remote = InMemoryRemote::new();

    for i in 0..20 {
        let id = format!("wf-{i}");
        source.insert(item(&id), side_at(sample_workflow(&id, "clean"), 1, 0));
    }
    for i in 0..3 {
        let id = format!("down-{i}");
        source.insert(item(&id), side_at(sample_workflow(&id, "x"), 1, 0));
        remote.fail_for(&id);
    }
    for i in 0..2 {
        let id = format!("split-{i}");
        source.insert(item(&id), side_at(sample_workflow(&id, "ours"), 1, 0));
        remote.insert(&id, side_at(sample_workflow(&id, "theirs"), 1, 0));
    }

    let registry = Arc::new(ConflictRegistry::new(Arc::new(VersionStore::in_memory())));
    let coordinator = SyncCoordinator::new(
        Arc::new(source),
        Arc::new(remote),
        Arc::clone(&registry),
        test_config(),
    )
    .unwrap();

    let report = coordinator.full_sync("alice").unwrap();
    assert_eq!(report.total, 25);
    assert_eq!(report.succeeded, 20);
    assert_eq!(report.failed, 3);
    assert_eq!(report.conflicts, 2);
    assert_eq!(report.succeeded + report.failed + report.conflicts, 25);
    // Conflicts alone do not fail a run; hard failures do
    assert!(!report.success);
    assert_eq!(registry.pending().unwrap().len(), 2);
}

/// Resolving, reopening and re-resolving the same conflict leaves exactly
/// one record, and every resolution appends a fresh version.
#[test]
fn resolve_reopen_resolve_keeps_single_record() {
    let store = Arc::new(VersionStore::in_memory());
    let registry = ConflictRegistry::new(Arc::clone(&store));

    let local = side_at(sample_workflow("wf-1", "local"), 2, 0);
    let remote = side_at(edited_workflow("wf-1", "remote"), 2, 30);
    let conflict = registry
        .detect(ObjectType::Workflow, "wf-1", local, remote)
        .unwrap()
        .unwrap();

    registry
        .resolve(&conflict.id, ResolutionStrategy::ServerPriority, "alice", None, None)
        .unwrap();
    let reopened = registry
        .reopen(&conflict.id, Some("server copy was stale"))
        .unwrap();
    assert_eq!(
        reopened.resolution_notes.as_deref(),
        Some("server copy was stale")
    );
    let second = registry
        .resolve(&conflict.id, ResolutionStrategy::ClientPriority, "bob", None, None)
        .unwrap();

    assert_eq!(second.status, ConflictStatus::Resolved);
    assert_eq!(second.resolved_by.as_deref(), Some("bob"));
    assert_eq!(registry.for_object("wf-1").unwrap().len(), 1);

    // Two resolutions appended two versions; the latest is the client side
    assert_eq!(store.latest_version("wf-1").unwrap(), 2);
    assert_eq!(
        store.get_version("wf-1", 2).unwrap().name.as_deref(),
        Some("local")
    );
}

/// Watermarks written by one coordinator are honored by the next: a
/// restart does not re-sync untouched items.
#[test]
fn delta_sync_watermarks_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("watermarks.toml");

    // The item keeps the same modification time across both coordinators
    let modified = Utc::now();
    let build = || {
        let source = InMemorySource::new();
        let mut synced = item("wf-1");
        synced.last_modified = modified;
        source.insert(synced, side_at(sample_workflow("wf-1", "a"), 1, 0));
        let registry = Arc::new(ConflictRegistry::new(Arc::new(VersionStore::in_memory())));
        SyncCoordinator::new(
            Arc::new(source),
            Arc::new(InMemoryRemote::new()),
            registry,
            CoordinatorConfig {
                watermark_path: Some(path.clone()),
                ..test_config()
            },
        )
        .unwrap()
    };

    let first = build().full_sync("alice").unwrap();
    assert_eq!(first.succeeded, 1);
    assert!(path.exists());

    let second = build().delta_sync("alice").unwrap();
    assert_eq!(second.total, 0, "watermarked item must not re-sync");
}

/// A client coming back online after disconnected work is told to sync,
/// and the requested run flows through the coordinator.
#[test]
fn reconnecting_client_triggers_a_sync_run() {
    let tracker = ModeConsistencyTracker::new(Mode::Mixed);
    let start = base_time();
    tracker.process_heartbeat("client-1", Mode::Disconnected, start);
    let outcome = tracker.process_heartbeat(
        "client-1",
        Mode::Connected,
        start + chrono::Duration::seconds(15),
    );
    assert!(outcome.needs_sync);

    let source = InMemorySource::new();
    source.insert(item("wf-1"), side_at(sample_workflow("wf-1", "offline edit"), 2, 0));
    let remote = Arc::new(InMemoryRemote::new());
    let registry = Arc::new(ConflictRegistry::new(Arc::new(VersionStore::in_memory())));
    let coordinator =
        SyncCoordinator::new(Arc::new(source), remote.clone(), registry, test_config()).unwrap();

    let report = coordinator.full_sync("client-1").unwrap();
    assert!(report.success);
    assert_eq!(remote.pushed().len(), 1);
    assert_eq!(remote.pushed()[0].0, "wf-1");
}
