//! Version history lifecycle over the file-backed store
//!
//! Exercises the branch/merge/rollback/prune surface the way an
//! application would, including persistence across a store reopen.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sync_store::{
    BodyEncoding, FileBackend, MergeStrategy, VersionStatus, VersionStore, WorkflowNode,
};
use sync_test_utils::fixtures::{edited_workflow, sample_workflow};

fn file_store(root: &std::path::Path) -> VersionStore {
    VersionStore::new(Arc::new(FileBackend::new(root).unwrap()))
}

/// Branch from the mainline tip, develop the branch, merge it back: the
/// merge appends a mainline version equal to the branch tip and closes
/// the branch without touching its history.
#[test]
fn branch_edit_merge_lands_branch_tip_on_mainline() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = file_store(dir.path());

    store
        .create_version("wf-1", &sample_workflow("wf-1", "v1"), "alice", None)
        .unwrap();
    store
        .create_version("wf-1", &sample_workflow("wf-1", "v2"), "alice", None)
        .unwrap();
    store
        .create_version("wf-1", &sample_workflow("wf-1", "v3"), "alice", None)
        .unwrap();

    let branch = store.branch("wf-1", 3, "retry handling", "bob").unwrap();
    assert!(branch.branch_id.starts_with("retry-handling-"));

    let mut draft = edited_workflow("wf-1", "v3");
    store
        .create_branch_version("wf-1", &branch.branch_id, &draft, "bob", Some("add notify"))
        .unwrap();
    draft.nodes.push(WorkflowNode::new("escalate", "task"));
    store
        .create_branch_version("wf-1", &branch.branch_id, &draft, "bob", Some("add escalate"))
        .unwrap();

    let tip = store.branch_tip("wf-1", &branch.branch_id).unwrap();
    let merged = store
        .merge("wf-1", &branch.branch_id, 3, MergeStrategy::Theirs, "bob")
        .unwrap();

    assert_eq!(merged.version, 4);
    assert_eq!(merged.status, VersionStatus::Merged);
    assert_eq!(merged.merge_from_branch.as_deref(), Some(branch.branch_id.as_str()));
    assert_eq!(merged.merge_base_version, Some(3));
    assert_eq!(store.get_version("wf-1", 4).unwrap(), tip);

    // The branch is closed but its history stays readable
    let branches = store.branches("wf-1").unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].closed);
    assert_eq!(store.branch_tip("wf-1", &branch.branch_id).unwrap(), tip);
    assert!(
        store
            .create_branch_version("wf-1", &branch.branch_id, &draft, "bob", None)
            .is_err()
    );
}

/// Rollback appends; it never rewrites. The target version stays intact
/// and the new head carries the target's payload.
#[test]
fn rollback_appends_without_rewriting_history() {
    let store = VersionStore::in_memory();
    for i in 1..=5 {
        store
            .create_version("wf-1", &sample_workflow("wf-1", &format!("rev {i}")), "alice", None)
            .unwrap();
    }

    let record = store.rollback("wf-1", 2, "alice", "rev 5 broke approvals").unwrap();
    assert_eq!(record.version, 6);
    assert_eq!(record.status, VersionStatus::Rollback);
    assert_eq!(record.rollback_from_version, Some(2));

    assert_eq!(
        store.get_version("wf-1", 6).unwrap().name.as_deref(),
        Some("rev 2")
    );
    assert_eq!(
        store.get_version("wf-1", 2).unwrap().name.as_deref(),
        Some("rev 2")
    );
    assert_eq!(store.latest_version("wf-1").unwrap(), 6);
}

/// A fresh store over the same directory serves the full history: delta
/// chains replay from disk and tags and branches survive.
#[test]
fn history_survives_store_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut last = sample_workflow("wf-1", "base");

    {
        let store = file_store(dir.path());
        for i in 1..=12 {
            last.config
                .insert(format!("step_{i}"), serde_json::json!(i));
            store
                .create_version("wf-1", &last, "alice", None)
                .unwrap();
        }
        store.add_tag("wf-1", 7, "release-1", "alice").unwrap();
        store.branch("wf-1", 12, "next", "bob").unwrap();
    }

    let reopened = file_store(dir.path());
    assert_eq!(reopened.latest_version("wf-1").unwrap(), 12);
    assert_eq!(reopened.get_version("wf-1", 12).unwrap(), last);

    // Version 7 sits mid-chain and must replay from its full base
    let v7 = reopened.get_version("wf-1", 7).unwrap();
    assert!(v7.config.contains_key("step_7"));
    assert!(!v7.config.contains_key("step_8"));

    let records = reopened.list_versions("wf-1").unwrap();
    assert!(
        records
            .iter()
            .any(|r| matches!(r.encoding, BodyEncoding::Delta { .. })),
        "incremental edits should be delta-encoded"
    );

    let tags = reopened.tags("wf-1").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].0, 7);
    assert_eq!(tags[0].1.name, "release-1");
    assert_eq!(reopened.branches("wf-1").unwrap().len(), 1);
}

/// Pruning keeps the most recent versions plus everything structurally
/// important: version 1, tagged versions and rollback markers.
#[test]
fn prune_retains_tagged_and_structural_versions() {
    let store = VersionStore::in_memory();
    for i in 1..=6 {
        store
            .create_version("wf-1", &sample_workflow("wf-1", &format!("rev {i}")), "alice", None)
            .unwrap();
    }
    store.add_tag("wf-1", 3, "stable", "alice").unwrap();
    store.rollback("wf-1", 2, "alice", "bad deploy").unwrap(); // v7

    let pruned = store.prune_old_versions("wf-1", 2).unwrap();
    assert_eq!(pruned, 3); // v2, v4, v5

    let visible: Vec<u32> = store
        .list_versions("wf-1")
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(visible, vec![1, 3, 6, 7]);

    // Pruned versions are gone; numbering continues past them
    assert!(store.get_version("wf-1", 4).is_err());
    let next = store
        .create_version("wf-1", &sample_workflow("wf-1", "rev 8"), "alice", None)
        .unwrap();
    assert_eq!(next.version, 8);
}

/// Statistics aggregate only the visible mainline history.
#[test]
fn statistics_follow_visible_history() {
    let store = VersionStore::in_memory();
    store
        .create_version("wf-1", &sample_workflow("wf-1", "a"), "alice", None)
        .unwrap();
    store
        .create_version("wf-1", &edited_workflow("wf-1", "b"), "bob", None)
        .unwrap();
    store.rollback("wf-1", 1, "alice", "revert").unwrap();

    let stats = store.statistics("wf-1").unwrap();
    assert_eq!(stats.total_versions, 3);
    assert_eq!(stats.first_version, 1);
    assert_eq!(stats.latest_version, 3);
    assert_eq!(stats.by_author["alice"], 2);
    assert_eq!(stats.by_author["bob"], 1);
    assert_eq!(stats.by_status["rollback"], 1);
    assert!(stats.storage_bytes > 0);
}
