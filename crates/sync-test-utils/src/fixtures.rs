//! Canned workflow snapshots and side states

use chrono::{DateTime, Duration, Utc};
use sync_core::SideState;
use sync_store::{WorkflowConnection, WorkflowNode, WorkflowSnapshot};

/// A small but non-trivial workflow: two nodes joined by one connection
pub fn sample_workflow(id: &str, name: &str) -> WorkflowSnapshot {
    let mut snapshot = WorkflowSnapshot::new(id).with_name(name);
    snapshot.nodes.push(WorkflowNode::new("start", "task"));
    snapshot.nodes.push(WorkflowNode::new("approve", "gateway"));
    snapshot
        .connections
        .push(WorkflowConnection::new("c1", "start", "approve"));
    snapshot
        .config
        .insert("timeout".to_string(), serde_json::json!(30));
    snapshot
}

/// The sample workflow with one extra node, as a "later edit"
pub fn edited_workflow(id: &str, name: &str) -> WorkflowSnapshot {
    let mut snapshot = sample_workflow(id, name);
    snapshot.nodes.push(WorkflowNode::new("notify", "task"));
    snapshot
        .connections
        .push(WorkflowConnection::new("c2", "approve", "notify"));
    snapshot
}

/// Wrap a snapshot as one side of a conflict, `age_secs` in the past
pub fn side_at(snapshot: WorkflowSnapshot, version: u32, age_secs: i64) -> SideState {
    SideState::new(snapshot, version, Utc::now() - Duration::seconds(age_secs))
}

/// Fixed base instant for deterministic time arithmetic in tests
pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}
