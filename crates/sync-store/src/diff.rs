//! Structural comparison of two snapshot versions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::WorkflowSnapshot;

/// Kind of change to a graph element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A changed top-level field (name, description, category)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// A changed workflow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeChange {
    pub node_id: String,
    pub change: ChangeKind,
}

/// A changed workflow connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionChange {
    pub connection_id: String,
    pub change: ChangeKind,
}

/// A changed configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Structural difference between two versions of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDiff {
    pub object_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub basic_changes: Vec<BasicChange>,
    pub node_changes: Vec<NodeChange>,
    pub connection_changes: Vec<ConnectionChange>,
    pub config_changes: Vec<ConfigChange>,
    /// Total number of individual changes across all groups
    pub total_changes: usize,
    /// Changes as a percentage of comparable elements (0.0 - 100.0)
    pub change_percentage: f64,
}

impl VersionDiff {
    /// Compare two materialized snapshots of the same object.
    pub fn compare(
        object_id: &str,
        from_version: u32,
        to_version: u32,
        old: &WorkflowSnapshot,
        new: &WorkflowSnapshot,
    ) -> Self {
        let basic_changes = compare_basic(old, new);
        let node_changes = compare_nodes(old, new);
        let connection_changes = compare_connections(old, new);
        let config_changes = compare_config(old, new);

        let total_changes = basic_changes.len()
            + node_changes.len()
            + connection_changes.len()
            + config_changes.len();

        // Comparable element count: 3 basic fields plus the union of node,
        // connection and config key sets across both sides.
        let comparable = 3
            + key_union(old.nodes.iter().map(|n| &n.id), new.nodes.iter().map(|n| &n.id))
            + key_union(
                old.connections.iter().map(|c| &c.id),
                new.connections.iter().map(|c| &c.id),
            )
            + key_union(old.config.keys(), new.config.keys());

        let change_percentage = if comparable == 0 {
            0.0
        } else {
            total_changes as f64 * 100.0 / comparable as f64
        };

        Self {
            object_id: object_id.to_string(),
            from_version,
            to_version,
            basic_changes,
            node_changes,
            connection_changes,
            config_changes,
            total_changes,
            change_percentage,
        }
    }

    /// True when the two versions are structurally identical
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }
}

fn key_union<'a, A, B>(a: A, b: B) -> usize
where
    A: Iterator<Item = &'a String>,
    B: Iterator<Item = &'a String>,
{
    let mut keys: std::collections::BTreeSet<&String> = a.collect();
    keys.extend(b);
    keys.len()
}

fn compare_basic(old: &WorkflowSnapshot, new: &WorkflowSnapshot) -> Vec<BasicChange> {
    let mut changes = Vec::new();
    let fields = [
        ("name", &old.name, &new.name),
        ("description", &old.description, &new.description),
        ("category", &old.category, &new.category),
    ];
    for (field, old_value, new_value) in fields {
        if old_value != new_value {
            changes.push(BasicChange {
                field: field.to_string(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
            });
        }
    }
    changes
}

fn compare_nodes(old: &WorkflowSnapshot, new: &WorkflowSnapshot) -> Vec<NodeChange> {
    let mut changes = Vec::new();

    for node in &new.nodes {
        match old.nodes.iter().find(|n| n.id == node.id) {
            None => changes.push(NodeChange {
                node_id: node.id.clone(),
                change: ChangeKind::Added,
            }),
            Some(previous) if previous != node => changes.push(NodeChange {
                node_id: node.id.clone(),
                change: ChangeKind::Modified,
            }),
            Some(_) => {}
        }
    }

    for node in &old.nodes {
        if !new.nodes.iter().any(|n| n.id == node.id) {
            changes.push(NodeChange {
                node_id: node.id.clone(),
                change: ChangeKind::Removed,
            });
        }
    }

    changes
}

fn compare_connections(old: &WorkflowSnapshot, new: &WorkflowSnapshot) -> Vec<ConnectionChange> {
    let mut changes = Vec::new();

    for conn in &new.connections {
        match old.connections.iter().find(|c| c.id == conn.id) {
            None => changes.push(ConnectionChange {
                connection_id: conn.id.clone(),
                change: ChangeKind::Added,
            }),
            Some(previous) if previous != conn => changes.push(ConnectionChange {
                connection_id: conn.id.clone(),
                change: ChangeKind::Modified,
            }),
            Some(_) => {}
        }
    }

    for conn in &old.connections {
        if !new.connections.iter().any(|c| c.id == conn.id) {
            changes.push(ConnectionChange {
                connection_id: conn.id.clone(),
                change: ChangeKind::Removed,
            });
        }
    }

    changes
}

fn compare_config(old: &WorkflowSnapshot, new: &WorkflowSnapshot) -> Vec<ConfigChange> {
    let mut changes = Vec::new();

    for (key, value) in &new.config {
        match old.config.get(key) {
            None => changes.push(ConfigChange {
                key: key.clone(),
                old_value: None,
                new_value: Some(value.clone()),
            }),
            Some(previous) if previous != value => changes.push(ConfigChange {
                key: key.clone(),
                old_value: Some(previous.clone()),
                new_value: Some(value.clone()),
            }),
            Some(_) => {}
        }
    }

    for (key, value) in &old.config {
        if !new.config.contains_key(key) {
            changes.push(ConfigChange {
                key: key.clone(),
                old_value: Some(value.clone()),
                new_value: None,
            });
        }
    }

    changes
}
