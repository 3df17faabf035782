//! Resolution strategies
//!
//! A strategy picks (or builds) the snapshot that wins a conflict. The
//! merge strategy can fail: when both sides edited the same basic field
//! to different non-null values there is no safe automatic answer.

use std::fmt;

use serde::{Deserialize, Serialize};
use sync_store::WorkflowSnapshot;

use crate::conflict::record::SideState;
use crate::{Error, Result};

/// How a conflict should be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The local (client) side wins
    ClientPriority,
    /// The remote (server) side wins
    ServerPriority,
    /// The more recently updated side wins; ties go to the server
    TimestampPriority,
    /// Field-wise combination of both sides
    Merge,
    /// Caller supplies the winning payload
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ClientPriority => "client_priority",
            Self::ServerPriority => "server_priority",
            Self::TimestampPriority => "timestamp_priority",
            Self::Merge => "merge",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Pick the winning snapshot for a conflict.
///
/// `manual_payload` is only consulted by [`ResolutionStrategy::Manual`].
///
/// # Errors
///
/// Returns [`Error::UnresolvableConflict`] when `Merge` meets contradictory
/// basic-field edits, or when `Manual` is invoked without a payload.
pub fn pick_winner(
    conflict_id: &str,
    strategy: ResolutionStrategy,
    local: &SideState,
    remote: &SideState,
    manual_payload: Option<&WorkflowSnapshot>,
) -> Result<WorkflowSnapshot> {
    match strategy {
        ResolutionStrategy::ClientPriority => Ok(local.snapshot.clone()),
        ResolutionStrategy::ServerPriority => Ok(remote.snapshot.clone()),
        ResolutionStrategy::TimestampPriority => {
            // Ties prefer the server side
            if local.updated_at > remote.updated_at {
                Ok(local.snapshot.clone())
            } else {
                Ok(remote.snapshot.clone())
            }
        }
        ResolutionStrategy::Merge => merge_sides(conflict_id, local, remote),
        ResolutionStrategy::Manual => {
            manual_payload
                .cloned()
                .ok_or_else(|| Error::UnresolvableConflict {
                    conflict_id: conflict_id.to_string(),
                    reason: "manual resolution requires a payload".to_string(),
                })
        }
    }
}

/// Field-wise merge of both sides.
///
/// Basic fields: equal values pass through, a one-sided value wins, and
/// contradictory non-null values abort the merge. Node and connection
/// lists are unioned with value-equal duplicates dropped. Config entries
/// are unioned; for a contradictory key the later-updated side wins.
fn merge_sides(
    conflict_id: &str,
    local: &SideState,
    remote: &SideState,
) -> Result<WorkflowSnapshot> {
    let a = &local.snapshot;
    let b = &remote.snapshot;

    let mut merged = a.clone();
    merged.name = merge_basic(conflict_id, "name", &a.name, &b.name)?;
    merged.description = merge_basic(conflict_id, "description", &a.description, &b.description)?;
    merged.category = merge_basic(conflict_id, "category", &a.category, &b.category)?;

    for node in &b.nodes {
        if !merged.nodes.contains(node) {
            merged.nodes.push(node.clone());
        }
    }
    for connection in &b.connections {
        if !merged.connections.contains(connection) {
            merged.connections.push(connection.clone());
        }
    }

    let remote_newer = remote.updated_at >= local.updated_at;
    for (key, value) in &b.config {
        match merged.config.get(key) {
            Some(existing) if existing != value && !remote_newer => {}
            _ => {
                merged.config.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(merged)
}

fn merge_basic(
    conflict_id: &str,
    field: &str,
    a: &Option<String>,
    b: &Option<String>,
) -> Result<Option<String>> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(Error::UnresolvableConflict {
            conflict_id: conflict_id.to_string(),
            reason: format!("both sides changed {field} to different values"),
        }),
        (Some(x), _) => Ok(Some(x.clone())),
        (None, other) => Ok(other.clone()),
    }
}
