//! Conflict records and their state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_store::{WorkflowSnapshot, compute_content_checksum};

/// Kind of object the engine synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Workflow,
    Node,
    Rule,
    User,
    Category,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workflow => "workflow",
            Self::Node => "node",
            Self::Rule => "rule",
            Self::User => "user",
            Self::Category => "category",
        };
        f.write_str(name)
    }
}

/// One side of a potential conflict: a snapshot plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideState {
    pub snapshot: WorkflowSnapshot,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl SideState {
    pub fn new(snapshot: WorkflowSnapshot, version: u32, updated_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            version,
            updated_at,
        }
    }
}

/// The field group where the divergence was first observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Name,
    Nodes,
    Connections,
    Config,
    Version,
    Data,
}

/// How urgently a conflict needs attention
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a conflict record
///
/// Allowed transitions: `Pending -> Resolved | Ignored | AutoResolved`,
/// and `Resolved | Ignored -> Pending` (reopen). Everything else is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
    Ignored,
    AutoResolved,
}

impl ConflictStatus {
    /// Whether the state machine allows moving from `self` to `to`
    pub fn can_transition_to(&self, to: ConflictStatus) -> bool {
        use ConflictStatus::*;
        matches!(
            (self, to),
            (Pending, Resolved | Ignored | AutoResolved) | (Resolved | Ignored, Pending)
        )
    }
}

/// A detected divergence between a local and a remote copy of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub object_type: ObjectType,
    pub object_id: String,
    pub local: SideState,
    pub remote: SideState,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub status: ConflictStatus,
    /// Deduplication key; equal for re-detections of the same divergence
    pub conflict_hash: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    /// Auto-resolution attempts so far
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Deduplication hash over the conflicting pair.
    ///
    /// Update timestamps are deliberately left out: the same two versions
    /// re-observed later must map to the same hash.
    pub fn hash_for(
        object_type: ObjectType,
        object_id: &str,
        local_version: u32,
        remote_version: u32,
    ) -> String {
        compute_content_checksum(&format!(
            "{object_type}:{object_id}:{local_version}:{remote_version}"
        ))
    }

    /// Clear resolution fields when a record is reopened
    pub(crate) fn clear_resolution(&mut self) {
        self.resolved_at = None;
        self.resolved_by = None;
        self.resolution_strategy = None;
        self.resolution_notes = None;
    }
}
