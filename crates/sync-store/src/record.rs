//! Persistent version and branch records
//!
//! Records are append-only: once written, a [`VersionRecord`] is never
//! mutated except for the status flip to `Deleted` performed by pruning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the record body encodes the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// Body holds the complete snapshot
    Full,
    /// Body holds a delta against an earlier version in the same scope
    Delta { base_version: u32 },
}

/// Lifecycle status of a version record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Normal version created by an edit
    Active,
    /// Version created by rolling back to an earlier one
    Rollback,
    /// First version of a branch
    Branch,
    /// Version created by merging a branch
    Merged,
    /// Soft-deleted by pruning; payload retained but hidden from listings
    Deleted,
}

/// A named tag attached to a specific version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionTag {
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl VersionTag {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// One stored version of one workflow object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Object this version belongs to
    pub object_id: String,
    /// Branch scope; `None` for the mainline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Version number, strictly increasing within `(object_id, branch_id)`
    pub version: u32,
    /// Stored bytes: encoded payload, then optional delta, then transform
    pub body: Vec<u8>,
    /// Checksum over the stored bytes (`sha256:<hex>`)
    pub checksum: String,
    /// How `body` encodes the snapshot
    pub encoding: BodyEncoding,
    pub status: VersionStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<VersionTag>,
    /// Mainline version a branch v1 was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on_version: Option<u32>,
    /// Source version of a rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
    /// Branch a merge version came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_from_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_base_version: Option<u32>,
    /// Size of the stored body in bytes
    pub body_size: usize,
}

impl VersionRecord {
    /// True when the record is visible to listings and reads
    pub fn is_visible(&self) -> bool {
        self.status != VersionStatus::Deleted
    }
}

/// A divergent line of versions cut from a mainline version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: String,
    pub object_id: String,
    /// Mainline version the branch was cut from
    pub base_version: u32,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Set when the branch is merged; closed branches reject new versions
    #[serde(default)]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<String>,
}
