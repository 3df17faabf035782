//! Typed workflow payloads
//!
//! A [`WorkflowSnapshot`] is the unit of versioning: the full state of one
//! workflow object at a point in time. Snapshots serialize to canonical JSON
//! (`BTreeMap` keys, stable field order) so that the same logical state always
//! produces the same stored bytes and therefore the same checksum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A node within a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Node identifier, unique within the workflow
    pub id: String,
    /// Node kind (e.g. "task", "gateway", "timer")
    pub kind: String,
    /// Node-level configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: BTreeMap::new(),
        }
    }
}

/// A directed connection between two workflow nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConnection {
    /// Connection identifier
    pub id: String,
    /// Source node id
    pub from: String,
    /// Target node id
    pub to: String,
}

impl WorkflowConnection {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Full state of a workflow object at a point in time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// Workflow object identifier
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Category label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Workflow graph nodes
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    /// Workflow graph connections
    #[serde(default)]
    pub connections: Vec<WorkflowConnection>,
    /// Workflow-level configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,
}

impl WorkflowSnapshot {
    /// Create an empty snapshot for an object id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style name setter
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Serialize to canonical JSON bytes
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen for
    /// well-formed snapshots).
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// Deserialize from canonical JSON bytes
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }

    /// The snapshot as a JSON object value
    ///
    /// Used by delta encoding and structural diffing, both of which operate
    /// on the JSON representation rather than the typed fields.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::from)
    }

    /// Rebuild a snapshot from a JSON object value
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::from)
    }
}
