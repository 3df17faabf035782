//! Delta encoding between consecutive snapshot versions
//!
//! When delta storage is enabled, a version stores only the top-level JSON
//! fields that changed relative to its immediate predecessor, plus the list
//! of removed fields. Materializing a delta version walks back to the most
//! recent full snapshot and replays deltas forward; the walk is a bounded
//! loop (see `StoreConfig::max_delta_chain`) and every
//! `full_snapshot_interval`-th version is stored full, so chains stay short
//! by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::WorkflowSnapshot;
use crate::{Error, Result};

/// Field-level difference between a snapshot and its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDelta {
    /// Version this delta applies on top of
    pub base_version: u32,
    /// Top-level fields whose value changed, with their new value
    pub changed: BTreeMap<String, Value>,
    /// Top-level fields present in the base but absent in the new snapshot
    pub removed: Vec<String>,
}

impl SnapshotDelta {
    /// Compute the delta that turns `base` into `next`.
    ///
    /// Operates on the canonical JSON representation: a field is "changed"
    /// when its JSON value differs, regardless of how deep the difference is.
    pub fn compute(base: &WorkflowSnapshot, next: &WorkflowSnapshot, base_version: u32) -> Result<Self> {
        let base_obj = as_object(base.to_value()?)?;
        let next_obj = as_object(next.to_value()?)?;

        let mut changed = BTreeMap::new();
        for (key, value) in &next_obj {
            if base_obj.get(key) != Some(value) {
                changed.insert(key.clone(), value.clone());
            }
        }

        let removed = base_obj
            .keys()
            .filter(|key| !next_obj.contains_key(*key))
            .cloned()
            .collect();

        Ok(Self {
            base_version,
            changed,
            removed,
        })
    }

    /// Apply this delta on top of a materialized base snapshot.
    pub fn apply(&self, base: &WorkflowSnapshot) -> Result<WorkflowSnapshot> {
        let mut obj = as_object(base.to_value()?)?;

        for key in &self.removed {
            obj.remove(key);
        }
        for (key, value) in &self.changed {
            obj.insert(key.clone(), value.clone());
        }

        WorkflowSnapshot::from_value(Value::Object(obj.into_iter().collect()))
    }

    /// True when the delta carries no changes
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

fn as_object(value: Value) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(Error::persistence(format!(
            "snapshot did not encode to a JSON object: {other}"
        ))),
    }
}
