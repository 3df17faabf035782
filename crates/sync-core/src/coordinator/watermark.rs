//! Per-item sync watermarks
//!
//! Delta sync only touches items modified after their last successful
//! sync. The watermarks live in a TOML file saved atomically under an
//! `fs2` lock so they survive restarts; without a path they are
//! memory-only.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::conflict::ObjectType;

/// Last-synced timestamps keyed by `<object_type>:<object_id>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Watermarks {
    version: String,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            entries: BTreeMap::new(),
        }
    }

    fn key(object_type: ObjectType, object_id: &str) -> String {
        format!("{object_type}:{object_id}")
    }

    /// Last successful sync time for an item, if any
    pub fn get(&self, object_type: ObjectType, object_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(&Self::key(object_type, object_id)).copied()
    }

    /// Record a successful sync at `at`
    pub fn advance(&mut self, object_type: ObjectType, object_id: &str, at: DateTime<Utc>) {
        self.entries.insert(Self::key(object_type, object_id), at);
    }

    /// Whether an item changed since its watermark. Items never synced
    /// always count as changed.
    pub fn is_stale(
        &self,
        object_type: ObjectType,
        object_id: &str,
        last_modified: DateTime<Utc>,
    ) -> bool {
        match self.get(object_type, object_id) {
            Some(watermark) => last_modified > watermark,
            None => true,
        }
    }

    /// Load watermarks from a TOML file with a shared lock.
    ///
    /// A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, locked, or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)?;
        file.lock_shared()?;

        // Read through the locked file handle to avoid TOCTOU races
        let mut content = String::new();
        (&file).read_to_string(&mut content)?;
        let watermarks: Watermarks = toml::from_str(&content)?;

        // Lock released when file is dropped
        Ok(watermarks)
    }

    /// Save watermarks atomically with an exclusive lock.
    ///
    /// Uses write-to-temp-then-rename so a crash mid-save never leaves a
    /// partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or locked.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock_file.lock_exclusive()?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        // Lock released when lock_file is dropped
        Ok(())
    }
}
