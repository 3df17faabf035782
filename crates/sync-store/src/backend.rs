//! Pluggable persistence backends
//!
//! The store talks to storage through [`VersionBackend`]. Two implementations
//! ship with the crate: [`MemoryBackend`] for tests and embedded use, and
//! [`FileBackend`] which keeps one JSON file per object, written atomically
//! under an `fs2` advisory lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::record::{Branch, VersionRecord, VersionStatus, VersionTag};
use crate::{Error, Result};

/// Storage abstraction for version and branch records
///
/// Backends store records verbatim; sequencing, checksums and visibility
/// rules are the store's responsibility.
pub trait VersionBackend: Send + Sync {
    /// Append a version record. Duplicate `(object, branch, version)` keys
    /// are rejected.
    fn put(&self, record: VersionRecord) -> Result<()>;

    /// Fetch a single record, `None` when absent
    fn get(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Result<Option<VersionRecord>>;

    /// All records in a scope, ascending by version, including soft-deleted
    fn list(&self, object_id: &str, branch_id: Option<&str>) -> Result<Vec<VersionRecord>>;

    /// Highest version number in a scope, 0 when the scope is empty
    fn max_version(&self, object_id: &str, branch_id: Option<&str>) -> Result<u32>;

    /// Flip the status of an existing record
    fn set_status(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
        status: VersionStatus,
    ) -> Result<()>;

    /// Attach a tag to a mainline version
    fn add_tag(&self, object_id: &str, version: u32, tag: VersionTag) -> Result<()>;

    /// Register a new branch record
    fn put_branch(&self, branch: Branch) -> Result<()>;

    /// Fetch a branch record, `None` when absent
    fn get_branch(&self, object_id: &str, branch_id: &str) -> Result<Option<Branch>>;

    /// All branches cut from an object
    fn list_branches(&self, object_id: &str) -> Result<Vec<Branch>>;

    /// Soft-close a branch with a reason
    fn close_branch(&self, object_id: &str, branch_id: &str, reason: &str) -> Result<()>;
}

/// Everything stored for one object
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ObjectState {
    versions: Vec<VersionRecord>,
    branches: Vec<Branch>,
}

impl ObjectState {
    fn insert(&mut self, record: VersionRecord) -> Result<()> {
        let duplicate = self.versions.iter().any(|r| {
            r.version == record.version && r.branch_id.as_deref() == record.branch_id.as_deref()
        });
        if duplicate {
            return Err(Error::persistence(format!(
                "version {} already exists for {} (branch {:?})",
                record.version, record.object_id, record.branch_id
            )));
        }
        self.versions.push(record);
        Ok(())
    }

    fn scoped(&self, branch_id: Option<&str>) -> Vec<VersionRecord> {
        let mut records: Vec<_> = self
            .versions
            .iter()
            .filter(|r| r.branch_id.as_deref() == branch_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.version);
        records
    }

    fn find_mut(&mut self, branch_id: Option<&str>, version: u32) -> Option<&mut VersionRecord> {
        self.versions
            .iter_mut()
            .find(|r| r.branch_id.as_deref() == branch_id && r.version == version)
    }
}

/// In-memory backend, the default for tests and ephemeral stores
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, ObjectState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_object<T>(
        &self,
        object_id: &str,
        f: impl FnOnce(&mut ObjectState) -> Result<T>,
    ) -> Result<T> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::persistence("memory backend mutex poisoned"))?;
        f(objects.entry(object_id.to_string()).or_default())
    }
}

impl VersionBackend for MemoryBackend {
    fn put(&self, record: VersionRecord) -> Result<()> {
        self.with_object(&record.object_id.clone(), |state| state.insert(record))
    }

    fn get(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Result<Option<VersionRecord>> {
        self.with_object(object_id, |state| {
            Ok(state
                .versions
                .iter()
                .find(|r| r.branch_id.as_deref() == branch_id && r.version == version)
                .cloned())
        })
    }

    fn list(&self, object_id: &str, branch_id: Option<&str>) -> Result<Vec<VersionRecord>> {
        self.with_object(object_id, |state| Ok(state.scoped(branch_id)))
    }

    fn max_version(&self, object_id: &str, branch_id: Option<&str>) -> Result<u32> {
        self.with_object(object_id, |state| {
            Ok(state
                .versions
                .iter()
                .filter(|r| r.branch_id.as_deref() == branch_id)
                .map(|r| r.version)
                .max()
                .unwrap_or(0))
        })
    }

    fn set_status(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
        status: VersionStatus,
    ) -> Result<()> {
        self.with_object(object_id, |state| {
            let record = state.find_mut(branch_id, version).ok_or_else(|| {
                Error::VersionNotFound {
                    object_id: object_id.to_string(),
                    version,
                }
            })?;
            record.status = status;
            Ok(())
        })
    }

    fn add_tag(&self, object_id: &str, version: u32, tag: VersionTag) -> Result<()> {
        self.with_object(object_id, |state| {
            let record =
                state
                    .find_mut(None, version)
                    .ok_or_else(|| Error::VersionNotFound {
                        object_id: object_id.to_string(),
                        version,
                    })?;
            record.tags.push(tag);
            Ok(())
        })
    }

    fn put_branch(&self, branch: Branch) -> Result<()> {
        self.with_object(&branch.object_id.clone(), |state| {
            if state.branches.iter().any(|b| b.branch_id == branch.branch_id) {
                return Err(Error::persistence(format!(
                    "branch {} already exists",
                    branch.branch_id
                )));
            }
            state.branches.push(branch);
            Ok(())
        })
    }

    fn get_branch(&self, object_id: &str, branch_id: &str) -> Result<Option<Branch>> {
        self.with_object(object_id, |state| {
            Ok(state
                .branches
                .iter()
                .find(|b| b.branch_id == branch_id)
                .cloned())
        })
    }

    fn list_branches(&self, object_id: &str) -> Result<Vec<Branch>> {
        self.with_object(object_id, |state| Ok(state.branches.clone()))
    }

    fn close_branch(&self, object_id: &str, branch_id: &str, reason: &str) -> Result<()> {
        self.with_object(object_id, |state| {
            let branch = state
                .branches
                .iter_mut()
                .find(|b| b.branch_id == branch_id)
                .ok_or_else(|| Error::BranchNotFound {
                    branch_id: branch_id.to_string(),
                })?;
            branch.closed = true;
            branch.closed_reason = Some(reason.to_string());
            Ok(())
        })
    }
}

/// File-per-object JSON backend
///
/// Each object's versions and branches live in `<root>/<object>.json`. Reads
/// take a shared lock and read through the locked handle; writes take an
/// exclusive lock, write a temp file, then rename over the target.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, object_id: &str) -> PathBuf {
        // Object ids may contain path separators; map them to a flat name.
        let safe: String = object_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    fn load(&self, object_id: &str) -> Result<ObjectState> {
        let path = self.object_path(object_id);
        if !path.exists() {
            return Ok(ObjectState::default());
        }
        let file = File::open(&path)?;
        file.lock_shared()?;

        // Read through the locked handle to avoid TOCTOU races
        let mut content = String::new();
        (&file).read_to_string(&mut content)?;
        let state: ObjectState = serde_json::from_str(&content)?;

        // Lock released when file is dropped
        Ok(state)
    }

    fn save(&self, object_id: &str, state: &ObjectState) -> Result<()> {
        let path = self.object_path(object_id);
        let content = serde_json::to_string_pretty(state)?;

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_file.lock_exclusive()?;

        // Write to temporary file first, then atomically rename
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;

        // Lock released when lock_file is dropped
        Ok(())
    }

    fn update<T>(
        &self,
        object_id: &str,
        f: impl FnOnce(&mut ObjectState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.load(object_id)?;
        let out = f(&mut state)?;
        self.save(object_id, &state)?;
        Ok(out)
    }
}

impl VersionBackend for FileBackend {
    fn put(&self, record: VersionRecord) -> Result<()> {
        self.update(&record.object_id.clone(), |state| state.insert(record))
    }

    fn get(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Result<Option<VersionRecord>> {
        Ok(self
            .load(object_id)?
            .versions
            .into_iter()
            .find(|r| r.branch_id.as_deref() == branch_id && r.version == version))
    }

    fn list(&self, object_id: &str, branch_id: Option<&str>) -> Result<Vec<VersionRecord>> {
        Ok(self.load(object_id)?.scoped(branch_id))
    }

    fn max_version(&self, object_id: &str, branch_id: Option<&str>) -> Result<u32> {
        Ok(self
            .load(object_id)?
            .versions
            .iter()
            .filter(|r| r.branch_id.as_deref() == branch_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0))
    }

    fn set_status(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
        status: VersionStatus,
    ) -> Result<()> {
        self.update(object_id, |state| {
            let record = state.find_mut(branch_id, version).ok_or_else(|| {
                Error::VersionNotFound {
                    object_id: object_id.to_string(),
                    version,
                }
            })?;
            record.status = status;
            Ok(())
        })
    }

    fn add_tag(&self, object_id: &str, version: u32, tag: VersionTag) -> Result<()> {
        self.update(object_id, |state| {
            let record =
                state
                    .find_mut(None, version)
                    .ok_or_else(|| Error::VersionNotFound {
                        object_id: object_id.to_string(),
                        version,
                    })?;
            record.tags.push(tag);
            Ok(())
        })
    }

    fn put_branch(&self, branch: Branch) -> Result<()> {
        self.update(&branch.object_id.clone(), |state| {
            if state.branches.iter().any(|b| b.branch_id == branch.branch_id) {
                return Err(Error::persistence(format!(
                    "branch {} already exists",
                    branch.branch_id
                )));
            }
            state.branches.push(branch);
            Ok(())
        })
    }

    fn get_branch(&self, object_id: &str, branch_id: &str) -> Result<Option<Branch>> {
        Ok(self
            .load(object_id)?
            .branches
            .into_iter()
            .find(|b| b.branch_id == branch_id))
    }

    fn list_branches(&self, object_id: &str) -> Result<Vec<Branch>> {
        Ok(self.load(object_id)?.branches)
    }

    fn close_branch(&self, object_id: &str, branch_id: &str, reason: &str) -> Result<()> {
        self.update(object_id, |state| {
            let branch = state
                .branches
                .iter_mut()
                .find(|b| b.branch_id == branch_id)
                .ok_or_else(|| Error::BranchNotFound {
                    branch_id: branch_id.to_string(),
                })?;
            branch.closed = true;
            branch.closed_reason = Some(reason.to_string());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BodyEncoding;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(object_id: &str, version: u32) -> VersionRecord {
        VersionRecord {
            object_id: object_id.to_string(),
            branch_id: None,
            version,
            body: vec![version as u8; 4],
            checksum: format!("sha256:{version}"),
            encoding: BodyEncoding::Full,
            status: VersionStatus::Active,
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            description: None,
            tags: Vec::new(),
            based_on_version: None,
            rollback_from_version: None,
            rollback_reason: None,
            merge_from_branch: None,
            merge_strategy: None,
            merge_base_version: None,
            body_size: 4,
        }
    }

    fn branch(object_id: &str, branch_id: &str) -> Branch {
        Branch {
            branch_id: branch_id.to_string(),
            object_id: object_id.to_string(),
            base_version: 1,
            name: "feature".to_string(),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            closed: false,
            closed_reason: None,
        }
    }

    fn exercise_backend(backend: &dyn VersionBackend) {
        backend.put(record("wf-1", 1)).unwrap();
        backend.put(record("wf-1", 2)).unwrap();
        backend.put(record("wf-2", 1)).unwrap();

        assert_eq!(backend.max_version("wf-1", None).unwrap(), 2);
        assert_eq!(backend.max_version("wf-2", None).unwrap(), 1);
        assert_eq!(backend.max_version("wf-3", None).unwrap(), 0);

        let listed = backend.list("wf-1", None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].version, 1);

        let fetched = backend.get("wf-1", None, 2).unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert!(backend.get("wf-1", None, 9).unwrap().is_none());

        // Duplicate version rejected
        assert!(backend.put(record("wf-1", 2)).is_err());

        backend
            .set_status("wf-1", None, 1, VersionStatus::Deleted)
            .unwrap();
        let deleted = backend.get("wf-1", None, 1).unwrap().unwrap();
        assert_eq!(deleted.status, VersionStatus::Deleted);

        backend
            .add_tag("wf-1", 2, VersionTag::new("release", "alice"))
            .unwrap();
        assert_eq!(backend.get("wf-1", None, 2).unwrap().unwrap().tags.len(), 1);

        backend.put_branch(branch("wf-1", "b-1")).unwrap();
        assert!(backend.get_branch("wf-1", "b-1").unwrap().is_some());
        assert_eq!(backend.list_branches("wf-1").unwrap().len(), 1);

        backend.close_branch("wf-1", "b-1", "merged").unwrap();
        let closed = backend.get_branch("wf-1", "b-1").unwrap().unwrap();
        assert!(closed.closed);

        // Branch-scoped versions live in their own sequence
        let mut branched = record("wf-1", 1);
        branched.branch_id = Some("b-1".to_string());
        backend.put(branched).unwrap();
        assert_eq!(backend.max_version("wf-1", Some("b-1")).unwrap(), 1);
        assert_eq!(backend.max_version("wf-1", None).unwrap(), 2);
    }

    #[test]
    fn memory_backend_contract() {
        exercise_backend(&MemoryBackend::new());
    }

    #[test]
    fn file_backend_contract() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        exercise_backend(&backend);
    }

    #[test]
    fn file_backend_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::new(dir.path()).unwrap();
            backend.put(record("wf-1", 1)).unwrap();
        }
        let reopened = FileBackend::new(dir.path()).unwrap();
        assert_eq!(reopened.max_version("wf-1", None).unwrap(), 1);
    }

    #[test]
    fn file_backend_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.put(record("wf-1", 1)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn object_ids_with_separators_map_to_flat_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.put(record("team/wf 1", 1)).unwrap();
        assert_eq!(backend.max_version("team/wf 1", None).unwrap(), 1);
    }
}
