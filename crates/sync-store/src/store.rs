//! Append-only, checksum-verified version storage
//!
//! [`VersionStore`] is the authoritative history of workflow objects. Every
//! mutation appends a new [`VersionRecord`]; history is never rewritten.
//! Rollback, branch and merge all express themselves as new versions with
//! the appropriate status and provenance fields.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::backend::{MemoryBackend, VersionBackend};
use crate::checksum::compute_checksum;
use crate::delta::SnapshotDelta;
use crate::diff::VersionDiff;
use crate::record::{Branch, BodyEncoding, VersionRecord, VersionStatus, VersionTag};
use crate::snapshot::WorkflowSnapshot;
use crate::transform::{IdentityTransform, PayloadTransform};
use crate::{Error, Result};

/// Strategy used when merging a branch back into its object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Take the branch tip wholesale
    Theirs,
    /// Keep the target version, recording the merge only
    Ours,
    /// Combine branch and target field by field
    ThreeWay,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Theirs => "theirs",
            Self::Ours => "ours",
            Self::ThreeWay => "three_way",
        };
        f.write_str(name)
    }
}

/// Tuning knobs for a [`VersionStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store deltas against the predecessor instead of full snapshots
    pub delta_storage: bool,
    /// Maximum delta links to replay when materializing a version
    pub max_delta_chain: usize,
    /// Every n-th version is stored full even when deltas are enabled
    pub full_snapshot_interval: u32,
    /// Materialized snapshots cached per object scope
    pub cache_per_object: usize,
    /// When set, creating a version auto-prunes beyond this many
    pub max_versions: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            delta_storage: true,
            max_delta_chain: 32,
            full_snapshot_interval: 10,
            cache_per_object: 10,
            max_versions: None,
        }
    }
}

/// Aggregate statistics for one object's history
#[derive(Debug, Clone, PartialEq)]
pub struct VersionStatistics {
    pub object_id: String,
    pub total_versions: usize,
    pub first_version: u32,
    pub latest_version: u32,
    pub storage_bytes: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_author: BTreeMap<String, usize>,
}

/// Bounded most-recently-used snapshot cache for one scope
#[derive(Debug, Default)]
struct ScopeCache {
    entries: VecDeque<(u32, WorkflowSnapshot)>,
}

impl ScopeCache {
    fn get(&mut self, version: u32) -> Option<WorkflowSnapshot> {
        let pos = self.entries.iter().position(|(v, _)| *v == version)?;
        let entry = self.entries.remove(pos)?;
        let snapshot = entry.1.clone();
        self.entries.push_back(entry);
        Some(snapshot)
    }

    fn insert(&mut self, version: u32, snapshot: WorkflowSnapshot, capacity: usize) {
        self.entries.retain(|(v, _)| *v != version);
        self.entries.push_back((version, snapshot));
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }
}

/// Append-only version store over a pluggable backend
pub struct VersionStore {
    backend: Arc<dyn VersionBackend>,
    transform: Arc<dyn PayloadTransform>,
    config: StoreConfig,
    /// Per-object mutexes, created lazily on first use
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Materialized-snapshot cache keyed by scope
    cache: Mutex<HashMap<String, ScopeCache>>,
}

impl VersionStore {
    /// Create a store over an in-memory backend with default configuration
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Create a store over the given backend with default configuration
    pub fn new(backend: Arc<dyn VersionBackend>) -> Self {
        Self {
            backend,
            transform: Arc::new(IdentityTransform),
            config: StoreConfig::default(),
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the store configuration
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a payload transform applied between encoding and persistence
    pub fn with_transform(mut self, transform: Arc<dyn PayloadTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Create the next version of an object on the mainline.
    ///
    /// Version numbers start at 1 and increase by exactly one per create;
    /// numbers are never reused, even after pruning.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, the payload transform, or the backend
    /// write fails.
    pub fn create_version(
        &self,
        object_id: &str,
        snapshot: &WorkflowSnapshot,
        author: &str,
        description: Option<&str>,
    ) -> Result<VersionRecord> {
        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;

        let record = self.append(object_id, None, snapshot, author, description, |r| r)?;

        if let Some(max) = self.config.max_versions {
            self.prune_locked(object_id, max)?;
        }

        tracing::info!(
            object_id,
            version = record.version,
            author,
            "created version"
        );
        Ok(record)
    }

    /// Materialize a mainline version.
    ///
    /// Verifies the stored checksum, reverses the payload transform and
    /// replays the delta chain. A checksum mismatch is fatal
    /// ([`Error::CorruptedVersion`]) and is never retried.
    pub fn get_version(&self, object_id: &str, version: u32) -> Result<WorkflowSnapshot> {
        let record = self.fetch(object_id, None, version)?;
        if !record.is_visible() {
            return Err(Error::VersionNotFound {
                object_id: object_id.to_string(),
                version,
            });
        }
        self.materialize(object_id, None, version)
    }

    /// Visible mainline history, ascending by version
    pub fn list_versions(&self, object_id: &str) -> Result<Vec<VersionRecord>> {
        Ok(self
            .backend
            .list(object_id, None)?
            .into_iter()
            .filter(VersionRecord::is_visible)
            .collect())
    }

    /// Highest visible mainline version, 0 when the object has none
    pub fn latest_version(&self, object_id: &str) -> Result<u32> {
        Ok(self
            .list_versions(object_id)?
            .last()
            .map(|r| r.version)
            .unwrap_or(0))
    }

    /// Structural diff between two mainline versions
    pub fn diff(&self, object_id: &str, from: u32, to: u32) -> Result<VersionDiff> {
        let old = self.get_version(object_id, from)?;
        let new = self.get_version(object_id, to)?;
        Ok(VersionDiff::compare(object_id, from, to, &old, &new))
    }

    /// Roll an object back to an earlier version.
    ///
    /// Appends a new version carrying the target's payload with
    /// `status = Rollback`; the target version itself is untouched.
    pub fn rollback(
        &self,
        object_id: &str,
        target_version: u32,
        actor: &str,
        reason: &str,
    ) -> Result<VersionRecord> {
        let snapshot = self.get_version(object_id, target_version)?;

        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;

        let record = self.append(
            object_id,
            None,
            &snapshot,
            actor,
            Some(&format!("rollback to v{target_version}")),
            |mut r| {
                r.status = VersionStatus::Rollback;
                r.rollback_from_version = Some(target_version);
                r.rollback_reason = Some(reason.to_string());
                r
            },
        )?;

        tracing::info!(
            object_id,
            target_version,
            new_version = record.version,
            "rolled back"
        );
        Ok(record)
    }

    /// Cut a branch from a mainline version.
    ///
    /// The branch gets its own version sequence; its v1 holds the
    /// materialized base payload with `status = Branch`.
    pub fn branch(
        &self,
        object_id: &str,
        base_version: u32,
        name: &str,
        actor: &str,
    ) -> Result<Branch> {
        let base = self.get_version(object_id, base_version)?;

        let branch_id = format!("{}-{}", slugify(name), short_id());
        let branch = Branch {
            branch_id: branch_id.clone(),
            object_id: object_id.to_string(),
            base_version,
            name: name.to_string(),
            created_by: actor.to_string(),
            created_at: Utc::now(),
            closed: false,
            closed_reason: None,
        };

        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;

        self.backend.put_branch(branch.clone())?;
        self.append(
            object_id,
            Some(&branch_id),
            &base,
            actor,
            Some(&format!("branched from v{base_version}")),
            |mut r| {
                r.status = VersionStatus::Branch;
                r.based_on_version = Some(base_version);
                r
            },
        )?;

        tracing::info!(object_id, branch_id = %branch_id, base_version, "created branch");
        Ok(branch)
    }

    /// Append a version on an open branch
    pub fn create_branch_version(
        &self,
        object_id: &str,
        branch_id: &str,
        snapshot: &WorkflowSnapshot,
        author: &str,
        description: Option<&str>,
    ) -> Result<VersionRecord> {
        let branch = self.require_branch(object_id, branch_id)?;
        if branch.closed {
            return Err(Error::BranchClosed {
                branch_id: branch_id.to_string(),
                reason: branch.closed_reason.unwrap_or_else(|| "closed".to_string()),
            });
        }

        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;

        self.append(object_id, Some(branch_id), snapshot, author, description, |r| r)
    }

    /// Materialize the newest version on a branch
    pub fn branch_tip(&self, object_id: &str, branch_id: &str) -> Result<WorkflowSnapshot> {
        self.require_branch(object_id, branch_id)?;
        let tip = self
            .backend
            .list(object_id, Some(branch_id))?
            .into_iter()
            .filter(VersionRecord::is_visible)
            .next_back()
            .ok_or_else(|| Error::EmptyBranch {
                branch_id: branch_id.to_string(),
            })?;
        self.materialize(object_id, Some(branch_id), tip.version)
    }

    /// Merge a branch into a mainline version.
    ///
    /// Appends a `status = Merged` version on the mainline and soft-closes
    /// the branch. The branch's history stays readable.
    pub fn merge(
        &self,
        object_id: &str,
        branch_id: &str,
        target_version: u32,
        strategy: MergeStrategy,
        actor: &str,
    ) -> Result<VersionRecord> {
        let branch = self.require_branch(object_id, branch_id)?;
        if branch.closed {
            return Err(Error::BranchClosed {
                branch_id: branch_id.to_string(),
                reason: branch.closed_reason.unwrap_or_else(|| "closed".to_string()),
            });
        }

        let theirs = self.branch_tip(object_id, branch_id)?;
        let ours = self.get_version(object_id, target_version)?;

        let merged = match strategy {
            MergeStrategy::Theirs => theirs,
            MergeStrategy::Ours => ours,
            MergeStrategy::ThreeWay => three_way_merge(&ours, &theirs),
        };

        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;

        let record = self.append(
            object_id,
            None,
            &merged,
            actor,
            Some(&format!("merged branch {branch_id}")),
            |mut r| {
                r.status = VersionStatus::Merged;
                r.merge_from_branch = Some(branch_id.to_string());
                r.merge_strategy = Some(strategy.to_string());
                r.merge_base_version = Some(branch.base_version);
                r
            },
        )?;

        self.backend.close_branch(
            object_id,
            branch_id,
            &format!("merged into v{}", record.version),
        )?;

        tracing::info!(
            object_id,
            branch_id,
            strategy = %strategy,
            new_version = record.version,
            "merged branch"
        );
        Ok(record)
    }

    /// Branches cut from an object
    pub fn branches(&self, object_id: &str) -> Result<Vec<Branch>> {
        self.backend.list_branches(object_id)
    }

    /// Soft-delete old mainline versions, keeping the most recent
    /// `keep_last`.
    ///
    /// Tagged versions, rollback and merge versions, and version 1 are
    /// always retained. Returns the number of versions pruned.
    pub fn prune_old_versions(&self, object_id: &str, keep_last: usize) -> Result<usize> {
        let lock = self.object_lock(object_id);
        let _guard = hold(&lock)?;
        self.prune_locked(object_id, keep_last)
    }

    /// Attach a named tag to a mainline version
    pub fn add_tag(&self, object_id: &str, version: u32, tag: &str, actor: &str) -> Result<()> {
        self.fetch(object_id, None, version)?;
        self.backend
            .add_tag(object_id, version, VersionTag::new(tag, actor))
    }

    /// All tags on an object, paired with their version
    pub fn tags(&self, object_id: &str) -> Result<Vec<(u32, VersionTag)>> {
        let mut tags = Vec::new();
        for record in self.backend.list(object_id, None)? {
            for tag in record.tags {
                tags.push((record.version, tag));
            }
        }
        Ok(tags)
    }

    /// Aggregate statistics over an object's visible mainline history
    pub fn statistics(&self, object_id: &str) -> Result<VersionStatistics> {
        let records = self.list_versions(object_id)?;

        let mut by_status = BTreeMap::new();
        let mut by_author = BTreeMap::new();
        let mut storage_bytes = 0;
        for record in &records {
            let status = format!("{:?}", record.status).to_lowercase();
            *by_status.entry(status).or_insert(0) += 1;
            *by_author.entry(record.created_by.clone()).or_insert(0) += 1;
            storage_bytes += record.body_size;
        }

        Ok(VersionStatistics {
            object_id: object_id.to_string(),
            total_versions: records.len(),
            first_version: records.first().map(|r| r.version).unwrap_or(0),
            latest_version: records.last().map(|r| r.version).unwrap_or(0),
            storage_bytes,
            by_status,
            by_author,
        })
    }

    // ---- internals -------------------------------------------------------

    fn object_lock(&self, object_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(object_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn require_branch(&self, object_id: &str, branch_id: &str) -> Result<Branch> {
        self.backend
            .get_branch(object_id, branch_id)?
            .ok_or_else(|| Error::BranchNotFound {
                branch_id: branch_id.to_string(),
            })
    }

    fn fetch(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Result<VersionRecord> {
        self.backend
            .get(object_id, branch_id, version)?
            .ok_or_else(|| Error::VersionNotFound {
                object_id: object_id.to_string(),
                version,
            })
    }

    /// Encode, optionally delta, transform, checksum and persist the next
    /// version in a scope. Caller must hold the object lock.
    fn append(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        snapshot: &WorkflowSnapshot,
        author: &str,
        description: Option<&str>,
        decorate: impl FnOnce(VersionRecord) -> VersionRecord,
    ) -> Result<VersionRecord> {
        let version = self.backend.max_version(object_id, branch_id)? + 1;

        let (encoded, encoding) = self.encode(object_id, branch_id, snapshot, version)?;
        let body = self.transform.compress(&encoded)?;
        let checksum = compute_checksum(&body);
        let body_size = body.len();

        let record = decorate(VersionRecord {
            object_id: object_id.to_string(),
            branch_id: branch_id.map(str::to_string),
            version,
            body,
            checksum,
            encoding,
            status: VersionStatus::Active,
            created_by: author.to_string(),
            created_at: Utc::now(),
            description: description.map(str::to_string),
            tags: Vec::new(),
            based_on_version: None,
            rollback_from_version: None,
            rollback_reason: None,
            merge_from_branch: None,
            merge_strategy: None,
            merge_base_version: None,
            body_size,
        });

        self.backend.put(record.clone())?;
        self.cache_insert(object_id, branch_id, version, snapshot.clone());
        Ok(record)
    }

    /// Choose between full and delta encoding for a new version
    fn encode(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        snapshot: &WorkflowSnapshot,
        version: u32,
    ) -> Result<(Vec<u8>, BodyEncoding)> {
        let full = snapshot.to_canonical_bytes()?;

        let force_full = version == 1
            || !self.config.delta_storage
            || version % self.config.full_snapshot_interval == 0;
        if force_full {
            return Ok((full, BodyEncoding::Full));
        }

        let base_version = version - 1;
        let base = match self.materialize(object_id, branch_id, base_version) {
            Ok(base) => base,
            // Predecessor cannot be replayed; fall back to a full snapshot
            Err(_) => return Ok((full, BodyEncoding::Full)),
        };

        let delta = SnapshotDelta::compute(&base, snapshot, base_version)?;
        let encoded = serde_json::to_vec(&delta)?;
        if encoded.len() >= full.len() {
            return Ok((full, BodyEncoding::Full));
        }
        Ok((encoded, BodyEncoding::Delta { base_version }))
    }

    /// Verify, decompress and replay a stored version into a snapshot
    fn materialize(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Result<WorkflowSnapshot> {
        if let Some(hit) = self.cache_get(object_id, branch_id, version) {
            return Ok(hit);
        }

        // Walk back to the nearest full snapshot, collecting deltas to
        // replay on the way up.
        let mut pending: Vec<SnapshotDelta> = Vec::new();
        let mut current = version;
        let snapshot = loop {
            let record = match self.backend.get(object_id, branch_id, current)? {
                Some(record) => record,
                None if current == version => {
                    return Err(Error::VersionNotFound {
                        object_id: object_id.to_string(),
                        version,
                    });
                }
                None => {
                    return Err(Error::DeltaBaseMissing {
                        object_id: object_id.to_string(),
                        version,
                        base_version: current,
                    });
                }
            };

            let actual = compute_checksum(&record.body);
            if actual != record.checksum {
                return Err(Error::CorruptedVersion {
                    object_id: object_id.to_string(),
                    version: current,
                    expected: record.checksum,
                    actual,
                });
            }

            let decoded = self.transform.decompress(&record.body)?;
            match record.encoding {
                BodyEncoding::Full => {
                    break WorkflowSnapshot::from_canonical_bytes(&decoded)?;
                }
                BodyEncoding::Delta { base_version } => {
                    if pending.len() >= self.config.max_delta_chain {
                        return Err(Error::DeltaChainTooLong {
                            object_id: object_id.to_string(),
                            version,
                            max: self.config.max_delta_chain,
                        });
                    }
                    let delta: SnapshotDelta = serde_json::from_slice(&decoded)?;
                    pending.push(delta);
                    current = base_version;
                }
            }
        };

        let mut snapshot = snapshot;
        for delta in pending.iter().rev() {
            snapshot = delta.apply(&snapshot)?;
        }

        self.cache_insert(object_id, branch_id, version, snapshot.clone());
        Ok(snapshot)
    }

    /// Caller must hold the object lock
    fn prune_locked(&self, object_id: &str, keep_last: usize) -> Result<usize> {
        let records = self.list_versions(object_id)?;
        if records.len() <= keep_last {
            return Ok(0);
        }

        let cutoff = records.len() - keep_last;
        let mut pruned = 0;
        for record in &records[..cutoff] {
            let retained = record.version == 1
                || !record.tags.is_empty()
                || matches!(
                    record.status,
                    VersionStatus::Rollback | VersionStatus::Merged
                );
            if retained {
                continue;
            }
            self.backend
                .set_status(object_id, None, record.version, VersionStatus::Deleted)?;
            pruned += 1;
        }

        if pruned > 0 {
            tracing::debug!(object_id, pruned, keep_last, "pruned old versions");
        }
        Ok(pruned)
    }

    fn cache_key(object_id: &str, branch_id: Option<&str>) -> String {
        match branch_id {
            Some(branch) => format!("{object_id}@{branch}"),
            None => object_id.to_string(),
        }
    }

    fn cache_get(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
    ) -> Option<WorkflowSnapshot> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get_mut(&Self::cache_key(object_id, branch_id))
            .and_then(|scope| scope.get(version))
    }

    fn cache_insert(
        &self,
        object_id: &str,
        branch_id: Option<&str>,
        version: u32,
        snapshot: WorkflowSnapshot,
    ) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry(Self::cache_key(object_id, branch_id))
            .or_default()
            .insert(version, snapshot, self.config.cache_per_object);
    }
}

fn hold(lock: &Arc<Mutex<()>>) -> Result<MutexGuard<'_, ()>> {
    lock.lock()
        .map_err(|_| Error::persistence("object lock poisoned"))
}

/// Field-wise combination of a target version and a branch tip.
///
/// Branch basic fields win when set; node and connection lists are
/// concatenated with value-equal duplicates dropped; branch config entries
/// overlay the target's.
fn three_way_merge(ours: &WorkflowSnapshot, theirs: &WorkflowSnapshot) -> WorkflowSnapshot {
    let mut merged = ours.clone();

    if theirs.name.is_some() {
        merged.name = theirs.name.clone();
    }
    if theirs.description.is_some() {
        merged.description = theirs.description.clone();
    }
    if theirs.category.is_some() {
        merged.category = theirs.category.clone();
    }

    for node in &theirs.nodes {
        if !merged.nodes.contains(node) {
            merged.nodes.push(node.clone());
        }
    }
    for connection in &theirs.connections {
        if !merged.connections.contains(connection) {
            merged.connections.push(connection.clone());
        }
    }
    for (key, value) in &theirs.config {
        merged.config.insert(key.clone(), value.clone());
    }

    merged
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}
