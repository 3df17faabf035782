//! Conflict detection, resolution and bookkeeping

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use sync_store::{VersionStore, WorkflowSnapshot};
use uuid::Uuid;

use crate::conflict::record::{
    ConflictKind, ConflictRecord, ConflictStatus, ObjectType, Severity, SideState,
};
use crate::conflict::strategy::{ResolutionStrategy, pick_winner};
use crate::notify::{NotificationSink, NullSink, SyncEvent};
use crate::{Error, Result};

/// Tuning knobs for a [`ConflictRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Auto-resolution attempts before the registry gives up
    pub max_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Aggregate view over all conflict records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    /// Detections per calendar day (`YYYY-MM-DD`)
    pub by_day: BTreeMap<String, usize>,
}

/// Registry of detected conflicts and their resolutions
///
/// Holds every record in memory; winning snapshots are written through to
/// the [`VersionStore`] on resolution. State-changing operations on one
/// conflict id are serialized through a per-id guard, so a resolve in
/// flight cannot interleave with an ignore or a second resolve.
pub struct ConflictRegistry {
    store: Arc<VersionStore>,
    sink: Arc<dyn NotificationSink>,
    config: RegistryConfig,
    records: Mutex<HashMap<String, ConflictRecord>>,
    /// Per-conflict mutexes, created lazily on first use
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConflictRegistry {
    pub fn new(store: Arc<VersionStore>) -> Self {
        Self {
            store,
            sink: Arc::new(NullSink),
            config: RegistryConfig::default(),
            records: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Check two sides of an object for genuine divergence.
    ///
    /// Equal content is never a conflict, whatever the version numbers say:
    /// a pure version gap means one side is simply behind and can
    /// fast-forward. Re-detecting a divergence that already has a pending
    /// record refreshes and returns that record instead of creating a
    /// duplicate.
    pub fn detect(
        &self,
        object_type: ObjectType,
        object_id: &str,
        local: SideState,
        remote: SideState,
    ) -> Result<Option<ConflictRecord>> {
        if local.snapshot == remote.snapshot {
            return Ok(None);
        }

        let (kind, severity) = classify(&local, &remote);
        let hash =
            ConflictRecord::hash_for(object_type, object_id, local.version, remote.version);

        let mut records = self.lock()?;
        if let Some(existing) = records
            .values_mut()
            .find(|r| r.conflict_hash == hash && r.status == ConflictStatus::Pending)
        {
            existing.local = local;
            existing.remote = remote;
            tracing::debug!(
                conflict_id = %existing.id,
                object_id,
                "re-detected pending conflict"
            );
            return Ok(Some(existing.clone()));
        }

        let record = ConflictRecord {
            id: Uuid::new_v4().to_string(),
            object_type,
            object_id: object_id.to_string(),
            local,
            remote,
            kind,
            severity,
            status: ConflictStatus::Pending,
            conflict_hash: hash,
            detected_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_strategy: None,
            resolution_notes: None,
            retry_count: 0,
            last_retry_at: None,
        };
        records.insert(record.id.clone(), record.clone());
        drop(records);

        tracing::info!(
            conflict_id = %record.id,
            object_id,
            kind = ?record.kind,
            severity = %record.severity,
            "detected conflict"
        );
        self.sink.notify(SyncEvent::ConflictDetected {
            conflict_id: record.id.clone(),
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            severity: record.severity.to_string(),
        });
        Ok(Some(record))
    }

    /// Resolve a pending conflict with an explicit strategy.
    ///
    /// On success the winning snapshot is appended to the version store and
    /// the record moves to `Resolved`. A failed merge leaves the record
    /// pending.
    pub fn resolve(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        notes: Option<&str>,
        manual_payload: Option<&WorkflowSnapshot>,
    ) -> Result<ConflictRecord> {
        self.resolve_as(
            conflict_id,
            strategy,
            resolved_by,
            notes,
            manual_payload,
            ConflictStatus::Resolved,
        )
    }

    /// Mark a pending conflict as ignored
    pub fn ignore(&self, conflict_id: &str, notes: Option<&str>, actor: &str) -> Result<ConflictRecord> {
        let guard = self.op_lock(conflict_id);
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());

        let mut records = self.lock()?;
        let record = require(&mut records, conflict_id)?;
        check_transition(record, ConflictStatus::Ignored)?;
        record.status = ConflictStatus::Ignored;
        record.resolved_at = Some(Utc::now());
        record.resolved_by = Some(actor.to_string());
        record.resolution_notes = notes.map(str::to_string);
        Ok(record.clone())
    }

    /// Reopen a resolved or ignored conflict.
    ///
    /// Auto-resolved records cannot be reopened; re-detection creates a
    /// fresh record for them instead.
    pub fn reopen(&self, conflict_id: &str, notes: Option<&str>) -> Result<ConflictRecord> {
        let guard = self.op_lock(conflict_id);
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());

        let mut records = self.lock()?;
        let record = require(&mut records, conflict_id)?;
        check_transition(record, ConflictStatus::Pending)?;
        record.status = ConflictStatus::Pending;
        record.clear_resolution();
        record.resolution_notes = notes.map(str::to_string);
        tracing::info!(conflict_id, "reopened conflict");
        Ok(record.clone())
    }

    /// Resolve automatically by policy: latest timestamp wins, falling back
    /// to a merge when the timestamps tie.
    ///
    /// Failures count against the retry ceiling; once `max_retries` attempts
    /// have failed the record stays pending for a human and further calls
    /// are refused without another attempt.
    pub fn auto_resolve(&self, conflict_id: &str) -> Result<ConflictRecord> {
        let guard = self.op_lock(conflict_id);
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());

        let (strategy, retries) = {
            let mut records = self.lock()?;
            let record = require(&mut records, conflict_id)?;
            if record.status != ConflictStatus::Pending {
                return Err(Error::InvalidConflictTransition {
                    conflict_id: conflict_id.to_string(),
                    from: record.status,
                    to: ConflictStatus::AutoResolved,
                });
            }
            let strategy = if record.local.updated_at == record.remote.updated_at {
                ResolutionStrategy::Merge
            } else {
                ResolutionStrategy::TimestampPriority
            };
            (strategy, record.retry_count)
        };

        if retries >= self.config.max_retries {
            return Err(Error::UnresolvableConflict {
                conflict_id: conflict_id.to_string(),
                reason: format!("auto-resolution gave up after {retries} attempts"),
            });
        }

        match self.resolve_under_guard(
            conflict_id,
            strategy,
            "auto-resolver",
            Some("resolved by policy"),
            None,
            ConflictStatus::AutoResolved,
        ) {
            Ok(record) => {
                self.sink.notify(SyncEvent::ConflictAutoResolved {
                    conflict_id: record.id.clone(),
                    object_id: record.object_id.clone(),
                    strategy: strategy.to_string(),
                });
                Ok(record)
            }
            Err(err) => {
                let mut records = self.lock()?;
                if let Some(record) = records.get_mut(conflict_id) {
                    record.retry_count = retries + 1;
                    record.last_retry_at = Some(Utc::now());
                    if record.retry_count >= self.config.max_retries {
                        tracing::warn!(
                            conflict_id,
                            retries = record.retry_count,
                            "auto-resolution exhausted; leaving conflict pending"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Fetch one record by id
    pub fn get(&self, conflict_id: &str) -> Result<ConflictRecord> {
        let mut records = self.lock()?;
        require(&mut records, conflict_id).map(|r| r.clone())
    }

    /// Pending conflicts, most severe first, oldest first within a severity
    pub fn pending(&self) -> Result<Vec<ConflictRecord>> {
        let records = self.lock()?;
        let mut pending: Vec<_> = records
            .values()
            .filter(|r| r.status == ConflictStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.detected_at.cmp(&b.detected_at))
        });
        Ok(pending)
    }

    /// All records in a given status
    pub fn by_status(&self, status: ConflictStatus) -> Result<Vec<ConflictRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    /// All records at a given severity
    pub fn by_severity(&self, severity: Severity) -> Result<Vec<ConflictRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .filter(|r| r.severity == severity)
            .cloned()
            .collect())
    }

    /// All records for one object
    pub fn for_object(&self, object_id: &str) -> Result<Vec<ConflictRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .filter(|r| r.object_id == object_id)
            .cloned()
            .collect())
    }

    /// Pending conflicts older than `threshold` at `now`
    pub fn timed_out(&self, threshold: Duration, now: DateTime<Utc>) -> Result<Vec<ConflictRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .filter(|r| r.status == ConflictStatus::Pending && now - r.detected_at > threshold)
            .cloned()
            .collect())
    }

    /// Aggregate statistics over all records
    pub fn statistics(&self) -> Result<ConflictStatistics> {
        let records = self.lock()?;
        let mut stats = ConflictStatistics {
            total: records.len(),
            by_status: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            by_day: BTreeMap::new(),
        };
        for record in records.values() {
            *stats
                .by_status
                .entry(format!("{:?}", record.status).to_lowercase())
                .or_insert(0) += 1;
            *stats
                .by_kind
                .entry(format!("{:?}", record.kind).to_lowercase())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(record.severity.to_string())
                .or_insert(0) += 1;
            *stats
                .by_day
                .entry(record.detected_at.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    // ---- internals -------------------------------------------------------

    fn resolve_as(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        notes: Option<&str>,
        manual_payload: Option<&WorkflowSnapshot>,
        target_status: ConflictStatus,
    ) -> Result<ConflictRecord> {
        let guard = self.op_lock(conflict_id);
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());
        self.resolve_under_guard(
            conflict_id,
            strategy,
            resolved_by,
            notes,
            manual_payload,
            target_status,
        )
    }

    /// Caller must hold the per-conflict guard. The records lock is still
    /// released around the store write, but the guard keeps any other
    /// state change on this conflict out of that window.
    fn resolve_under_guard(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        resolved_by: &str,
        notes: Option<&str>,
        manual_payload: Option<&WorkflowSnapshot>,
        target_status: ConflictStatus,
    ) -> Result<ConflictRecord> {
        let (local, remote, object_id) = {
            let mut records = self.lock()?;
            let record = require(&mut records, conflict_id)?;
            check_transition(record, target_status)?;
            (
                record.local.clone(),
                record.remote.clone(),
                record.object_id.clone(),
            )
        };

        // May fail (unresolvable merge, missing manual payload); the record
        // stays pending in that case.
        let winner = pick_winner(conflict_id, strategy, &local, &remote, manual_payload)?;

        self.store.create_version(
            &object_id,
            &winner,
            resolved_by,
            Some(&format!("conflict resolution ({strategy})")),
        )?;

        let mut records = self.lock()?;
        let record = require(&mut records, conflict_id)?;
        record.status = target_status;
        record.resolved_at = Some(Utc::now());
        record.resolved_by = Some(resolved_by.to_string());
        record.resolution_strategy = Some(strategy.to_string());
        record.resolution_notes = notes.map(str::to_string);

        tracing::info!(conflict_id, %strategy, resolved_by, "resolved conflict");
        Ok(record.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ConflictRecord>>> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Per-conflict guard serializing state changes on one conflict id
    fn op_lock(&self, conflict_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(conflict_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn require<'a>(
    records: &'a mut HashMap<String, ConflictRecord>,
    conflict_id: &str,
) -> Result<&'a mut ConflictRecord> {
    records
        .get_mut(conflict_id)
        .ok_or_else(|| Error::ConflictNotFound {
            conflict_id: conflict_id.to_string(),
        })
}

fn check_transition(record: &ConflictRecord, to: ConflictStatus) -> Result<()> {
    if record.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidConflictTransition {
            conflict_id: record.id.clone(),
            from: record.status,
            to,
        })
    }
}

/// Classify where the divergence lies and how urgent it is
fn classify(local: &SideState, remote: &SideState) -> (ConflictKind, Severity) {
    if local.version != remote.version {
        let gap = local.version.abs_diff(remote.version);
        let severity = if gap > 5 {
            Severity::Critical
        } else {
            Severity::High
        };
        return (ConflictKind::Version, severity);
    }

    let a = &local.snapshot;
    let b = &remote.snapshot;
    if a.name != b.name {
        return (ConflictKind::Name, Severity::Medium);
    }
    if a.nodes != b.nodes {
        return (ConflictKind::Nodes, Severity::High);
    }
    if a.connections != b.connections {
        return (ConflictKind::Connections, Severity::High);
    }
    if a.config != b.config {
        let differing = a
            .config
            .iter()
            .filter(|(k, v)| b.config.get(*k) != Some(v))
            .count()
            + b.config.keys().filter(|k| !a.config.contains_key(*k)).count();
        let severity = if differing > 3 {
            Severity::Medium
        } else {
            Severity::Low
        };
        return (ConflictKind::Config, severity);
    }
    (ConflictKind::Data, Severity::Medium)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use sync_store::WorkflowNode;

    fn registry() -> ConflictRegistry {
        ConflictRegistry::new(Arc::new(VersionStore::in_memory()))
    }

    fn side(name: &str, version: u32, age_secs: i64) -> SideState {
        SideState::new(
            WorkflowSnapshot::new("wf-1").with_name(name),
            version,
            Utc::now() - Duration::seconds(age_secs),
        )
    }

    fn detect(registry: &ConflictRegistry, local: SideState, remote: SideState) -> ConflictRecord {
        registry
            .detect(ObjectType::Workflow, "wf-1", local, remote)
            .unwrap()
            .expect("expected a conflict")
    }

    #[test]
    fn identical_content_is_not_a_conflict() {
        let registry = registry();
        let outcome = registry
            .detect(ObjectType::Workflow, "wf-1", side("a", 2, 0), side("a", 2, 0))
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn equal_content_with_version_gap_is_a_fast_forward() {
        let registry = registry();
        let outcome = registry
            .detect(ObjectType::Workflow, "wf-1", side("a", 1, 0), side("a", 4, 0))
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn name_divergence_is_detected_with_medium_severity() {
        let registry = registry();
        let record = detect(&registry, side("local", 2, 0), side("remote", 2, 0));
        assert_eq!(record.kind, ConflictKind::Name);
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.status, ConflictStatus::Pending);
    }

    #[test]
    fn version_divergence_outranks_field_classification() {
        let registry = registry();
        let record = detect(&registry, side("local", 2, 0), side("remote", 3, 0));
        assert_eq!(record.kind, ConflictKind::Version);
        assert_eq!(record.severity, Severity::High);

        let record = detect(&registry, side("local", 1, 0), side("remote", 9, 0));
        assert_eq!(record.severity, Severity::Critical);
    }

    #[test]
    fn node_divergence_is_high_severity() {
        let registry = registry();
        let mut local = side("same", 2, 0);
        local.snapshot.nodes.push(WorkflowNode::new("n1", "task"));
        let record = detect(&registry, local, side("same", 2, 0));
        assert_eq!(record.kind, ConflictKind::Nodes);
        assert_eq!(record.severity, Severity::High);
    }

    #[test]
    fn redetection_reuses_the_pending_record() {
        let registry = registry();
        let first = detect(&registry, side("local", 2, 0), side("remote", 2, 0));
        let second = detect(&registry, side("local2", 2, 0), side("remote", 2, 0));
        assert_eq!(first.id, second.id);
        assert_eq!(registry.pending().unwrap().len(), 1);
        // The refreshed record carries the newest sides
        assert_eq!(second.local.snapshot.name.as_deref(), Some("local2"));
    }

    #[test]
    fn resolve_writes_winner_to_store_and_closes_record() {
        let store = Arc::new(VersionStore::in_memory());
        let registry = ConflictRegistry::new(Arc::clone(&store));
        let record = detect(&registry, side("local", 2, 10), side("remote", 2, 60));

        let resolved = registry
            .resolve(
                &record.id,
                ResolutionStrategy::TimestampPriority,
                "alice",
                Some("picked newer"),
                None,
            )
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));

        // Local was updated more recently, so it won and landed in the store
        let stored = store.get_version("wf-1", 1).unwrap();
        assert_eq!(stored.name.as_deref(), Some("local"));
    }

    #[test]
    fn double_resolve_is_rejected() {
        let registry = registry();
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 5));
        registry
            .resolve(&record.id, ResolutionStrategy::ServerPriority, "alice", None, None)
            .unwrap();
        let again = registry.resolve(
            &record.id,
            ResolutionStrategy::ClientPriority,
            "bob",
            None,
            None,
        );
        assert!(matches!(
            again,
            Err(Error::InvalidConflictTransition { .. })
        ));
    }

    #[test]
    fn reopen_then_resolve_again() {
        let registry = registry();
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 5));
        registry
            .resolve(&record.id, ResolutionStrategy::ServerPriority, "alice", None, None)
            .unwrap();

        let reopened = registry.reopen(&record.id, Some("wrong side won")).unwrap();
        assert_eq!(reopened.status, ConflictStatus::Pending);
        assert!(reopened.resolved_by.is_none());
        assert_eq!(reopened.resolution_notes.as_deref(), Some("wrong side won"));

        let resolved = registry
            .resolve(&record.id, ResolutionStrategy::ClientPriority, "bob", None, None)
            .unwrap();
        assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));
    }

    #[test]
    fn ignored_conflicts_can_only_reopen() {
        let registry = registry();
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 5));
        let ignored = registry
            .ignore(&record.id, Some("noise from a test import"), "alice")
            .unwrap();
        assert_eq!(
            ignored.resolution_notes.as_deref(),
            Some("noise from a test import")
        );

        assert!(registry.ignore(&record.id, None, "bob").is_err());
        assert!(registry.reopen(&record.id, None).is_ok());
    }

    #[test]
    fn failed_merge_leaves_record_pending_and_counts_retry() {
        let registry = registry();
        // Equal timestamps force the merge fallback; contradictory names
        // make the merge fail.
        let at = Utc::now();
        let mut local = side("alpha", 2, 0);
        let mut remote = side("beta", 2, 0);
        local.updated_at = at;
        remote.updated_at = at;
        let record = detect(&registry, local, remote);

        assert!(registry.auto_resolve(&record.id).is_err());
        let after = registry.get(&record.id).unwrap();
        assert_eq!(after.status, ConflictStatus::Pending);
        assert_eq!(after.retry_count, 1);
        assert!(after.last_retry_at.is_some());
    }

    #[test]
    fn auto_resolve_with_distinct_timestamps_uses_newer_side() {
        let store = Arc::new(VersionStore::in_memory());
        let registry = ConflictRegistry::new(Arc::clone(&store));
        let record = detect(&registry, side("newer", 2, 1), side("older", 2, 120));

        let resolved = registry.auto_resolve(&record.id).unwrap();
        assert_eq!(resolved.status, ConflictStatus::AutoResolved);
        assert_eq!(store.get_version("wf-1", 1).unwrap().name.as_deref(), Some("newer"));

        // Auto-resolved records cannot be reopened
        assert!(registry.reopen(&record.id, None).is_err());
    }

    #[test]
    fn pending_sorts_by_severity_then_age() {
        let registry = registry();
        // Medium severity (name), older
        let medium = detect(&registry, side("a", 2, 0), side("b", 2, 0));
        // High severity (version gap) on a different hash
        let high = registry
            .detect(ObjectType::Workflow, "wf-1", side("c", 3, 0), side("d", 4, 0))
            .unwrap()
            .unwrap();

        let pending = registry.pending().unwrap();
        assert_eq!(pending[0].id, high.id);
        assert_eq!(pending[1].id, medium.id);
    }

    #[test]
    fn timed_out_finds_old_pending_records() {
        let registry = registry();
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 0));
        let later = Utc::now() + Duration::hours(2);
        let stale = registry.timed_out(Duration::hours(1), later).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, record.id);

        assert!(registry
            .timed_out(Duration::hours(3), later)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn statistics_group_records() {
        let registry = registry();
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 0));
        registry
            .resolve(&record.id, ResolutionStrategy::ServerPriority, "alice", None, None)
            .unwrap();
        registry
            .detect(ObjectType::Workflow, "wf-1", side("c", 3, 0), side("d", 4, 0))
            .unwrap();

        let stats = registry.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status["resolved"], 1);
        assert_eq!(stats.by_status["pending"], 1);
        assert_eq!(stats.by_kind["name"], 1);
        assert_eq!(stats.by_kind["version"], 1);
    }

    #[test]
    fn detection_notifies_the_sink() {
        let sink = Arc::new(crate::notify::RecordingSink::new());
        let registry = ConflictRegistry::new(Arc::new(VersionStore::in_memory()))
            .with_sink(sink.clone());
        detect(&registry, side("a", 2, 0), side("b", 2, 0));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SyncEvent::ConflictDetected { .. }));
    }

    #[test]
    fn auto_resolve_refuses_once_the_retry_ceiling_is_hit() {
        let registry = ConflictRegistry::new(Arc::new(VersionStore::in_memory()))
            .with_config(RegistryConfig { max_retries: 2 });
        // Equal timestamps force the merge fallback, contradictory names
        // make every attempt fail.
        let at = Utc::now();
        let mut local = side("alpha", 2, 0);
        let mut remote = side("beta", 2, 0);
        local.updated_at = at;
        remote.updated_at = at;
        let record = detect(&registry, local, remote);

        // Two genuine attempts fail and count against the ceiling
        assert!(registry.auto_resolve(&record.id).is_err());
        assert!(registry.auto_resolve(&record.id).is_err());
        assert_eq!(registry.get(&record.id).unwrap().retry_count, 2);

        // Further calls are refused without another attempt; the counter
        // stops moving and the record stays pending for a human
        for _ in 0..3 {
            let refused = registry.auto_resolve(&record.id);
            assert!(matches!(refused, Err(Error::UnresolvableConflict { .. })));
        }
        let after = registry.get(&record.id).unwrap();
        assert_eq!(after.retry_count, 2);
        assert_eq!(after.status, ConflictStatus::Pending);
    }

    /// Pauses the first store write once armed, so a test can schedule a
    /// competing operation inside a resolve's write window.
    #[derive(Default)]
    struct WriteGate {
        state: Mutex<GateState>,
        cond: std::sync::Condvar,
    }

    #[derive(Default)]
    struct GateState {
        armed: bool,
        entered: bool,
        released: bool,
    }

    impl WriteGate {
        fn arm(&self) {
            self.state.lock().unwrap().armed = true;
        }

        fn wait_entered(&self) {
            let mut state = self.state.lock().unwrap();
            while !state.entered {
                state = self.cond.wait(state).unwrap();
            }
        }

        fn release(&self) {
            self.state.lock().unwrap().released = true;
            self.cond.notify_all();
        }

        fn pause_if_armed(&self) {
            let mut state = self.state.lock().unwrap();
            if !state.armed {
                return;
            }
            state.armed = false;
            state.entered = true;
            self.cond.notify_all();
            while !state.released {
                state = self.cond.wait(state).unwrap();
            }
        }
    }

    struct GatedBackend {
        inner: sync_store::MemoryBackend,
        gate: Arc<WriteGate>,
    }

    impl sync_store::VersionBackend for GatedBackend {
        fn put(&self, record: sync_store::VersionRecord) -> sync_store::Result<()> {
            self.gate.pause_if_armed();
            self.inner.put(record)
        }

        fn get(
            &self,
            object_id: &str,
            branch_id: Option<&str>,
            version: u32,
        ) -> sync_store::Result<Option<sync_store::VersionRecord>> {
            self.inner.get(object_id, branch_id, version)
        }

        fn list(
            &self,
            object_id: &str,
            branch_id: Option<&str>,
        ) -> sync_store::Result<Vec<sync_store::VersionRecord>> {
            self.inner.list(object_id, branch_id)
        }

        fn max_version(&self, object_id: &str, branch_id: Option<&str>) -> sync_store::Result<u32> {
            self.inner.max_version(object_id, branch_id)
        }

        fn set_status(
            &self,
            object_id: &str,
            branch_id: Option<&str>,
            version: u32,
            status: sync_store::VersionStatus,
        ) -> sync_store::Result<()> {
            self.inner.set_status(object_id, branch_id, version, status)
        }

        fn add_tag(
            &self,
            object_id: &str,
            version: u32,
            tag: sync_store::VersionTag,
        ) -> sync_store::Result<()> {
            self.inner.add_tag(object_id, version, tag)
        }

        fn put_branch(&self, branch: sync_store::Branch) -> sync_store::Result<()> {
            self.inner.put_branch(branch)
        }

        fn get_branch(
            &self,
            object_id: &str,
            branch_id: &str,
        ) -> sync_store::Result<Option<sync_store::Branch>> {
            self.inner.get_branch(object_id, branch_id)
        }

        fn list_branches(&self, object_id: &str) -> sync_store::Result<Vec<sync_store::Branch>> {
            self.inner.list_branches(object_id)
        }

        fn close_branch(
            &self,
            object_id: &str,
            branch_id: &str,
            reason: &str,
        ) -> sync_store::Result<()> {
            self.inner.close_branch(object_id, branch_id, reason)
        }
    }

    #[test]
    fn ignore_cannot_slip_inside_an_in_flight_resolve() {
        use std::thread;

        let gate = Arc::new(WriteGate::default());
        let backend = Arc::new(GatedBackend {
            inner: sync_store::MemoryBackend::new(),
            gate: Arc::clone(&gate),
        });
        let registry = Arc::new(ConflictRegistry::new(Arc::new(VersionStore::new(backend))));
        let record = detect(&registry, side("a", 2, 0), side("b", 2, 5));

        // Pause the resolve inside its version write, then try to ignore
        // the same conflict from another thread.
        gate.arm();
        let resolver = {
            let registry = Arc::clone(&registry);
            let id = record.id.clone();
            thread::spawn(move || {
                registry.resolve(&id, ResolutionStrategy::ServerPriority, "alice", None, None)
            })
        };
        gate.wait_entered();

        let ignorer = {
            let registry = Arc::clone(&registry);
            let id = record.id.clone();
            thread::spawn(move || registry.ignore(&id, None, "bob"))
        };
        // Let the ignore reach the per-conflict guard before unblocking
        thread::sleep(std::time::Duration::from_millis(50));
        gate.release();

        let resolved = resolver.join().unwrap().unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        let ignored = ignorer.join().unwrap();
        assert!(matches!(
            ignored,
            Err(Error::InvalidConflictTransition { .. })
        ));

        let settled = registry.get(&record.id).unwrap();
        assert_eq!(settled.status, ConflictStatus::Resolved);
        assert_eq!(settled.resolved_by.as_deref(), Some("alice"));
    }
}
