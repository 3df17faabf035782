//! Sync run orchestration
//!
//! The coordinator walks the local set of syncable items, compares each
//! against its remote counterpart through the conflict registry, and
//! either pushes, resolves, or records a conflict. Full sync visits
//! everything in fixed batches; delta sync only visits items modified
//! since their persisted watermark.

mod watermark;

pub use watermark::Watermarks;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::conflict::{ConflictRegistry, ObjectType, ResolutionStrategy, SideState};
use crate::notify::{NotificationSink, NullSink, SyncEvent};
use crate::{Error, Result};

/// One locally syncable object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub object_type: ObjectType,
    pub object_id: String,
    pub last_modified: DateTime<Utc>,
}

/// Local side of the sync: enumerates items and loads their state
pub trait SyncSource: Send + Sync {
    /// All syncable items currently known locally
    fn scan(&self) -> Result<Vec<SyncItem>>;

    /// Load the local state of one item
    fn load(&self, item: &SyncItem) -> Result<SideState>;
}

/// Remote side of the sync: serves remote state and accepts pushes
pub trait RemoteStore: Send + Sync {
    /// Remote state of an item, `None` when the remote has never seen it
    fn fetch(&self, item: &SyncItem) -> Result<Option<SideState>>;

    /// Push a resolved snapshot to the remote
    fn push(&self, item: &SyncItem, snapshot: &sync_store::WorkflowSnapshot) -> Result<()>;
}

/// Kind of sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Full,
    Delta,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Delta => f.write_str("delta"),
        }
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunReport {
    pub run_id: String,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items that flowed through the pipeline
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Conflicts left pending for later resolution
    pub conflicts: usize,
    pub messages: Vec<String>,
    /// True when no item hard-failed; pending conflicts do not fail a run
    pub success: bool,
    /// True when the run was skipped because another one was in flight
    pub already_running: bool,
}

impl SyncRunReport {
    fn skipped(kind: RunKind) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            kind,
            started_at: now,
            finished_at: now,
            total: 0,
            succeeded: 0,
            failed: 0,
            conflicts: 0,
            messages: vec!["a sync run is already in progress".to_string()],
            success: false,
            already_running: true,
        }
    }
}

/// Tuning knobs for a [`SyncCoordinator`]
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Items per batch during a run
    pub batch_size: usize,
    /// Pause between batches; set to zero in tests
    pub batch_delay: Duration,
    /// Strategy applied to detected conflicts. `None` leaves every
    /// conflict pending; an unresolvable merge also leaves it pending.
    pub default_strategy: Option<ResolutionStrategy>,
    /// Watermark file; memory-only when unset
    pub watermark_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(5),
            default_strategy: Some(ResolutionStrategy::Merge),
            watermark_path: None,
        }
    }
}

/// Orchestrates full and delta sync runs between a source and a remote
pub struct SyncCoordinator {
    source: Arc<dyn SyncSource>,
    remote: Arc<dyn RemoteStore>,
    registry: Arc<ConflictRegistry>,
    sink: Arc<dyn NotificationSink>,
    config: CoordinatorConfig,
    running: AtomicBool,
    watermarks: Mutex<Watermarks>,
}

impl SyncCoordinator {
    /// Build a coordinator; loads watermarks from disk when a path is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the watermark file exists but cannot be read.
    pub fn new(
        source: Arc<dyn SyncSource>,
        remote: Arc<dyn RemoteStore>,
        registry: Arc<ConflictRegistry>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let watermarks = match &config.watermark_path {
            Some(path) => Watermarks::load(path)?,
            None => Watermarks::new(),
        };
        Ok(Self {
            source,
            remote,
            registry,
            sink: Arc::new(NullSink),
            config,
            running: AtomicBool::new(false),
            watermarks: Mutex::new(watermarks),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sync every local item.
    pub fn full_sync(&self, actor: &str) -> Result<SyncRunReport> {
        self.run(RunKind::Full, actor)
    }

    /// Sync only items modified since their watermark.
    pub fn delta_sync(&self, actor: &str) -> Result<SyncRunReport> {
        self.run(RunKind::Delta, actor)
    }

    fn run(&self, kind: RunKind, actor: &str) -> Result<SyncRunReport> {
        // Only one run at a time; a concurrent caller gets a structured
        // skip report rather than an error.
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(SyncRunReport::skipped(kind));
        }
        let result = self.run_inner(kind, actor);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_inner(&self, kind: RunKind, actor: &str) -> Result<SyncRunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!(run_id = %run_id, %kind, actor, "starting sync run");

        let mut items = self.source.scan()?;
        if kind == RunKind::Delta {
            let marks = self.marks();
            items.retain(|i| marks.is_stale(i.object_type, &i.object_id, i.last_modified));
        }

        let mut report = SyncRunReport {
            run_id: run_id.clone(),
            kind,
            started_at,
            finished_at: started_at,
            total: items.len(),
            succeeded: 0,
            failed: 0,
            conflicts: 0,
            messages: Vec::new(),
            success: true,
            already_running: false,
        };

        let mut first_batch = true;
        for batch in items.chunks(self.config.batch_size.max(1)) {
            if !first_batch && !self.config.batch_delay.is_zero() {
                std::thread::sleep(self.config.batch_delay);
            }
            first_batch = false;

            for item in batch {
                match self.sync_item(item, actor) {
                    Ok(ItemOutcome::Synced) => {
                        report.succeeded += 1;
                        self.advance_watermark(item);
                    }
                    Ok(ItemOutcome::ConflictPending(conflict_id)) => {
                        report.conflicts += 1;
                        report
                            .messages
                            .push(format!("{}: conflict {conflict_id} pending", item.object_id));
                    }
                    Err(err) => {
                        // Per-item failures never abort the run
                        let wrapped = Error::sync_item(
                            item.object_type.to_string(),
                            &item.object_id,
                            err.to_string(),
                        );
                        tracing::warn!(object_id = %item.object_id, error = %err, "item sync failed");
                        report.failed += 1;
                        report.messages.push(wrapped.to_string());
                    }
                }
            }
        }

        self.persist_watermarks(&mut report);

        report.finished_at = Utc::now();
        report.success = report.failed == 0;
        tracing::info!(
            run_id = %run_id,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            conflicts = report.conflicts,
            "sync run finished"
        );
        self.sink.notify(SyncEvent::SyncRunCompleted {
            run_id,
            kind: kind.to_string(),
            success: report.success,
            total: report.total,
            failed: report.failed,
            conflicts: report.conflicts,
            finished_at: report.finished_at,
        });
        Ok(report)
    }

    fn sync_item(&self, item: &SyncItem, actor: &str) -> Result<ItemOutcome> {
        let local = self.source.load(item)?;

        let Some(remote) = self.remote.fetch(item)? else {
            // Remote has never seen this item; plain upload
            self.remote.push(item, &local.snapshot)?;
            return Ok(ItemOutcome::Synced);
        };

        let Some(conflict) =
            self.registry
                .detect(item.object_type, &item.object_id, local, remote)?
        else {
            // No divergence; nothing to move in either direction
            return Ok(ItemOutcome::Synced);
        };

        let Some(strategy) = self.config.default_strategy else {
            return Ok(ItemOutcome::ConflictPending(conflict.id));
        };

        match self.registry.resolve(&conflict.id, strategy, actor, None, None) {
            Ok(resolved) => {
                let winner = crate::conflict::pick_winner(
                    &resolved.id,
                    strategy,
                    &resolved.local,
                    &resolved.remote,
                    None,
                )?;
                self.remote.push(item, &winner)?;
                Ok(ItemOutcome::Synced)
            }
            // The merge could not reconcile the sides; the record stays
            // pending and the run moves on
            Err(Error::UnresolvableConflict { .. }) => {
                Ok(ItemOutcome::ConflictPending(conflict.id))
            }
            Err(err) => Err(err),
        }
    }

    fn advance_watermark(&self, item: &SyncItem) {
        self.marks()
            .advance(item.object_type, &item.object_id, item.last_modified);
    }

    fn persist_watermarks(&self, report: &mut SyncRunReport) {
        if let Some(path) = &self.config.watermark_path {
            if let Err(err) = self.marks().save(path) {
                report.failed += 1;
                report
                    .messages
                    .push(format!("failed to persist watermarks: {err}"));
            }
        }
    }

    fn marks(&self) -> std::sync::MutexGuard<'_, Watermarks> {
        self.watermarks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum ItemOutcome {
    Synced,
    ConflictPending(String),
}
