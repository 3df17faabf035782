//! Sync task model and execution contract

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::conflict::ObjectType;

/// Lifecycle status of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
    /// Execution surfaced a conflict that needs separate resolution
    Conflict,
}

impl TaskStatus {
    /// Terminal tasks live in the history ring and never run again
    /// (except via an explicit retry for `Failed` and `Timeout`)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// One unit of synchronization work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: String,
    pub kind: ObjectType,
    /// Object the task synchronizes
    pub object_id: String,
    /// Lower runs sooner; ties dispatch in enqueue order
    pub priority: i64,
    /// Monotone enqueue sequence, breaks priority ties FIFO
    pub seq: u64,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Wall-clock budget for one execution attempt
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl SyncTask {
    pub fn new(kind: ObjectType, object_id: &str, priority: i64, seq: u64, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            object_id: object_id.to_string(),
            priority,
            seq,
            status: TaskStatus::Pending,
            retry_count: 0,
            timeout,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    /// Dispatch key: lowest priority first, FIFO within a priority
    pub fn dispatch_key(&self) -> (i64, u64) {
        (self.priority, self.seq)
    }
}

/// What one execution attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The item synchronized cleanly
    Completed { result: Option<String> },
    /// Divergence was found; the task ends in `Conflict` and is not retried
    Conflict { detail: String },
}

/// Cooperative cancellation flag shared between the queue and a running task
///
/// Executors must check [`CancelFlag::is_cancelled`] between major steps of
/// long-running work; the queue never interrupts a thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes queued tasks; injected into the queue at construction
pub trait TaskExecutor: Send + Sync {
    /// Run one task to completion or until `cancel` is observed.
    ///
    /// # Errors
    ///
    /// An error marks the attempt failed; the queue decides between retry
    /// and terminal failure.
    fn execute(&self, task: &SyncTask, cancel: &CancelFlag) -> Result<TaskOutcome>;
}

/// Store `Duration` as integer milliseconds
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
