//! Mode-aware synchronization engine
//!
//! This crate coordinates synchronization between local and remote copies
//! of workflow objects, implementing:
//!
//! - **Conflict registry**: divergence detection, resolution strategies,
//!   and a strict conflict state machine
//! - **Sync queue**: bounded priority queue with a worker pool, retries
//!   and cooperative cancellation
//! - **Sync coordinator**: batched full and watermark-driven delta runs
//! - **Mode tracking**: client heartbeats checked against the
//!   authoritative server mode
//!
//! # Architecture
//!
//! ```text
//!      SyncCoordinator ---- SyncQueue ---- ModeConsistencyTracker
//!             |                 |
//!        ConflictRegistry  TaskExecutor
//!             |
//!         sync-store
//! ```
//!
//! Version history itself lives in the `sync-store` crate; everything here
//! decides *what* to write there and *when*.

pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod mode;
pub mod notify;
pub mod queue;
pub mod tracker;

pub use conflict::{
    ConflictKind, ConflictRecord, ConflictRegistry, ConflictStatistics, ConflictStatus,
    ObjectType, RegistryConfig, ResolutionStrategy, Severity, SideState,
};
pub use coordinator::{
    CoordinatorConfig, RemoteStore, RunKind, SyncCoordinator, SyncItem, SyncRunReport,
    SyncSource, Watermarks,
};
pub use error::{Error, Result};
pub use mode::Mode;
pub use notify::{NotificationSink, NullSink, RecordingSink, SyncEvent};
pub use queue::{
    CancelFlag, QueueConfig, QueueStats, SyncQueue, SyncTask, TaskExecutor, TaskOutcome,
    TaskStatus,
};
pub use tracker::{
    ClientHealth, ClientModeState, ConsistencyReport, HeartbeatOutcome, ModeConsistencyTracker,
    TrackerConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_queue_full_displays_capacity() {
        let error = Error::QueueFull { capacity: 1000 };
        let display = format!("{}", error);
        assert!(display.contains("1000"), "got: {}", display);
    }

    #[test]
    fn store_errors_convert_transparently() {
        let store_error = sync_store::Error::VersionNotFound {
            object_id: "wf-1".to_string(),
            version: 2,
        };
        let error: Error = store_error.into();
        assert!(matches!(error, Error::Store(_)));
    }
}
