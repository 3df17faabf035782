//! Outbound notifications
//!
//! Conflict detection, auto-resolution and completed sync runs emit events
//! through a [`NotificationSink`]. Delivery is fire-and-forget: the engine
//! never fails an operation because a notification could not be delivered.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// An event worth telling the outside world about
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A new conflict was detected and recorded
    ConflictDetected {
        conflict_id: String,
        object_type: String,
        object_id: String,
        severity: String,
    },
    /// A conflict was resolved automatically by policy
    ConflictAutoResolved {
        conflict_id: String,
        object_id: String,
        strategy: String,
    },
    /// A full or delta sync run finished
    SyncRunCompleted {
        run_id: String,
        kind: String,
        success: bool,
        total: usize,
        failed: usize,
        conflicts: usize,
        finished_at: DateTime<Utc>,
    },
}

/// Receiver for [`SyncEvent`]s
///
/// Implementations must not block for long; the engine calls `notify` inline.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: SyncEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: SyncEvent) {}
}

/// Sink that remembers every event, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: SyncEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
