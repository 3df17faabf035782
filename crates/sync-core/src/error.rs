//! Error types for sync-core

use crate::conflict::ConflictStatus;
use crate::queue::TaskStatus;

/// Result type for sync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Queue is at capacity; the task was not accepted
    #[error("Sync queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// No task with the given id in the queue or its history
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Operation not valid for the task's current status
    #[error("Task {task_id} is {status:?}: {reason}")]
    InvalidTaskState {
        task_id: String,
        status: TaskStatus,
        reason: String,
    },

    /// Conflict status transition not allowed by the state machine
    #[error("Conflict {conflict_id} cannot go from {from:?} to {to:?}")]
    InvalidConflictTransition {
        conflict_id: String,
        from: ConflictStatus,
        to: ConflictStatus,
    },

    /// Merge resolution could not reconcile the two sides
    #[error("Conflict {conflict_id} is unresolvable by merge: {reason}")]
    UnresolvableConflict { conflict_id: String, reason: String },

    /// No conflict record with the given id
    #[error("Conflict not found: {conflict_id}")]
    ConflictNotFound { conflict_id: String },

    /// A single item failed during a sync run; recorded, never aborts the run
    #[error("Sync failed for {object_type} {object_id}: {message}")]
    SyncItem {
        object_type: String,
        object_id: String,
        message: String,
    },

    /// Unrecognized work mode string
    #[error("Invalid mode: {mode} (expected connected, disconnected or mixed)")]
    InvalidMode { mode: String },

    /// No tracked client with the given id
    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: String },

    /// Version store failure
    #[error(transparent)]
    Store(#[from] sync_store::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML serialization error
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub fn sync_item(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SyncItem {
            object_type: object_type.into(),
            object_id: object_id.into(),
            message: message.into(),
        }
    }
}
