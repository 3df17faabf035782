//! Error types for sync-store

/// Result type for sync-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sync-store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stored bytes no longer match the recorded checksum
    #[error("Corrupted version {object_id} v{version}: checksum mismatch (expected {expected}, got {actual})")]
    CorruptedVersion {
        object_id: String,
        version: u32,
        expected: String,
        actual: String,
    },

    /// Requested version does not exist
    #[error("Version not found: {object_id} v{version}")]
    VersionNotFound { object_id: String, version: u32 },

    /// Requested branch does not exist
    #[error("Branch not found: {branch_id}")]
    BranchNotFound { branch_id: String },

    /// Branch has been closed by a merge
    #[error("Branch {branch_id} is closed: {reason}")]
    BranchClosed { branch_id: String, reason: String },

    /// Branch exists but holds no versions
    #[error("Branch {branch_id} has no versions")]
    EmptyBranch { branch_id: String },

    /// Delta chain exceeded the configured replay bound
    #[error("Delta chain for {object_id} v{version} exceeds {max} links")]
    DeltaChainTooLong {
        object_id: String,
        version: u32,
        max: usize,
    },

    /// Delta record references a base version that cannot be materialized
    #[error("Delta base v{base_version} missing for {object_id} v{version}")]
    DeltaBaseMissing {
        object_id: String,
        version: u32,
        base_version: u32,
    },

    /// Backend storage failure
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Payload transform failure
    #[error("Transform error: {message}")]
    Transform { message: String },

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }
}
