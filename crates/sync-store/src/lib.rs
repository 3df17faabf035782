//! Versioned storage layer for workflow synchronization
//!
//! This crate provides the append-only version store that the sync engine
//! builds on, implementing:
//!
//! - **Version history**: checksum-verified, append-only records per object
//! - **Delta encoding**: field-level deltas with bounded replay chains
//! - **Branch/merge/rollback**: expressed as new versions, never rewrites
//! - **Pluggable persistence**: in-memory and locked-JSON-file backends
//!
//! # Architecture
//!
//! `sync-store` is the leaf crate of the workspace:
//!
//! ```text
//!        sync-core (conflicts, queue, coordinator)
//!                        |
//!                   sync-store
//!                        |
//!          MemoryBackend | FileBackend
//! ```
//!
//! # Example
//!
//! ```
//! use sync_store::{VersionStore, WorkflowSnapshot};
//!
//! fn example() -> sync_store::Result<()> {
//!     let store = VersionStore::in_memory();
//!     let snapshot = WorkflowSnapshot::new("wf-1").with_name("Invoice approval");
//!     let record = store.create_version("wf-1", &snapshot, "alice", None)?;
//!     assert_eq!(record.version, 1);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checksum;
pub mod delta;
pub mod diff;
pub mod error;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod transform;

pub use backend::{FileBackend, MemoryBackend, VersionBackend};
pub use checksum::{compute_checksum, compute_content_checksum};
pub use delta::SnapshotDelta;
pub use diff::{ChangeKind, VersionDiff};
pub use error::{Error, Result};
pub use record::{BodyEncoding, Branch, VersionRecord, VersionStatus, VersionTag};
pub use snapshot::{WorkflowConnection, WorkflowNode, WorkflowSnapshot};
pub use store::{MergeStrategy, StoreConfig, VersionStatistics, VersionStore};
pub use transform::{IdentityTransform, PayloadTransform};
