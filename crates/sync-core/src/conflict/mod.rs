//! Conflict detection and resolution
//!
//! The registry decides whether two copies of an object genuinely diverged,
//! records the conflict, and applies resolution strategies. Winning
//! snapshots are written through to the version store so resolution leaves
//! an auditable trail.

mod record;
mod registry;
mod strategy;

pub use record::{
    ConflictKind, ConflictRecord, ConflictStatus, ObjectType, Severity, SideState,
};
pub use registry::{ConflictRegistry, ConflictStatistics, RegistryConfig};
pub use strategy::{ResolutionStrategy, pick_winner};
