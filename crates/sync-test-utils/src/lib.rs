//! Shared test utilities for the workflow-sync workspace.
//!
//! This crate provides standardised test fixtures to eliminate duplication
//! across crate test suites. It is a dev-dependency only and never published.
//!
//! # Modules
//!
//! - [`fixtures`]: sample workflow snapshots and side states
//! - [`remote`]: in-memory [`SyncSource`]/[`RemoteStore`] doubles
//!
//! [`SyncSource`]: sync_core::SyncSource
//! [`RemoteStore`]: sync_core::RemoteStore

pub mod fixtures;
pub mod remote;
