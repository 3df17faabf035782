//! In-memory doubles for the coordinator's source and remote traits

use std::collections::HashMap;
use std::sync::Mutex;

use sync_core::{Error, RemoteStore, Result, SideState, SyncItem, SyncSource};
use sync_store::WorkflowSnapshot;

/// A [`SyncSource`] over a fixed item list with per-item states
#[derive(Default)]
pub struct InMemorySource {
    items: Mutex<Vec<SyncItem>>,
    states: Mutex<HashMap<String, SideState>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item together with its local state
    pub fn insert(&self, item: SyncItem, state: SideState) {
        self.states
            .lock()
            .unwrap()
            .insert(item.object_id.clone(), state);
        self.items.lock().unwrap().push(item);
    }
}

impl SyncSource for InMemorySource {
    fn scan(&self) -> Result<Vec<SyncItem>> {
        Ok(self.items.lock().unwrap().clone())
    }

    fn load(&self, item: &SyncItem) -> Result<SideState> {
        self.states
            .lock()
            .unwrap()
            .get(&item.object_id)
            .cloned()
            .ok_or_else(|| {
                Error::sync_item(
                    item.object_type.to_string(),
                    &item.object_id,
                    "missing local state",
                )
            })
    }
}

/// A [`RemoteStore`] backed by a map, with optional scripted failures
#[derive(Default)]
pub struct InMemoryRemote {
    states: Mutex<HashMap<String, SideState>>,
    pushed: Mutex<Vec<(String, WorkflowSnapshot)>>,
    failing: Mutex<Vec<String>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the remote copy of an object
    pub fn insert(&self, object_id: &str, state: SideState) {
        self.states
            .lock()
            .unwrap()
            .insert(object_id.to_string(), state);
    }

    /// Make `fetch` fail for this object id
    pub fn fail_for(&self, object_id: &str) {
        self.failing.lock().unwrap().push(object_id.to_string());
    }

    /// Everything pushed so far, in order
    pub fn pushed(&self) -> Vec<(String, WorkflowSnapshot)> {
        self.pushed.lock().unwrap().clone()
    }
}

impl RemoteStore for InMemoryRemote {
    fn fetch(&self, item: &SyncItem) -> Result<Option<SideState>> {
        if self.failing.lock().unwrap().contains(&item.object_id) {
            return Err(Error::sync_item(
                item.object_type.to_string(),
                &item.object_id,
                "remote unavailable",
            ));
        }
        Ok(self.states.lock().unwrap().get(&item.object_id).cloned())
    }

    fn push(&self, item: &SyncItem, snapshot: &WorkflowSnapshot) -> Result<()> {
        self.pushed
            .lock()
            .unwrap()
            .push((item.object_id.clone(), snapshot.clone()));
        Ok(())
    }
}
