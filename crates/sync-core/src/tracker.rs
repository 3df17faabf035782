//! Mode consistency tracking across clients
//!
//! Clients declare their work mode in periodic heartbeats. The tracker
//! checks each declaration against the authoritative server mode, flags
//! clients that need a corrective sync, and evicts clients that stop
//! heartbeating. All time comparisons take an explicit `now` so behavior
//! is deterministic under test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::mode::Mode;
use crate::{Error, Result};

/// Tuning knobs for a [`ModeConsistencyTracker`]
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Expected gap between heartbeats; beyond it a client counts as stale
    pub heartbeat_interval: Duration,
    /// Clients silent this long are dropped by [`ModeConsistencyTracker::cleanup_stale_clients`]
    pub eviction_threshold: Duration,
    /// Inconsistent declarations remembered per client
    pub history_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::seconds(30),
            eviction_threshold: Duration::minutes(30),
            history_limit: 10,
        }
    }
}

/// Heartbeat freshness at evaluation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientHealth {
    Healthy,
    Stale,
}

/// Everything the tracker knows about one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientModeState {
    pub client_id: String,
    pub declared: Mode,
    pub last_heartbeat: DateTime<Utc>,
    pub consistent: bool,
    /// Last administrative mode correction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_correction: Option<DateTime<Utc>>,
    /// Recent inconsistent declarations, oldest dropped first
    #[serde(default)]
    pub inconsistency_history: VecDeque<(DateTime<Utc>, Mode)>,
}

/// Verdict returned for each processed heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Declared mode is acceptable under the server mode
    pub consistent: bool,
    /// The client should run a sync: it is inconsistent, or it just came
    /// back online after working disconnected
    pub needs_sync: bool,
    /// Mode the client should switch to, when inconsistent
    pub suggested_mode: Option<Mode>,
    pub health: ClientHealth,
}

/// Fleet-wide consistency summary
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub server_mode: Mode,
    pub total_clients: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    /// Clients past the heartbeat interval at report time
    pub stale: usize,
    /// Consistent clients as a percentage of all clients (100.0 when none)
    pub consistency_rate: f64,
    pub inconsistent_clients: Vec<String>,
}

/// Tracks declared client modes against the authoritative server mode
pub struct ModeConsistencyTracker {
    server_mode: Mutex<Mode>,
    clients: Mutex<HashMap<String, ClientModeState>>,
    config: TrackerConfig,
}

impl ModeConsistencyTracker {
    pub fn new(server_mode: Mode) -> Self {
        Self::with_config(server_mode, TrackerConfig::default())
    }

    pub fn with_config(server_mode: Mode, config: TrackerConfig) -> Self {
        Self {
            server_mode: Mutex::new(server_mode),
            clients: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Current authoritative mode
    pub fn server_mode(&self) -> Mode {
        *self.server_mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the authoritative mode; takes effect from the next heartbeat
    pub fn set_server_mode(&self, mode: Mode) {
        *self.server_mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
        tracing::info!(%mode, "server mode changed");
    }

    /// Process one client heartbeat at `now`.
    ///
    /// The first heartbeat registers the client; later ones upsert its
    /// state atomically.
    pub fn process_heartbeat(
        &self,
        client_id: &str,
        declared: Mode,
        now: DateTime<Utc>,
    ) -> HeartbeatOutcome {
        let server_mode = self.server_mode();
        let consistent = server_mode.accepts(declared);

        let mut clients = self.lock_clients();
        let previous = clients.get(client_id);

        let health = match previous {
            Some(state) if now - state.last_heartbeat > self.config.heartbeat_interval => {
                ClientHealth::Stale
            }
            _ => ClientHealth::Healthy,
        };
        let reconnected = matches!(
            previous.map(|s| s.declared),
            Some(Mode::Disconnected) if declared == Mode::Connected
        );

        let state = clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientModeState {
                client_id: client_id.to_string(),
                declared,
                last_heartbeat: now,
                consistent,
                last_correction: None,
                inconsistency_history: VecDeque::new(),
            });
        state.declared = declared;
        state.last_heartbeat = now;
        state.consistent = consistent;
        if !consistent {
            state.inconsistency_history.push_back((now, declared));
            while state.inconsistency_history.len() > self.config.history_limit {
                state.inconsistency_history.pop_front();
            }
            tracing::warn!(client_id, declared = %declared, server = %server_mode, "inconsistent client mode");
        }

        HeartbeatOutcome {
            consistent,
            needs_sync: !consistent || reconnected,
            suggested_mode: if consistent { None } else { Some(server_mode) },
            health,
        }
    }

    /// State of one client, if tracked
    pub fn client(&self, client_id: &str) -> Option<ClientModeState> {
        self.lock_clients().get(client_id).cloned()
    }

    /// Administrative overwrite of a client's declared mode.
    pub fn force_sync_client_mode(
        &self,
        client_id: &str,
        mode: Mode,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let server_mode = self.server_mode();
        let mut clients = self.lock_clients();
        let state = clients
            .get_mut(client_id)
            .ok_or_else(|| Error::ClientNotFound {
                client_id: client_id.to_string(),
            })?;
        state.declared = mode;
        state.consistent = server_mode.accepts(mode);
        state.last_correction = Some(now);
        tracing::info!(client_id, %mode, "forced client mode");
        Ok(())
    }

    /// Fleet-wide consistency summary at `now`
    pub fn check_all_clients(&self, now: DateTime<Utc>) -> ConsistencyReport {
        let server_mode = self.server_mode();
        let clients = self.lock_clients();

        let total_clients = clients.len();
        let mut consistent = 0;
        let mut stale = 0;
        let mut inconsistent_clients = Vec::new();
        for state in clients.values() {
            if now - state.last_heartbeat > self.config.heartbeat_interval {
                stale += 1;
            }
            if state.consistent {
                consistent += 1;
            } else {
                inconsistent_clients.push(state.client_id.clone());
            }
        }
        inconsistent_clients.sort();

        ConsistencyReport {
            server_mode,
            total_clients,
            consistent,
            inconsistent: total_clients - consistent,
            stale,
            consistency_rate: if total_clients == 0 {
                100.0
            } else {
                consistent as f64 * 100.0 / total_clients as f64
            },
            inconsistent_clients,
        }
    }

    /// Drop clients silent past the eviction threshold. Returns how many
    /// were removed.
    pub fn cleanup_stale_clients(&self, now: DateTime<Utc>) -> usize {
        let mut clients = self.lock_clients();
        let before = clients.len();
        clients.retain(|_, state| now - state.last_heartbeat <= self.config.eviction_threshold);
        let removed = before - clients.len();
        if removed > 0 {
            tracing::info!(removed, "evicted stale clients");
        }
        removed
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<String, ClientModeState>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }
}
