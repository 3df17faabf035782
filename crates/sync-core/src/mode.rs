//! Work mode model
//!
//! Determines how clients interact with the server: fully online, fully
//! offline with later sync, or a mixed deployment where both are allowed.
//! The server-declared mode is authoritative; clients declare their own
//! mode in heartbeats and are checked against it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Client/server work mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Clients talk to the server directly; no local queueing.
    #[default]
    Connected,

    /// Clients work against local state and sync when a connection returns.
    Disconnected,

    /// Both connected and disconnected clients are accepted.
    Mixed,
}

impl Mode {
    /// Whether a client declaring `declared` is consistent with this
    /// server mode. `Mixed` accepts any declared mode.
    pub fn accepts(&self, declared: Mode) -> bool {
        match self {
            Mode::Mixed => true,
            server => *server == declared,
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "connected" | "online" => Ok(Mode::Connected),
            "disconnected" | "offline" => Ok(Mode::Disconnected),
            "mixed" | "hybrid" => Ok(Mode::Mixed),
            _ => Err(Error::InvalidMode {
                mode: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Connected => write!(f, "connected"),
            Mode::Disconnected => write!(f, "disconnected"),
            Mode::Mixed => write!(f, "mixed"),
        }
    }
}
