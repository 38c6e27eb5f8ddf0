//! Connection state machine.
//!
//! ```text
//!             Opened                 Dropped
//! Connecting --------> Connected ----------------+
//!     ^  |                 |                     v
//!     |  +-- Dropped ------+---- Closed ---> Disconnected
//!     |                                          |
//!     +----------------- Retry ------------------+
//! ```
//!
//! `Closed` is an intentional close and is terminal for the task.
//! `GaveUp` marks the disconnected state terminal until a manual retry.

use serde::Serialize;
use std::fmt;

/// Tri-state connection status surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Apply an event. `None` means the transition is not allowed.
    pub fn on(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self, event) {
            (Connecting, Opened) => Some(Connected),
            (Connecting | Connected, Dropped) => Some(Disconnected),
            (Disconnected, Retry) => Some(Connecting),
            (_, Closed) => Some(Disconnected),
            (Connecting | Disconnected, GaveUp) => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Transport handshake completed.
    Opened,
    /// Abnormal close, read error, heartbeat timeout or failed connect.
    Dropped,
    /// Backoff elapsed; dialing again.
    Retry,
    /// Intentional close. Never followed by a reconnect.
    Closed,
    /// Reconnect attempts exhausted.
    GaveUp,
}

/// Snapshot of a connection's status, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful open.
    pub attempt: u32,
    /// Set after reconnect attempts are exhausted.
    pub terminal: bool,
    pub error: Option<String>,
}

impl LinkStatus {
    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            terminal: false,
            error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::connecting()
    }
}
