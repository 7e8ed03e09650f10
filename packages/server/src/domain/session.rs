//! Session identity and connection lifecycle phases.

use std::{fmt, net::SocketAddr};

use chrono::{DateTime, Utc};

/// Identifier assigned to every accepted connection.
///
/// Ids come from a monotonically increasing counter and are never reused
/// within a server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one accepted connection.
///
/// `AwaitingRequest` → (`PendingUpgradeDecision` → `Open`) → `Closing` → `Closed`.
/// Plain HTTP requests go straight from `AwaitingRequest` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingRequest,
    PendingUpgradeDecision,
    Open,
    Closing,
    Closed,
}

impl SessionPhase {
    /// Whether a close request has already been issued or completed.
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// How a connection is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Finish the in-flight HTTP exchange or perform the WebSocket close handshake
    Graceful,
    /// Drop the socket immediately
    Force,
}

/// Snapshot of a connection returned by session lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub phase: SessionPhase,
    /// Set once an upgrade for a target was requested
    pub target_id: Option<String>,
    /// When the WebSocket session was accepted
    pub opened_at: Option<DateTime<Utc>>,
}
