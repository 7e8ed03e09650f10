//! Error types for the inspector server.

use thiserror::Error;

use crate::domain::{ServerState, SessionId};

/// Errors reported by [`SocketServer`](crate::SocketServer) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No listening socket could be established
    #[error("Starting inspector on {host}:{port} failed: {reason}")]
    Bind {
        host: String,
        port: u16,
        reason: String,
    },

    /// The operation is not valid in the current server state
    #[error("cannot {operation} while the server is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    /// The session id does not name a live connection
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The session exists but is not awaiting an upgrade decision
    #[error("session {0} is not awaiting an upgrade decision")]
    NotPending(SessionId),

    /// The session exists but has no open WebSocket
    #[error("session {0} is not open")]
    SessionNotOpen(SessionId),

    /// The event loop has exited (the server is stopped)
    #[error("server event loop is no longer running")]
    EventLoopClosed,
}
