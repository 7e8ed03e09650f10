//! Messages processed by the server event loop.

use std::net::SocketAddr;

use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};

use crate::{
    domain::{ServerState, SessionId, SessionInfo},
    error::ServerError,
    infrastructure::{dto::http::TargetDescriptorDto, listener::ListenerId},
};

use super::closer::StopCallback;

/// Everything that can mutate server state arrives as one of these.
pub(crate) enum ServerEvent {
    // Commands from `SocketServer` handles
    Start {
        reply: oneshot::Sender<Result<u16, ServerError>>,
    },
    Stop {
        callback: StopCallback,
    },
    Send {
        session_id: SessionId,
        message: String,
    },
    AcceptSession(SessionId),
    DeclineSession(SessionId),
    TerminateConnections,
    Lookup {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    QueryState {
        reply: oneshot::Sender<ServerState>,
    },

    // Listening sockets
    Accepted {
        listener_id: ListenerId,
        stream: TcpStream,
        peer: SocketAddr,
    },
    ListenerClosed(ListenerId),

    // Connection tasks
    GetRequest {
        session_id: SessionId,
        request: GetRequest,
    },
    MessageReceived {
        session_id: SessionId,
        message: String,
    },
    ConnectionClosed(SessionId),
}

/// HTTP GET requests the connection layer hands to the server.
pub(crate) enum GetRequest {
    /// `/json` or `/json/list`
    Discovery {
        host: Option<String>,
        reply: oneshot::Sender<Vec<TargetDescriptorDto>>,
    },
    /// WebSocket upgrade for `/{target_id}`
    Upgrade {
        target_id: String,
        decision: oneshot::Sender<UpgradeDecision>,
    },
}

/// Answer to a pending WebSocket upgrade.
#[derive(Debug)]
pub(crate) enum UpgradeDecision {
    /// Complete the handshake; outbound frames arrive on `outbound`.
    Accept {
        outbound: mpsc::UnboundedReceiver<String>,
    },
    /// Rejected by the host (403)
    Decline,
    /// No such target (404)
    UnknownTarget,
    /// Server stopping or connection being torn down (503)
    Unavailable,
}
