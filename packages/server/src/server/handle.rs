//! Public server handle.

use std::{
    io::{self, Write},
    sync::{Arc, OnceLock},
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use crate::{
    config::ServerConfig,
    domain::{ServerState, SessionId, SessionInfo, SocketServerDelegate},
    error::ServerError,
};

use super::{closer::StopCallback, event::ServerEvent, event_loop, state_machine::ServerCore};

/// Inspector socket server
///
/// A cheap, cloneable handle to the server event loop. Every method only
/// enqueues work, so it is safe to call from delegate callbacks.
///
/// # Example
///
/// ```ignore
/// let server = SocketServer::new(delegate, &Handle::current(), ServerConfig::new("127.0.0.1", 9229));
/// let port = server.start().await?;
/// // ...
/// server.shutdown().await;
/// ```
#[derive(Clone)]
pub struct SocketServer {
    events: mpsc::UnboundedSender<ServerEvent>,
    port: Arc<OnceLock<u16>>,
}

impl SocketServer {
    /// Create a server writing diagnostics to standard error.
    ///
    /// The event loop is spawned on `runtime` right away; nothing is bound
    /// until [`start`](Self::start).
    pub fn new(
        delegate: impl SocketServerDelegate + 'static,
        runtime: &Handle,
        config: ServerConfig,
    ) -> Self {
        Self::with_output(delegate, runtime, config, Box::new(io::stderr()))
    }

    /// Create a server writing diagnostics to `out`.
    pub fn with_output(
        delegate: impl SocketServerDelegate + 'static,
        runtime: &Handle,
        config: ServerConfig,
        out: Box<dyn Write + Send>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let port = Arc::new(OnceLock::new());
        let core = ServerCore::new(
            Box::new(delegate),
            config,
            out,
            events_tx.clone(),
            port.clone(),
        );
        runtime.spawn(event_loop::run(core, events_rx));

        Self {
            events: events_tx,
            port,
        }
    }

    /// Bind the listening sockets. Returns the port actually bound.
    pub async fn start(&self) -> Result<u16, ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(ServerEvent::Start { reply: reply_tx })?;
        reply_rx.await.map_err(|_| ServerError::EventLoopClosed)?
    }

    /// Stop the server. `callback` runs once every listening socket and
    /// connection has closed.
    pub fn stop<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let callback: StopCallback = Box::new(callback);
        if let Err(mpsc::error::SendError(event)) = self.events.send(ServerEvent::Stop { callback })
            && let ServerEvent::Stop { callback } = event
        {
            // Already stopped
            callback();
        }
    }

    /// Stop the server and wait until it has fully stopped.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.stop(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
    }

    /// Queue a text message on an open session. Unknown sessions are ignored.
    pub fn send(&self, session_id: SessionId, message: impl Into<String>) {
        let event = ServerEvent::Send {
            session_id,
            message: message.into(),
        };
        if self.dispatch(event).is_err() {
            tracing::debug!("Dropping message for session {}: server stopped", session_id);
        }
    }

    /// Forcibly close every live connection.
    pub fn terminate_connections(&self) {
        let _ = self.dispatch(ServerEvent::TerminateConnections);
    }

    /// Complete a deferred WebSocket upgrade.
    pub fn accept_session(&self, session_id: SessionId) {
        let _ = self.dispatch(ServerEvent::AcceptSession(session_id));
    }

    /// Reject a deferred WebSocket upgrade with `403 Forbidden`.
    pub fn decline_session(&self, session_id: SessionId) {
        let _ = self.dispatch(ServerEvent::DeclineSession(session_id));
    }

    /// Port the server is listening on, once started.
    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }

    /// Snapshot of a connection, if it is still live.
    pub async fn session(&self, session_id: SessionId) -> Option<SessionInfo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(ServerEvent::Lookup {
            session_id,
            reply: reply_tx,
        })
        .ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn state(&self) -> Result<ServerState, ServerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(ServerEvent::QueryState { reply: reply_tx })?;
        reply_rx.await.map_err(|_| ServerError::EventLoopClosed)
    }

    fn dispatch(&self, event: ServerEvent) -> Result<(), ServerError> {
        self.events
            .send(event)
            .map_err(|_| ServerError::EventLoopClosed)
    }
}
