//! Server-wide state machine.
//!
//! [`ServerCore`] is owned by the event loop task and is the only place where
//! listening sockets, connections and sessions are mutated. Listener and
//! connection tasks refer to entries by id only, so a late event for an entry
//! that is already gone is simply "not found".

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    io::Write,
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};

use crate::{
    config::ServerConfig,
    domain::{Admission, CloseMode, ServerState, SessionId, SessionInfo, SocketServerDelegate},
    error::ServerError,
    infrastructure::{
        address,
        dto::http::TargetDescriptorDto,
        listener::{ListenerId, ListenerPhase, ListeningSocket},
    },
    ui::{server::spawn_connection, state::ConnectionState},
};

use super::{
    closer::{ShutdownCoordinator, StopCallback},
    connection::SessionConnection,
    event::{GetRequest, ServerEvent, UpgradeDecision},
};

pub(crate) struct ServerCore {
    delegate: Box<dyn SocketServerDelegate>,
    config: ServerConfig,
    state: ServerState,
    /// Bind port; the resolved port once running
    port: u16,
    /// Resolved port shared with `SocketServer` handles
    published_port: Arc<OnceLock<u16>>,
    /// Bind order
    listening_sockets: Vec<ListeningSocket>,
    next_listener_id: usize,
    /// Connections that have not completed a WebSocket upgrade
    connections: HashMap<SessionId, SessionConnection>,
    /// Upgraded sessions
    sessions: BTreeMap<SessionId, SessionConnection>,
    next_session_id: SessionId,
    /// Present only while stopping
    closer: Option<ShutdownCoordinator>,
    events: mpsc::UnboundedSender<ServerEvent>,
    out: Box<dyn Write + Send>,
}

impl ServerCore {
    pub fn new(
        delegate: Box<dyn SocketServerDelegate>,
        config: ServerConfig,
        out: Box<dyn Write + Send>,
        events: mpsc::UnboundedSender<ServerEvent>,
        published_port: Arc<OnceLock<u16>>,
    ) -> Self {
        Self {
            delegate,
            port: config.port,
            config,
            state: ServerState::New,
            published_port,
            listening_sockets: Vec::new(),
            next_listener_id: 0,
            connections: HashMap::new(),
            sessions: BTreeMap::new(),
            next_session_id: SessionId::new(1),
            closer: None,
            events,
            out,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    #[cfg(test)]
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Start { reply } => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            ServerEvent::Stop { callback } => self.stop(callback),
            ServerEvent::Send {
                session_id,
                message,
            } => {
                if let Err(e) = self.send(session_id, message) {
                    tracing::debug!("Dropping outbound message: {}", e);
                }
            }
            ServerEvent::AcceptSession(session_id) => {
                if let Err(e) = self.accept_session(session_id) {
                    tracing::warn!("Cannot accept session: {}", e);
                }
            }
            ServerEvent::DeclineSession(session_id) => {
                if let Err(e) = self.decline_session(session_id) {
                    tracing::warn!("Cannot decline session: {}", e);
                }
            }
            ServerEvent::TerminateConnections => self.terminate_connections(),
            ServerEvent::Lookup { session_id, reply } => {
                let _ = reply.send(self.session(session_id));
            }
            ServerEvent::QueryState { reply } => {
                let _ = reply.send(self.state);
            }
            ServerEvent::Accepted {
                listener_id,
                stream,
                peer,
            } => self.accept(listener_id, stream, peer),
            ServerEvent::ListenerClosed(listener_id) => self.server_socket_closed(listener_id),
            ServerEvent::GetRequest {
                session_id,
                request,
            } => {
                self.handle_get_request(session_id, request);
            }
            ServerEvent::MessageReceived {
                session_id,
                message,
            } => self.message_received(session_id, &message),
            ServerEvent::ConnectionClosed(session_id) => self.session_terminated(session_id),
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Bind every address `host` resolves to. Succeeds if at least one
    /// listening socket is established.
    pub async fn start(&mut self) -> Result<u16, ServerError> {
        if self.state != ServerState::New {
            return Err(ServerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let addresses = match address::resolve(&self.config.host, self.port).await {
            Ok(addresses) => addresses,
            Err(e) => return Err(self.bind_failed(e.to_string())),
        };

        // With port 0 every address family shares the port picked by the first bind.
        let mut port = self.port;
        let mut last_error = None;
        for mut addr in addresses {
            addr.set_port(port);
            let id = ListenerId::new(self.next_listener_id);
            self.next_listener_id += 1;
            match ListeningSocket::bind(id, addr, self.events.clone()).await {
                Ok(socket) => {
                    port = socket.local_addr().port();
                    self.server_socket_listening(socket);
                }
                Err(e) => {
                    tracing::warn!("Failed to listen on {}: {}", addr, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        if self.listening_sockets.is_empty() {
            let reason = last_error.unwrap_or_else(|| "no address to bind".to_string());
            return Err(self.bind_failed(reason));
        }

        self.port = port;
        let _ = self.published_port.set(port);
        self.transition(ServerState::Running);
        tracing::info!(
            "Inspector listening on {}",
            address::format_authority(&self.config.host, port)
        );
        self.print_listening_banner();
        Ok(port)
    }

    /// Close every listening socket and connection, then run `callback`.
    ///
    /// A stop while already stopping queues `callback` behind the running
    /// shutdown; a stop after the server stopped runs it right away.
    pub fn stop(&mut self, callback: StopCallback) {
        match self.state {
            ServerState::New | ServerState::Running => {
                self.transition(ServerState::Stopping);
                let pending =
                    self.listening_sockets.len() + self.connections.len() + self.sessions.len();
                tracing::info!("Stopping server, {} resources to close", pending);

                let mut closer = ShutdownCoordinator::new(pending);
                closer.add_callback(callback);
                self.closer = Some(closer);

                for socket in &mut self.listening_sockets {
                    socket.close();
                }
                for connection in self
                    .connections
                    .values_mut()
                    .chain(self.sessions.values_mut())
                {
                    connection.close(CloseMode::Graceful);
                }
                self.maybe_finish_shutdown();
            }
            ServerState::Stopping => {
                tracing::debug!("Stop requested while stopping, queueing callback");
                if let Some(closer) = self.closer.as_mut() {
                    closer.add_callback(callback);
                }
            }
            ServerState::Stopped => callback(),
        }
    }

    /// Forcibly close every live connection without the WebSocket close
    /// handshake. Listening sockets stay open.
    pub fn terminate_connections(&mut self) {
        let mut terminated = 0;
        for connection in self
            .connections
            .values_mut()
            .chain(self.sessions.values_mut())
        {
            if connection.close(CloseMode::Force) {
                terminated += 1;
            }
        }
        tracing::info!("Terminating {} connections", terminated);
    }

    // ========================================
    // Listening sockets
    // ========================================

    pub fn server_socket_listening(&mut self, mut socket: ListeningSocket) {
        if matches!(self.state, ServerState::Stopping | ServerState::Stopped) {
            tracing::warn!("Refusing listener {} while {:?}", socket.id(), self.state);
            socket.close();
            return;
        }
        tracing::debug!("Listener {} listening on {}", socket.id(), socket.local_addr());
        self.listening_sockets.push(socket);
    }

    pub fn server_socket_closed(&mut self, listener_id: ListenerId) {
        let Some(index) = self
            .listening_sockets
            .iter()
            .position(|socket| socket.id() == listener_id)
        else {
            tracing::warn!("Close reported for unknown listener {}", listener_id);
            return;
        };
        let mut socket = self.listening_sockets.remove(index);
        if socket.phase() == ListenerPhase::Listening {
            tracing::warn!("Listener {} on {} closed unexpectedly", listener_id, socket.local_addr());
        }
        socket.mark_closed();
        self.resource_closed();
    }

    // ========================================
    // Connections and sessions
    // ========================================

    /// Take ownership of a freshly accepted stream.
    pub fn accept(&mut self, listener_id: ListenerId, stream: TcpStream, peer: SocketAddr) {
        if !self.state.accepts_connections() {
            tracing::debug!(
                "Rejecting connection from {} on listener {} while {:?}",
                peer,
                listener_id,
                self.state
            );
            drop(stream);
            return;
        }
        let (session_id, signal) = self.register_connection(peer);
        let state = ConnectionState::new(
            session_id,
            self.events.clone(),
            signal,
            self.config.close_timeout,
        );
        spawn_connection(stream, state);
        tracing::debug!("Connection {} accepted from {}", session_id, peer);
    }

    fn register_connection(
        &mut self,
        peer: SocketAddr,
    ) -> (SessionId, tokio::sync::watch::Receiver<Option<CloseMode>>) {
        let session_id = self.next_session_id;
        self.next_session_id = session_id.next();
        let (connection, signal) = SessionConnection::new(session_id, peer);
        self.connections.insert(session_id, connection);
        (session_id, signal)
    }

    /// Serve a GET request. Returns whether the server handled it; `false`
    /// means the caller answers with an error status.
    pub fn handle_get_request(&mut self, session_id: SessionId, request: GetRequest) -> bool {
        match request {
            GetRequest::Discovery { host, reply } => {
                let authority =
                    address::advertised_authority(host.as_deref(), &self.config.host, self.port);
                let _ = reply.send(self.target_descriptors(&authority));
                true
            }
            GetRequest::Upgrade {
                target_id,
                decision,
            } => self.request_upgrade(session_id, target_id, decision),
        }
    }

    fn request_upgrade(
        &mut self,
        session_id: SessionId,
        target_id: String,
        decision: oneshot::Sender<UpgradeDecision>,
    ) -> bool {
        if !self.state.accepts_connections() {
            let _ = decision.send(UpgradeDecision::Unavailable);
            return false;
        }
        if !self.target_exists(&target_id) {
            tracing::warn!("Session {} requested unknown target '{}'", session_id, target_id);
            let _ = decision.send(UpgradeDecision::UnknownTarget);
            return false;
        }
        let Some(connection) = self.connections.get_mut(&session_id) else {
            let _ = decision.send(UpgradeDecision::Unavailable);
            return false;
        };
        if let Err(e) = connection.await_decision(target_id.clone(), decision) {
            tracing::warn!("Rejecting upgrade: {}", e);
            return false;
        }

        match self.delegate.admit_session(session_id, &target_id) {
            Admission::Accept => {
                if let Err(e) = self.accept_session(session_id) {
                    tracing::warn!("Cannot accept session: {}", e);
                }
            }
            Admission::Decline => {
                if let Err(e) = self.decline_session(session_id) {
                    tracing::warn!("Cannot decline session: {}", e);
                }
            }
            Admission::Defer => {
                tracing::debug!(
                    "Session {} for target '{}' awaiting admission",
                    session_id,
                    target_id
                );
            }
        }
        true
    }

    /// Complete a pending upgrade and register the session.
    pub fn accept_session(&mut self, session_id: SessionId) -> Result<(), ServerError> {
        let Some(connection) = self.connections.get_mut(&session_id) else {
            return Err(self.missing_pending(session_id));
        };
        connection.open()?;
        if let Some(connection) = self.connections.remove(&session_id) {
            self.session_started(session_id, connection);
        }
        Ok(())
    }

    /// Reject a pending upgrade. The delegate never hears about it.
    pub fn decline_session(&mut self, session_id: SessionId) -> Result<(), ServerError> {
        let Some(connection) = self.connections.get_mut(&session_id) else {
            return Err(self.missing_pending(session_id));
        };
        connection.decline()?;
        tracing::info!("Session {} declined", session_id);
        Ok(())
    }

    fn missing_pending(&self, session_id: SessionId) -> ServerError {
        if self.sessions.contains_key(&session_id) {
            ServerError::NotPending(session_id)
        } else {
            ServerError::UnknownSession(session_id)
        }
    }

    fn session_started(&mut self, session_id: SessionId, connection: SessionConnection) {
        let target_id = connection.target_id().unwrap_or_default().to_string();
        self.sessions.insert(session_id, connection);
        tracing::info!("Session {} started for target '{}'", session_id, target_id);
        self.delegate.start_session(session_id, &target_id);
    }

    /// A connection released its socket.
    pub fn session_terminated(&mut self, session_id: SessionId) {
        if let Some(mut connection) = self.sessions.remove(&session_id) {
            connection.finish();
            tracing::info!("Session {} ended", session_id);
            self.delegate.end_session(session_id);
        } else if let Some(mut connection) = self.connections.remove(&session_id) {
            let previous = connection.finish();
            tracing::debug!("Connection {} closed ({:?})", session_id, previous);
        } else {
            tracing::warn!("Close reported for unknown connection {}", session_id);
            return;
        }
        self.resource_closed();
    }

    /// Queue a text frame on an open session.
    pub fn send(&mut self, session_id: SessionId, message: String) -> Result<(), ServerError> {
        self.sessions
            .get(&session_id)
            .ok_or(ServerError::UnknownSession(session_id))?
            .send(message)
    }

    pub fn message_received(&mut self, session_id: SessionId, message: &str) {
        if self.sessions.contains_key(&session_id) {
            self.delegate.message_received(session_id, message);
        } else {
            tracing::debug!("Dropping message for unregistered session {}", session_id);
        }
    }

    pub fn session(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions
            .get(&session_id)
            .or_else(|| self.connections.get(&session_id))
            .map(SessionConnection::info)
    }

    // ========================================
    // Internals
    // ========================================

    fn transition(&mut self, next: ServerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!("Server state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn resource_closed(&mut self) {
        if let Some(closer) = self.closer.as_mut() {
            closer.on_resource_closed();
        }
        self.maybe_finish_shutdown();
    }

    fn maybe_finish_shutdown(&mut self) {
        if !self.closer.as_ref().is_some_and(ShutdownCoordinator::is_done) {
            return;
        }
        let Some(closer) = self.closer.take() else {
            return;
        };
        self.transition(ServerState::Stopped);
        tracing::info!("Server stopped");
        self.delegate.server_done();
        closer.complete();
    }

    fn target_exists(&mut self, target_id: &str) -> bool {
        self.delegate
            .get_target_ids()
            .iter()
            .any(|id| id == target_id)
    }

    fn target_descriptors(&mut self, authority: &str) -> Vec<TargetDescriptorDto> {
        self.delegate
            .get_target_ids()
            .into_iter()
            .map(|id| TargetDescriptorDto {
                description: self.config.target_description.clone(),
                devtools_frontend_url: format!(
                    "{}&ws={}/{}",
                    self.config.frontend_url, authority, id
                ),
                title: self.delegate.get_target_title(&id),
                target_type: self.config.target_type.clone(),
                url: self.delegate.get_target_url(&id),
                web_socket_debugger_url: format!("ws://{authority}/{id}"),
                id,
            })
            .collect()
    }

    fn print_listening_banner(&mut self) {
        let authority = address::format_authority(&self.config.host, self.port);
        for id in self.delegate.get_target_ids() {
            self.diagnostic(format_args!("Debugger listening on ws://{authority}/{id}"));
        }
        let help_url = self.config.help_url.clone();
        self.diagnostic(format_args!("For help, see: {help_url}"));
    }

    fn bind_failed(&mut self, reason: String) -> ServerError {
        let error = ServerError::Bind {
            host: self.config.host.clone(),
            port: self.port,
            reason,
        };
        tracing::error!("{}", error);
        self.diagnostic(format_args!("{error}"));
        error
    }

    fn diagnostic(&mut self, line: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            tracing::warn!("Failed to write diagnostic output: {}", e);
        }
    }
}
