//! Per-connection state shared by the HTTP handlers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::{
    domain::{CloseMode, SessionId},
    server::event::ServerEvent,
};

/// Shared connection state
///
/// One instance per accepted TCP connection, shared by the router and the
/// upgraded WebSocket task. Dropping the last reference reports the
/// connection as closed, so closure is reported exactly once however the
/// connection ends.
pub(crate) struct ConnectionState {
    /// セッション ID
    pub session_id: SessionId,
    /// サーバーイベントループへの送信口
    pub events: mpsc::UnboundedSender<ServerEvent>,
    /// クローズ要求
    pub signal: watch::Receiver<Option<CloseMode>>,
    /// Graceful close で相手の Close フレームを待つ時間
    pub close_timeout: Duration,
}

impl ConnectionState {
    pub fn new(
        session_id: SessionId,
        events: mpsc::UnboundedSender<ServerEvent>,
        signal: watch::Receiver<Option<CloseMode>>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            events,
            signal,
            close_timeout,
        }
    }

    /// Hand an event to the server. Returns `false` once the server is gone.
    pub fn notify(&self, event: ServerEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        tracing::debug!("Connection {} released", self.session_id);
        let _ = self
            .events
            .send(ServerEvent::ConnectionClosed(self.session_id));
    }
}
