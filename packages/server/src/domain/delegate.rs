//! Delegate trait 定義
//!
//! The delegate owns the debug targets and the protocol spoken over each
//! session. The server only routes connections and relays text messages.

use super::SessionId;

/// Decision returned by [`SocketServerDelegate::admit_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Admission {
    /// Complete the upgrade right away
    #[default]
    Accept,
    /// Reject the upgrade with an HTTP error
    Decline,
    /// Leave the connection pending; the host later calls
    /// [`SocketServer::accept_session`](crate::SocketServer::accept_session) or
    /// [`SocketServer::decline_session`](crate::SocketServer::decline_session).
    Defer,
}

/// Capabilities the server needs from its host.
///
/// Every method is called on the server's event loop task, one at a time. The
/// delegate may keep a [`SocketServer`](crate::SocketServer) handle and call it
/// from here: those calls are queued and run after the current callback
/// returns. Session ids must not be used after `end_session`.
#[cfg_attr(test, mockall::automock)]
pub trait SocketServerDelegate: Send {
    /// A WebSocket session was established for `target_id`.
    fn start_session(&mut self, session_id: SessionId, target_id: &str);

    /// A session previously announced by `start_session` is gone.
    fn end_session(&mut self, session_id: SessionId);

    /// A text frame arrived on a session.
    fn message_received(&mut self, session_id: SessionId, message: &str);

    /// Ids of every target currently exposed.
    fn get_target_ids(&mut self) -> Vec<String>;

    fn get_target_title(&mut self, id: &str) -> String;

    fn get_target_url(&mut self, id: &str) -> String;

    /// The server reached `Stopped`. Called once.
    fn server_done(&mut self);

    /// An upgrade for an existing target is waiting for a decision.
    fn admit_session(&mut self, _session_id: SessionId, _target_id: &str) -> Admission {
        Admission::Accept
    }
}
