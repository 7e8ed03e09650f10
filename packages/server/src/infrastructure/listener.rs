//! Listening sockets.
//!
//! Each [`ListeningSocket`] owns one bound tokio `TcpListener` through an accept
//! task. The task forwards accepted streams to the server event loop and reports
//! `ListenerClosed` exactly once when it ends.

use std::{fmt, io, net::SocketAddr, time::Duration};

use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};

use crate::server::event::ServerEvent;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Identifier of a listening socket within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    Listening,
    Closing,
    Closed,
}

/// Server-side record of one listening socket.
#[derive(Debug)]
pub struct ListeningSocket {
    id: ListenerId,
    local_addr: SocketAddr,
    phase: ListenerPhase,
    close_tx: Option<oneshot::Sender<()>>,
}

impl ListeningSocket {
    /// Bind `addr` and start accepting connections.
    ///
    /// Accepted streams are sent as [`ServerEvent::Accepted`] on `events`.
    pub(crate) async fn bind(
        id: ListenerId,
        addr: SocketAddr,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(accept_loop(id, listener, close_rx, events));
        tracing::debug!("Listener {} bound to {}", id, local_addr);

        Ok(Self {
            id,
            local_addr,
            phase: ListenerPhase::Listening,
            close_tx: Some(close_tx),
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> ListenerPhase {
        self.phase
    }

    /// Ask the accept task to stop. Returns `false` if a close was already
    /// requested.
    pub fn close(&mut self) -> bool {
        match self.close_tx.take() {
            Some(close_tx) => {
                // The task may already be gone; its ListenerClosed is queued then.
                let _ = close_tx.send(());
                self.phase = ListenerPhase::Closing;
                true
            }
            None => false,
        }
    }

    /// Record that the accept task has ended.
    pub fn mark_closed(&mut self) {
        self.close_tx = None;
        self.phase = ListenerPhase::Closed;
    }
}

async fn accept_loop(
    id: ListenerId,
    listener: TcpListener,
    mut close_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut close_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Listener {} accepted connection from {}", id, peer);
                    let event = ServerEvent::Accepted {
                        listener_id: id,
                        stream,
                        peer,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Listener {} failed to accept: {}", id, e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    drop(listener);
    tracing::debug!("Listener {} closed", id);
    let _ = events.send(ServerEvent::ListenerClosed(id));
}
