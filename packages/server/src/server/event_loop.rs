//! Server event loop.

use tokio::sync::mpsc;

use crate::domain::ServerState;

use super::{event::ServerEvent, state_machine::ServerCore};

/// Process events one at a time until the server reaches `Stopped`.
///
/// Events still queued afterwards are dropped, which fails their replies with
/// `EventLoopClosed`. Stop callbacks among them still run.
pub(crate) async fn run(mut core: ServerCore, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    tracing::debug!("Server event loop started");

    while let Some(event) = events.recv().await {
        core.handle_event(event).await;
        if core.state() == ServerState::Stopped {
            break;
        }
    }

    events.close();
    while let Ok(event) = events.try_recv() {
        if let ServerEvent::Stop { callback } = event {
            callback();
        }
    }

    tracing::debug!("Server event loop finished");
}
