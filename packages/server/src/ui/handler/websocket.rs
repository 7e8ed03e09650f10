//! WebSocket session handlers.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    domain::CloseMode,
    server::event::{GetRequest, ServerEvent, UpgradeDecision},
    ui::state::ConnectionState,
};

/// Upgrade `/{target_id}` to a WebSocket session once the server admits it.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ConnectionState>>,
    Path(target_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let session_id = state.session_id;
    let (decision_tx, decision_rx) = oneshot::channel();
    let event = ServerEvent::GetRequest {
        session_id,
        request: GetRequest::Upgrade {
            target_id: target_id.clone(),
            decision: decision_tx,
        },
    };
    if !state.notify(event) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match decision_rx.await {
        Ok(UpgradeDecision::Accept { outbound }) => {
            tracing::info!("Session {} upgrading for target '{}'", session_id, target_id);
            Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, outbound)))
        }
        Ok(UpgradeDecision::Decline) => Err(StatusCode::FORBIDDEN),
        Ok(UpgradeDecision::UnknownTarget) => Err(StatusCode::NOT_FOUND),
        Ok(UpgradeDecision::Unavailable) | Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Relay frames between the socket and the server until either side closes.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<ConnectionState>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let session_id = state.session_id;
    let mut signal = state.signal.clone();
    let (mut sender, mut receiver) = socket.split();

    let mode = loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let event = ServerEvent::MessageReceived {
                        session_id,
                        message: text.to_string(),
                    };
                    if !state.notify(event) {
                        break CloseMode::Force;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::debug!("Session {} ignoring {} byte binary frame", session_id, bytes.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Session {} closed by peer", session_id);
                    let _ = tokio::time::timeout(state.close_timeout, sender.close()).await;
                    return;
                }
                // Ping and Pong are answered by the protocol layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Session {} WebSocket error: {}", session_id, e);
                    return;
                }
            },
            message = outbound.recv() => match message {
                // A peer that stops reading must not block close requests.
                Some(text) => tokio::select! {
                    result = sender.send(Message::Text(text.into())) => {
                        if let Err(e) = result {
                            tracing::warn!("Session {} failed to send: {}", session_id, e);
                            return;
                        }
                    }
                    mode = next_close(&mut signal) => break mode,
                },
                None => break CloseMode::Graceful,
            },
            mode = next_close(&mut signal) => break mode,
        }
    };

    match mode {
        CloseMode::Graceful => {
            close_gracefully(
                sender,
                receiver,
                &mut outbound,
                &mut signal,
                state.close_timeout,
            )
            .await;
            tracing::info!("Session {} closed", session_id);
        }
        CloseMode::Force => {
            tracing::info!("Session {} terminated", session_id);
        }
    }
}

/// Flush queued frames, send Close and wait for the peer's Close.
///
/// The whole exchange gives up after `close_timeout`, or right away if a
/// forced close arrives.
async fn close_gracefully(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    signal: &mut watch::Receiver<Option<CloseMode>>,
    close_timeout: Duration,
) {
    let handshake = async {
        while let Ok(text) = outbound.try_recv() {
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        if sender.send(Message::Close(None)).await.is_err() {
            return;
        }
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        result = tokio::time::timeout(close_timeout, handshake) => {
            if result.is_err() {
                tracing::debug!("Close handshake did not finish within {:?}", close_timeout);
            }
        }
        () = wait_for_force(signal) => {}
    }
}

/// Wait for the next close request. A vanished server counts as forced.
async fn next_close(signal: &mut watch::Receiver<Option<CloseMode>>) -> CloseMode {
    loop {
        if signal.changed().await.is_err() {
            return CloseMode::Force;
        }
        if let Some(mode) = *signal.borrow_and_update() {
            return mode;
        }
    }
}

async fn wait_for_force(signal: &mut watch::Receiver<Option<CloseMode>>) {
    while next_close(signal).await != CloseMode::Force {}
}
