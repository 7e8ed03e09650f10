//! Connection serving.
//!
//! Every accepted stream gets its own HTTP/1 connection task with a router
//! bound to that connection's [`ConnectionState`], so the server can steer and
//! terminate connections individually.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::Response,
    routing::get,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::{net::TcpStream, time::Instant};
use tower_http::trace::TraceLayer;

use crate::domain::CloseMode;

use super::{
    handler::{list_targets, version, websocket_handler},
    state::ConnectionState,
};

/// Build the router serving one connection.
pub(crate) fn build_router(state: Arc<ConnectionState>) -> Router {
    Router::new()
        // HTTP エンドポイント
        .route("/json", get(list_targets))
        .route("/json/list", get(list_targets))
        .route("/json/version", get(version))
        // WebSocket エンドポイント
        .route("/{target_id}", get(websocket_handler))
        .layer(middleware::map_response(close_after_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ask hyper to close the connection once a plain HTTP response is written.
///
/// `101 Switching Protocols` must keep `Connection: upgrade` alone, so it is
/// left untouched.
async fn close_after_response(mut response: Response) -> Response {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// Serve `stream` on a new task.
pub(crate) fn spawn_connection(stream: TcpStream, state: ConnectionState) {
    tokio::spawn(serve_connection(stream, Arc::new(state)));
}

async fn serve_connection(stream: TcpStream, state: Arc<ConnectionState>) {
    let session_id = state.session_id;
    let close_timeout = state.close_timeout;
    let mut signal = state.signal.clone();

    let service = TowerToHyperService::new(build_router(state));
    let connection = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(connection);

    // Armed once a graceful close starts; a peer that never finishes its
    // request is dropped when it fires.
    let drain_deadline = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(drain_deadline);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!("Connection {} ended with error: {}", session_id, e);
                }
                break;
            }
            () = &mut drain_deadline, if draining => {
                tracing::debug!(
                    "Connection {} did not drain within {:?}, dropping it",
                    session_id,
                    close_timeout
                );
                break;
            }
            changed = signal.changed() => {
                let mode = match changed {
                    Ok(()) => *signal.borrow_and_update(),
                    // The server dropped its record
                    Err(_) => Some(CloseMode::Force),
                };
                match mode {
                    Some(CloseMode::Force) => {
                        tracing::debug!("Connection {} terminated", session_id);
                        break;
                    }
                    Some(CloseMode::Graceful) if !draining => {
                        draining = true;
                        drain_deadline.as_mut().reset(Instant::now() + close_timeout);
                        connection.as_mut().graceful_shutdown();
                    }
                    _ => {}
                }
            }
        }
    }
}
