//! HTTP discovery endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use tokio::sync::oneshot;

use crate::{
    infrastructure::dto::http::{TargetDescriptorDto, VersionDto},
    server::event::{GetRequest, ServerEvent},
    ui::state::ConnectionState,
};

/// List every debug target (`/json`, `/json/list`)
pub async fn list_targets(
    State(state): State<Arc<ConnectionState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TargetDescriptorDto>>, StatusCode> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let (reply_tx, reply_rx) = oneshot::channel();
    let event = ServerEvent::GetRequest {
        session_id: state.session_id,
        request: GetRequest::Discovery {
            host,
            reply: reply_tx,
        },
    };
    if !state.notify(event) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match reply_rx.await {
        Ok(targets) => Ok(Json(targets)),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Version information (`/json/version`)
pub async fn version() -> Json<VersionDto> {
    Json(VersionDto::current())
}
