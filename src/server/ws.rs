//! The single `axum` route: admission control ahead of the WebSocket
//! upgrade, then handing the accepted connection to the session engine.
//!
//! Admission (once-mode, max-clients, then origin/host) is evaluated
//! *before* `on_upgrade` rather than inside the upgraded connection, so a
//! rejected client gets an ordinary HTTP error response and no session is
//! ever created — a deliberate refinement over a model that accepts the
//! upgrade first and closes immediately after. The registry checks run
//! first so a connection that fails both checks is rejected for the
//! once-mode/capacity reason, not origin/host — the first applicable reason
//! wins. A session admitted but then rejected on origin/host is removed
//! from the registry before the error response is returned.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::origin::origin_matches_host;
use crate::registry::AdmissionError;
use crate::session::{self, SessionContext};

use super::state::AppState;

pub async fn handle_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let registry_id = match state.registry.admit().await {
        Ok(id) => id,
        Err(AdmissionError::OnceAlreadyServed) => {
            return (StatusCode::FORBIDDEN, "session already served").into_response()
        }
        Err(AdmissionError::AtCapacity) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response()
        }
    };

    if state.config.check_origin {
        if let Err(resp) = check_origin(&headers) {
            state.registry.remove(registry_id).await;
            return resp;
        }
    }

    let ctx = SessionContext {
        registry_id,
        config: Arc::clone(&state.config),
        registry: Arc::clone(&state.registry),
        shutdown: state.shutdown.clone(),
        peer_hostname: peer.ip().to_string(),
    };

    ws.on_upgrade(move |socket| session::run(socket, ctx))
}

fn check_origin(headers: &HeaderMap) -> Result<(), Response> {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok());

    match (origin, host) {
        (Some(origin), Some(host)) if origin_matches_host(origin, host) => Ok(()),
        _ => Err((StatusCode::FORBIDDEN, "origin/host mismatch").into_response()),
    }
}
