//! HTTP/WebSocket server: a single `/ws` route and a `/health` probe.
//!
//! Everything that used to be a separate REST surface (static files, auth
//! tokens, proxying, SSE events) in the crate this was adapted from is out
//! of scope here — the bridge's only job is to accept a WebSocket and hand
//! it to the session engine.

pub mod state;
mod ws;

pub use state::AppState;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

/// The app's route table: a health probe and the one upgrade endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::handle_upgrade))
        .with_state(state)
}

/// Bind and serve until the shared shutdown flag is set.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.bind_addr, state.config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on http://{addr}");
    serve(listener, state).await
}

/// Serve `state`'s router on an already-bound listener. Split out from
/// `run_server` so tests can bind an ephemeral port and learn its address
/// before handing the listener off.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let shutdown_signal = async move {
        while !shutdown.is_shutdown_requested() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        log::info!("shutdown requested, draining connections");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}
