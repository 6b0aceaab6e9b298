//! Read-only admin API.
//!
//! # Data Flow
//! ```text
//! GET /admin/status      → handlers.rs (uptime, connections, forwarder count)
//! GET /admin/forwarders  → handlers.rs (resolved forwarders, current table)
//!     (both behind auth.rs bearer key check)
//! ```

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::{get_forwarders, get_status};
use crate::http::AppState;
use crate::lifecycle::Shutdown;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/forwarders", get(get_forwarders))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `addr` until `shutdown` triggers.
pub async fn serve_admin(addr: SocketAddr, state: AppState, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let stop = shutdown.subscribe();
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(Shutdown::notified(stop))
        .await
}
