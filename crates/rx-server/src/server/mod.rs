//! HTTP server
//!
//! | route                    | auth   |
//! |--------------------------|--------|
//! | `POST /token`            | open   |
//! | `GET /health`            | open   |
//! | `POST /auth/exec`        | bearer |
//! | `POST /auth/kill`        | bearer |
//! | `POST /auth/upload-tar`  | bearer |
//! | `GET /auth/download-tar` | bearer |

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::AuthSession;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::state::ServerState;

/// Build the router
pub fn router(state: Arc<ServerState>) -> Router {
    let authed = Router::new()
        .route("/exec", post(handlers::exec))
        .route("/kill", post(handlers::kill))
        .route("/upload-tar", post(handlers::upload_tar))
        .route("/download-tar", get(handlers::download_tar));

    Router::new()
        .route("/token", post(handlers::token))
        .route("/health", get(handlers::health))
        .nest("/auth", authed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` is cancelled and in-flight
/// requests have drained.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
