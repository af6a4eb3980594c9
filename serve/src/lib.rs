//! HTTP server for the trellis orchestration core (axum + JSON).
//!
//! Routes: run endpoints (`/run_agent`, `/run_agent_semantic`, `/run_debate`),
//! the chat adapter (`/platform/chat/send`), index management
//! (`/indexes/fulltext/ensure`), listings (`/databases`, `/agents`) and the
//! split health probes. Errors use one envelope:
//! `{error_code, message, request_id}`.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`AppState`].

mod app;
mod error;
mod handlers;

pub use app::AppState;
pub use error::{ApiError, ErrorEnvelope};

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Serves on an existing listener. Tests bind to `127.0.0.1:0` and pass the
/// listener in.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("trellis server listening on http://{}", addr);
    let app = app::router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Binds `addr` (default 127.0.0.1:8080) and serves until the process exits.
pub async fn run_serve(
    addr: Option<&str>,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}
