//! Axum app: shared state and router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Semaphore;

use trellis::{GraphClient, RequestSupervisor};

use crate::handlers;

/// One stored chat turn for the session-bound UI adapter. Sessions keep UI
/// history only; agent memory never crosses requests.
#[derive(Clone)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

pub struct AppState {
    pub supervisor: Arc<RequestSupervisor>,
    pub graph: Arc<dyn GraphClient>,
    /// Whether a model backend is configured; reported by /health/runtime.
    pub llm_configured: bool,
    /// Request permits; exhausted permits mean 503 before any work starts.
    pub permits: Arc<Semaphore>,
    pub sessions: Mutex<HashMap<String, Vec<ChatTurn>>>,
}

impl AppState {
    pub fn new(
        supervisor: Arc<RequestSupervisor>,
        graph: Arc<dyn GraphClient>,
        llm_configured: bool,
    ) -> Self {
        let max = supervisor.config().max_concurrent_requests;
        Self {
            supervisor,
            graph,
            llm_configured,
            permits: Arc::new(Semaphore::new(max)),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run_agent", post(handlers::run_agent))
        .route("/run_agent_semantic", post(handlers::run_agent_semantic))
        .route("/run_debate", post(handlers::run_debate))
        .route("/platform/chat/send", post(handlers::chat_send))
        .route("/indexes/fulltext/ensure", post(handlers::fulltext_ensure))
        .route("/databases", get(handlers::databases))
        .route("/agents", get(handlers::agents))
        .route("/health/runtime", get(handlers::health_runtime))
        .route("/health/batch", get(handlers::health_batch))
        .with_state(state)
}
