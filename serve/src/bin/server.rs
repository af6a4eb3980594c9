//! Server binary: env-first config, tracing, backend wiring.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use serve::AppState;
use trellis::{
    ChatOpenAI, Config, IdentifierRegistry, Neo4jGraph, RequestSupervisor, TracingSpanSink,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_env());
    info!(workspace = %config.workspace_id, model = %config.model, "starting trellis server");

    let graph = Arc::new(Neo4jGraph::new(
        config.graph_uri.clone(),
        config.graph_user.clone(),
        config.graph_password.clone(),
        config.graph_timeout,
    ));

    let llm_configured = std::env::var("OPENAI_API_KEY").is_ok();
    if !llm_configured {
        warn!("OPENAI_API_KEY is not set; agent runs will fail until it is");
    }
    let llm = Arc::new(ChatOpenAI::new(config.model.clone()));

    // Databases are provisioned out of band; the operator names them here.
    let registry = Arc::new(IdentifierRegistry::new());
    if let Ok(raw) = std::env::var("TRELLIS_DATABASES") {
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = registry.register_db(name) {
                warn!(name, error = %e, "skipping database with invalid name");
            }
        }
    }
    info!(databases = ?registry.list_user_dbs(), "registry seeded");

    let supervisor = Arc::new(RequestSupervisor::new(
        graph.clone(),
        llm,
        registry,
        config,
        Arc::new(TracingSpanSink),
    ));
    let state = Arc::new(AppState::new(supervisor, graph, llm_configured));

    let addr = std::env::var("TRELLIS_ADDR").ok();
    serve::run_serve(addr.as_deref(), state).await
}
