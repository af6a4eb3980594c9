//! Request handlers for the orchestration endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OwnedSemaphorePermit;
use tracing::info;
use uuid::Uuid;

use trellis::trace::TraceStep;
use trellis::{EntityOverride, Mode, ReadinessSummary, RunRequest, RunResult};

use crate::app::{AppState, ChatTurn};
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Backpressure gate: refuse with 503 before doing any work when the
/// configured request concurrency is exhausted.
fn acquire(state: &AppState) -> ApiResult<OwnedSemaphorePermit> {
    state
        .permits
        .clone()
        .try_acquire_owned()
        .map_err(|_| ApiError::overloaded(Uuid::new_v4().to_string()))
}

fn check_workspace(state: &AppState, workspace_id: &str) -> ApiResult<()> {
    if workspace_id == state.supervisor.config().workspace_id {
        Ok(())
    } else {
        Err(ApiError {
            status: axum::http::StatusCode::FORBIDDEN,
            envelope: crate::error::ErrorEnvelope {
                error_code: "policy_denied".into(),
                message: format!("workspace `{workspace_id}` is not served here"),
                request_id: Uuid::new_v4().to_string(),
                trace_steps: Vec::new(),
                readiness: None,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Run endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunAgentBody {
    pub query: String,
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
}

/// Legacy single-route execution.
pub async fn run_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunAgentBody>,
) -> ApiResult<Json<RunResult>> {
    let _permit = acquire(&state)?;
    state
        .supervisor
        .run_single(&body.workspace_id, &body.query, &body.databases)
        .await
        .map(Json)
        .map_err(ApiError::from_failure)
}

#[derive(Debug, Deserialize)]
pub struct SemanticBody {
    pub query: String,
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub entity_overrides: Vec<EntityOverride>,
    #[serde(default)]
    pub label_hints: BTreeMap<String, Vec<String>>,
}

/// Semantic flow: resolve → route → specialist → answer.
pub async fn run_agent_semantic(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SemanticBody>,
) -> ApiResult<Json<RunResult>> {
    let _permit = acquire(&state)?;
    state
        .supervisor
        .run(RunRequest {
            query: body.query,
            workspace_id: body.workspace_id,
            databases: body.databases,
            entity_overrides: body.entity_overrides,
            label_hints: body.label_hints,
            mode: Mode::Semantic,
            fallback_enabled: true,
        })
        .await
        .map(Json)
        .map_err(ApiError::from_failure)
}

#[derive(Debug, Deserialize)]
pub struct DebateBody {
    pub query: String,
    pub workspace_id: String,
    /// Empty or absent means every registered user database.
    #[serde(default)]
    pub databases: Vec<String>,
}

/// Debate flow: fan-out, collect, synthesis; blocked debates fall back to
/// the semantic flow.
pub async fn run_debate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DebateBody>,
) -> ApiResult<Json<RunResult>> {
    let _permit = acquire(&state)?;
    state
        .supervisor
        .run(RunRequest {
            query: body.query,
            workspace_id: body.workspace_id,
            databases: body.databases,
            entity_overrides: Vec::new(),
            label_hints: BTreeMap::new(),
            mode: Mode::Debate,
            fallback_enabled: true,
        })
        .await
        .map(Json)
        .map_err(ApiError::from_failure)
}

// ---------------------------------------------------------------------------
// Chat adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatSendBody {
    pub session_id: String,
    pub message: String,
    pub mode: Mode,
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatSendResponse {
    pub assistant_message: String,
    pub trace_steps: Vec<TraceStep>,
    pub ui_payload: Value,
    pub runtime_payload: Value,
    pub runtime_control: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
}

/// Session-bound UI adapter over the run endpoints. Sessions store UI turns
/// only; every run starts from fresh agent state.
pub async fn chat_send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatSendBody>,
) -> ApiResult<Json<ChatSendResponse>> {
    let _permit = acquire(&state)?;
    let result = state
        .supervisor
        .run(RunRequest {
            query: body.message.clone(),
            workspace_id: body.workspace_id,
            databases: body.databases,
            entity_overrides: Vec::new(),
            label_hints: BTreeMap::new(),
            mode: body.mode,
            fallback_enabled: true,
        })
        .await
        .map_err(ApiError::from_failure)?;

    let turn_count = {
        let mut sessions = state.sessions.lock().expect("session lock");
        let history = sessions.entry(body.session_id.clone()).or_default();
        history.push(ChatTurn {
            role: "user",
            content: body.message,
        });
        history.push(ChatTurn {
            role: "assistant",
            content: result.answer.clone(),
        });
        history.len()
    };
    info!(session = %body.session_id, turns = turn_count, "chat turn stored");

    let runtime_control = match &result.fallback_from {
        Some(_) => json!({"reason": "debate_blocked"}),
        None => json!({"reason": null}),
    };
    Ok(Json(ChatSendResponse {
        assistant_message: result.answer.clone(),
        ui_payload: json!({
            "session_id": body.session_id,
            "mode": body.mode,
            "route": result.route,
            "turns": turn_count,
        }),
        runtime_payload: json!({
            "request_id": result.request_id,
            "agent_statuses": result.agent_statuses,
            "debate_state": result.debate_state,
            "semantic_context": result.semantic_context,
        }),
        runtime_control,
        fallback_from: result.fallback_from.clone(),
        trace_steps: result.trace_steps,
    }))
}

// ---------------------------------------------------------------------------
// Index management
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FulltextEnsureBody {
    pub workspace_id: String,
    pub databases: Vec<String>,
    pub index_name: String,
    pub create_if_missing: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_properties")]
    pub properties: Vec<String>,
}

fn default_properties() -> Vec<String> {
    vec!["name".to_string(), "title".to_string()]
}

pub async fn fulltext_ensure(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FulltextEnsureBody>,
) -> ApiResult<Json<Value>> {
    let _permit = acquire(&state)?;
    check_workspace(&state, &body.workspace_id)?;
    if body.create_if_missing && body.labels.is_empty() {
        return Err(ApiError::bad_request(
            Uuid::new_v4().to_string(),
            "labels are required to create a fulltext index",
        ));
    }
    let mut results = BTreeMap::new();
    for db in &body.databases {
        state
            .supervisor
            .registry()
            .ensure_registered(db)
            .map_err(|error| {
                ApiError::from_failure(trellis::RequestFailure {
                    request_id: Uuid::new_v4().to_string(),
                    error,
                    trace_steps: Vec::new(),
                })
            })?;
        let entry = match state
            .graph
            .ensure_fulltext_index(
                db,
                &body.index_name,
                &body.labels,
                &body.properties,
                body.create_if_missing,
            )
            .await
        {
            Ok(result) => json!(result),
            Err(e) => json!({"error": e.to_string()}),
        };
        results.insert(db.clone(), entry);
    }
    Ok(Json(json!({"results": results})))
}

// ---------------------------------------------------------------------------
// Listings and health
// ---------------------------------------------------------------------------

pub async fn databases(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"databases": state.supervisor.registry().list_user_dbs()}))
}

pub async fn agents(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agents: Vec<Value> = state
        .supervisor
        .pool()
        .list()
        .into_iter()
        .map(|(id, database, readiness)| {
            json!({"id": id, "database": database, "readiness": readiness})
        })
        .collect();
    Json(json!({"agents": agents}))
}

/// Runtime probe: model backend configured and the pool constructed.
pub async fn health_runtime(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": if state.llm_configured { "ok" } else { "degraded" },
        "model_configured": state.llm_configured,
        "agents": state.supervisor.pool().list().len(),
    }))
}

/// Batch probe: graph backend reachability over the registered databases.
pub async fn health_batch(State(state): State<Arc<AppState>>) -> Json<Value> {
    let dbs = state.supervisor.registry().list_user_dbs();
    let mut summary = ReadinessSummary::default();
    for db in &dbs {
        match state.graph.schema_snapshot(db).await {
            Ok(_) => {
                summary.ready.insert(db.clone());
            }
            Err(_) => {
                summary.blocked.insert(db.clone());
            }
        }
    }
    let status = if summary.blocked.is_empty() { "ok" } else { "degraded" };
    Json(json!({"status": status, "readiness": summary}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis::{Config, IdentifierRegistry, MemorySpanSink, MockGraph, MockLlm, RequestSupervisor};

    fn state_with(graph: MockGraph, dbs: &[&str], config: Config) -> Arc<AppState> {
        let registry = Arc::new(IdentifierRegistry::new());
        for db in dbs {
            registry.register_db(db).unwrap();
        }
        let graph = Arc::new(graph);
        let supervisor = Arc::new(RequestSupervisor::new(
            graph.clone(),
            Arc::new(MockLlm::always("mock answer")),
            registry,
            Arc::new(config),
            Arc::new(MemorySpanSink::new()),
        ));
        Arc::new(AppState::new(supervisor, graph, true))
    }

    /// **Scenario**: a blocked debate falls back to semantic and the chat
    /// adapter reports `runtime_control.reason = "debate_blocked"`.
    #[tokio::test]
    async fn chat_send_reports_debate_blocked_fallback() {
        let state = state_with(
            MockGraph::new().with_unreachable("kgnormal"),
            &["kgnormal"],
            Config::default(),
        );
        let response = chat_send(
            State(state),
            Json(ChatSendBody {
                session_id: "s1".into(),
                message: "Compare known entities".into(),
                mode: Mode::Debate,
                workspace_id: "default".into(),
                databases: vec!["kgnormal".into()],
            }),
        )
        .await
        .expect("fallback answers");
        assert_eq!(response.0.fallback_from.as_deref(), Some("debate"));
        assert_eq!(response.0.runtime_control["reason"], "debate_blocked");
    }

    /// **Scenario**: with no permits left, requests are refused before any work.
    #[tokio::test]
    async fn exhausted_permits_return_overloaded() {
        let config = Config {
            max_concurrent_requests: 0,
            ..Config::default()
        };
        let state = state_with(MockGraph::new(), &["kgnormal"], config);
        let err = run_debate(
            State(state),
            Json(DebateBody {
                query: "anything".into(),
                workspace_id: "default".into(),
                databases: vec!["kgnormal".into()],
            }),
        )
        .await
        .err()
        .expect("must refuse");
        assert_eq!(err.status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.envelope.error_code, "overloaded");
    }

    /// **Scenario**: a chat turn for a foreign workspace is denied.
    #[tokio::test]
    async fn foreign_workspace_is_denied() {
        let state = state_with(
            MockGraph::new().with_database("kgnormal", Default::default()),
            &["kgnormal"],
            Config::default(),
        );
        let err = run_agent_semantic(
            State(state),
            Json(SemanticBody {
                query: "Who supplies ACME?".into(),
                workspace_id: "tenant2".into(),
                databases: vec!["kgnormal".into()],
                entity_overrides: Vec::new(),
                label_hints: BTreeMap::new(),
            }),
        )
        .await
        .err()
        .expect("must deny");
        assert_eq!(err.status, axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.envelope.error_code, "policy_denied");
    }
}
