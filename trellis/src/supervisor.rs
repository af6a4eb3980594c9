//! Request supervisor: validation, wiring, dispatch, deadline, fallback.
//!
//! The single entry point for a run. Validates the workspace and database
//! list against the registry, creates the request context (shared memory,
//! cancellation token, trace recorder), re-probes readiness, dispatches to the
//! semantic or debate flow, and applies the whole-request deadline. A blocked
//! debate is redirected to the semantic flow when fallback is enabled.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::AgentPool;
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::OrchestratorError;
use crate::flow::{DebateFlow, SemanticFlow, WorkerStatus};
use crate::graph::GraphClient;
use crate::llm::LlmClient;
use crate::readiness::DebateState;
use crate::registry::IdentifierRegistry;
use crate::resolve::{EntityOverride, Resolver, SemanticContext};
use crate::route::{Route, Router};
use crate::runtime::AgentRuntime;
use crate::trace::{SpanSink, StepType, TraceStep};

/// Requested routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Semantic,
    Debate,
}

/// One orchestrated request.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub query: String,
    pub workspace_id: String,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub entity_overrides: Vec<EntityOverride>,
    /// Offline label hints per question entity, fed to the reranker.
    #[serde(default)]
    pub label_hints: BTreeMap<String, Vec<String>>,
    pub mode: Mode,
    /// When true (default), a blocked debate re-dispatches to semantic.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Unified response payload for every run mode.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub request_id: String,
    pub answer: String,
    pub trace_steps: Vec<crate::trace::TraceStep>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_statuses: BTreeMap<String, WorkerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate_state: Option<DebateState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_context: Option<SemanticContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
}

/// A failed run, still carrying whatever trace was captured.
#[derive(Debug)]
pub struct RequestFailure {
    pub request_id: String,
    pub error: OrchestratorError,
    pub trace_steps: Vec<crate::trace::TraceStep>,
}

pub struct RequestSupervisor {
    registry: Arc<IdentifierRegistry>,
    pool: Arc<AgentPool>,
    semantic: SemanticFlow,
    debate: DebateFlow,
    runtime: Arc<AgentRuntime>,
    config: Arc<Config>,
    spans: Arc<dyn SpanSink>,
}

impl RequestSupervisor {
    pub fn new(
        graph: Arc<dyn GraphClient>,
        llm: Arc<dyn LlmClient>,
        registry: Arc<IdentifierRegistry>,
        config: Arc<Config>,
        spans: Arc<dyn SpanSink>,
    ) -> Self {
        let pool = Arc::new(AgentPool::new(Arc::clone(&graph), Arc::clone(&config)));
        let runtime = Arc::new(AgentRuntime::new(Arc::clone(&llm), config.max_agent_turns));
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&graph),
            Arc::clone(&llm),
            Arc::clone(&config),
        ));
        let router = Arc::new(Router::new(Some(Arc::clone(&llm)), &config));
        let semantic = SemanticFlow::new(
            resolver,
            router,
            Arc::clone(&pool),
            Arc::clone(&runtime),
            Arc::clone(&llm),
        );
        let debate = DebateFlow::new(Arc::clone(&pool), Arc::clone(&runtime), Arc::clone(&llm));
        Self {
            registry,
            pool,
            semantic,
            debate,
            runtime,
            config,
            spans,
        }
    }

    pub fn registry(&self) -> &Arc<IdentifierRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Runs one request end to end.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult, RequestFailure> {
        let ctx = RequestContext::new(
            request.workspace_id.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.spans),
        );
        let request_id = ctx.request_id.clone();
        info!(request_id = %request_id, mode = ?request.mode, "request accepted");
        let started = crate::trace::now_millis();

        let outcome = self.run_inner(&ctx, request).await;
        // Root span for the observability sink; agent-run spans nest under it.
        self.spans.record(crate::trace::Span {
            name: format!("request:{request_id}"),
            start: started,
            end: crate::trace::now_millis(),
            metadata: serde_json::json!({"ok": outcome.is_ok()}),
            parent: None,
        });

        match outcome {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!(request_id = %request_id, error = %error, "request failed");
                Err(RequestFailure {
                    request_id,
                    error,
                    trace_steps: ctx.trace.steps(),
                })
            }
        }
    }

    async fn run_inner(
        &self,
        ctx: &RequestContext,
        request: RunRequest,
    ) -> Result<RunResult, OrchestratorError> {
        let dbs = self.validate(&request)?;

        // Readiness is re-probed at the start of every request.
        self.pool.create_for_all(&dbs).await;

        let work = self.dispatch(ctx, &request, &dbs);
        match tokio::time::timeout(self.config.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                // Deadline: cancel cooperatively, give workers the grace
                // window to unwind, then surface the partial trace.
                ctx.cancel.cancel();
                tokio::time::sleep(self.config.grace).await;
                Err(OrchestratorError::Timeout {
                    scope: "request",
                    secs: self.config.request_timeout.as_secs(),
                })
            }
        }
    }

    fn validate(&self, request: &RunRequest) -> Result<Vec<String>, OrchestratorError> {
        if request.workspace_id != self.config.workspace_id {
            return Err(OrchestratorError::PolicyDenied(format!(
                "workspace `{}` is not served here",
                request.workspace_id
            )));
        }
        let dbs = if request.databases.is_empty() {
            self.registry.list_user_dbs()
        } else {
            request.databases.clone()
        };
        for db in &dbs {
            self.registry.ensure_registered(db)?;
        }
        for o in &request.entity_overrides {
            if !dbs.contains(&o.database) {
                return Err(OrchestratorError::InvalidIdentifier(format!(
                    "override for `{}` targets database `{}` outside this request",
                    o.question_entity, o.database
                )));
            }
            for label in &o.labels {
                crate::registry::require_valid_label(label)?;
            }
        }
        if dbs.is_empty() {
            return Err(OrchestratorError::Blocked(Default::default()));
        }
        Ok(dbs)
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: &RunRequest,
        dbs: &[String],
    ) -> Result<RunResult, OrchestratorError> {
        match request.mode {
            Mode::Semantic => {
                let outcome = self
                    .semantic
                    .run(
                        ctx,
                        &request.query,
                        dbs,
                        &request.entity_overrides,
                        &request.label_hints,
                        None,
                    )
                    .await?;
                Ok(RunResult {
                    request_id: ctx.request_id.clone(),
                    answer: outcome.answer,
                    trace_steps: ctx.trace.steps(),
                    agent_statuses: BTreeMap::new(),
                    debate_state: None,
                    fallback_from: None,
                    semantic_context: Some(outcome.context),
                    route: Some(outcome.route),
                })
            }
            Mode::Debate => {
                let outcome = self.debate.run(ctx, &request.query, dbs).await?;
                if outcome.state != DebateState::Blocked {
                    return Ok(RunResult {
                        request_id: ctx.request_id.clone(),
                        answer: outcome.answer,
                        trace_steps: ctx.trace.steps(),
                        agent_statuses: outcome.statuses,
                        debate_state: Some(outcome.state),
                        fallback_from: None,
                        semantic_context: None,
                        route: None,
                    });
                }

                // Blocked debate: redirect to semantic over whatever agents
                // remain, or fail with the readiness summary.
                let attempted = outcome.summary.attempted();
                if !request.fallback_enabled {
                    return Err(OrchestratorError::Blocked(outcome.summary));
                }
                let fallback_dbs = if attempted.is_empty() {
                    dbs.to_vec()
                } else {
                    attempted
                };
                info!("debate blocked, falling back to semantic flow");
                // Chain the fallback under the debate's last step so the
                // request trace keeps a single root.
                let parent = ctx.trace.steps().last().map(|s| s.node_id.clone());
                let semantic = self
                    .semantic
                    .run(
                        ctx,
                        &request.query,
                        &fallback_dbs,
                        &request.entity_overrides,
                        &request.label_hints,
                        parent,
                    )
                    .await?;
                Ok(RunResult {
                    request_id: ctx.request_id.clone(),
                    answer: semantic.answer,
                    trace_steps: ctx.trace.steps(),
                    agent_statuses: outcome.statuses,
                    debate_state: Some(DebateState::Blocked),
                    fallback_from: Some("debate".to_string()),
                    semantic_context: Some(semantic.context),
                    route: Some(semantic.route),
                })
            }
        }
    }

    /// Legacy single-route execution: no resolver, LPG specialist directly on
    /// the first database, then answer text from the agent itself.
    pub async fn run_single(
        &self,
        workspace_id: &str,
        query: &str,
        databases: &[String],
    ) -> Result<RunResult, RequestFailure> {
        let request = RunRequest {
            query: query.to_string(),
            workspace_id: workspace_id.to_string(),
            databases: databases.to_vec(),
            entity_overrides: Vec::new(),
            label_hints: BTreeMap::new(),
            mode: Mode::Semantic,
            fallback_enabled: false,
        };
        let ctx = RequestContext::new(
            workspace_id.to_string(),
            Arc::clone(&self.config),
            Arc::clone(&self.spans),
        );
        let request_id = ctx.request_id.clone();

        let run = async {
            let dbs = self.validate(&request)?;
            self.pool.create_for_all(&dbs).await;
            let db = &dbs[0];
            let agent = self
                .pool
                .agent(db)
                .ok_or_else(|| OrchestratorError::Unreachable {
                    db: db.clone(),
                    reason: "no agent".into(),
                })?;
            let prompt = format!(
                "Answer the question below using only the {db} database.\nQuestion: {query}"
            );
            let outcome = self.runtime.run(&agent, &prompt, &ctx).await?;
            let specialist_id = ctx.trace.record(
                TraceStep::new(StepType::Specialist, "single")
                    .agent(db.clone())
                    .content(outcome.text.clone()),
            )?;
            ctx.trace.record(
                TraceStep::new(StepType::Answer, "single")
                    .content(outcome.text.clone())
                    .parent(specialist_id),
            )?;
            Ok::<_, OrchestratorError>(RunResult {
                request_id: ctx.request_id.clone(),
                answer: outcome.text,
                trace_steps: ctx.trace.steps(),
                agent_statuses: BTreeMap::new(),
                debate_state: None,
                fallback_from: None,
                semantic_context: None,
                route: Some(Route::Lpg),
            })
        };

        match tokio::time::timeout(self.config.request_timeout, run).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(RequestFailure {
                request_id,
                error,
                trace_steps: ctx.trace.steps(),
            }),
            Err(_) => {
                ctx.cancel.cancel();
                Err(RequestFailure {
                    request_id,
                    error: OrchestratorError::Timeout {
                        scope: "request",
                        secs: self.config.request_timeout.as_secs(),
                    },
                    trace_steps: ctx.trace.steps(),
                })
            }
        }
    }
}
