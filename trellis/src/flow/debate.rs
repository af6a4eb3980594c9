//! Debate flow: fan the question out to every available agent, collect, and
//! synthesize.
//!
//! Ordering contract: ORCHESTRATION, then FANOUT, then one FAN_OUT_CHILD per
//! attempted agent (in settle order), then COLLECT joining the children that
//! answered, then SYNTHESIS. COLLECT is only emitted once every spawned task
//! has settled; worker failures never fail the debate while at least one
//! worker answers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::agent::AgentPool;
use crate::context::RequestContext;
use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::readiness::{debate_state, DebateState, ReadinessSummary};
use crate::runtime::AgentRuntime;
use crate::trace::{StepType, TraceStep};

/// Terminal status of one debate worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Answered,
    Timeout,
    ToolError,
    Unreachable,
}

/// Result of one debate run.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    /// Synthesized answer; empty when the debate was blocked.
    pub answer: String,
    pub state: DebateState,
    /// One entry per attempted agent plus every unreachable database.
    pub statuses: BTreeMap<String, WorkerStatus>,
    pub summary: ReadinessSummary,
}

pub struct DebateFlow {
    pool: Arc<AgentPool>,
    runtime: Arc<AgentRuntime>,
    llm: Arc<dyn LlmClient>,
}

impl DebateFlow {
    pub fn new(pool: Arc<AgentPool>, runtime: Arc<AgentRuntime>, llm: Arc<dyn LlmClient>) -> Self {
        Self { pool, runtime, llm }
    }

    pub async fn run(
        &self,
        ctx: &RequestContext,
        question: &str,
        dbs: &[String],
    ) -> Result<DebateOutcome, OrchestratorError> {
        let summary = self.pool.readiness(dbs);
        let mut statuses: BTreeMap<String, WorkerStatus> = summary
            .blocked
            .iter()
            .map(|db| (db.clone(), WorkerStatus::Unreachable))
            .collect();

        let orchestration_id = ctx.trace.record(
            TraceStep::new(StepType::Orchestration, "debate")
                .content(format!("debate across {} database(s)", dbs.len()))
                .metadata(json!({
                    "databases": dbs,
                    "ready": &summary.ready,
                    "degraded": &summary.degraded,
                    "unreachable": &summary.blocked,
                })),
        )?;

        // Fan-out is unconditional over ready ∪ degraded; even a snapshot with
        // no ready database lets the degraded agents attempt an answer. The
        // final state still reflects the snapshot, so the supervisor decides
        // the fallback after they had their chance.
        let attempted = summary.attempted();
        let fanout_id = ctx.trace.record(
            TraceStep::new(StepType::Fanout, "debate")
                .content(format!("fanning out to {} agent(s)", attempted.len()))
                .parent(orchestration_id)
                .metadata(json!({"agents": &attempted})),
        )?;

        // Bounded fan-out: at most `fanout_cap` workers in flight.
        let permits = Arc::new(Semaphore::new(
            attempted.len().min(ctx.config.fanout_cap).max(1),
        ));
        let mut tasks: JoinSet<(String, Result<String, OrchestratorError>)> = JoinSet::new();
        for db in &attempted {
            let Some(agent) = self.pool.agent(db) else {
                statuses.insert(db.clone(), WorkerStatus::Unreachable);
                continue;
            };
            let runtime = Arc::clone(&self.runtime);
            let permits = Arc::clone(&permits);
            let worker_ctx = ctx.clone();
            let db = db.clone();
            let prompt = format!(
                "Answer the question below using only the {db} database.\n\
                 Question: {question}\n\
                 Record your final answer with put_shared_result before replying."
            );
            let agent_timeout = ctx.config.agent_timeout;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result =
                    match tokio::time::timeout(agent_timeout, runtime.run(&agent, &prompt, &worker_ctx))
                        .await
                    {
                        Ok(Ok(outcome)) => Ok(outcome.text),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(OrchestratorError::Timeout {
                            scope: "agent",
                            secs: agent_timeout.as_secs(),
                        }),
                    };
                (db, result)
            });
        }

        // Collect barrier: every spawned task settles before COLLECT exists.
        let mut answered_child_ids: Vec<String> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (db, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "debate worker panicked");
                    continue;
                }
            };
            let (status, content) = match result {
                Ok(text) => {
                    ctx.memory.put_result(&db, text.clone());
                    (WorkerStatus::Answered, text)
                }
                Err(OrchestratorError::Timeout { secs, .. }) => (
                    WorkerStatus::Timeout,
                    format!("agent timed out after {secs}s"),
                ),
                Err(OrchestratorError::Cancelled) => {
                    (WorkerStatus::Timeout, "agent run cancelled".to_string())
                }
                Err(OrchestratorError::Unreachable { reason, .. }) => {
                    (WorkerStatus::Unreachable, reason)
                }
                Err(e) => (WorkerStatus::ToolError, e.to_string()),
            };
            statuses.insert(db.clone(), status);
            let child_id = ctx.trace.record(
                TraceStep::new(StepType::FanOutChild, "debate")
                    .agent(db.clone())
                    .content(content)
                    .parent(fanout_id.clone())
                    .metadata(json!({"status": status})),
            )?;
            if status == WorkerStatus::Answered {
                answered_child_ids.push(child_id);
            }
        }

        if answered_child_ids.is_empty() {
            // Error isolation only holds while someone answered; zero
            // successes blocks the debate.
            warn!("debate produced no successful fragments");
            return Ok(DebateOutcome {
                answer: String::new(),
                state: DebateState::Blocked,
                statuses,
                summary,
            });
        }

        let collect_id = ctx.trace.record(
            TraceStep::new(StepType::Collect, "debate")
                .content(format!(
                    "collected {} of {} fragments",
                    answered_child_ids.len(),
                    attempted.len()
                ))
                .parents(answered_child_ids.clone())
                .metadata(json!({
                    "answered": answered_child_ids.len(),
                    "attempted": attempted.len(),
                })),
        )?;

        let answer = self.synthesize(ctx, question, &statuses).await?;
        ctx.trace.record(
            TraceStep::new(StepType::Synthesis, "debate")
                .content(answer.clone())
                .parent(collect_id)
                .metadata(json!({"statuses": &statuses})),
        )?;

        Ok(DebateOutcome {
            answer,
            state: debate_state(&summary),
            statuses,
            summary,
        })
    }

    /// Supervisor synthesis over every fragment in shared memory plus the
    /// per-worker statuses.
    async fn synthesize(
        &self,
        ctx: &RequestContext,
        question: &str,
        statuses: &BTreeMap<String, WorkerStatus>,
    ) -> Result<String, OrchestratorError> {
        let fragments = ctx.memory.all_results();
        let mut report = String::new();
        for (db, status) in statuses {
            let fragment = fragments
                .get(db)
                .map(String::as_str)
                .unwrap_or("(no answer)");
            report.push_str(&format!("- {db} [{status:?}]: {fragment}\n"));
        }
        let prompt = format!(
            "You are the debate supervisor. Independent database agents \
             answered the same question; reconcile them into one answer, \
             noting disagreements and ignoring agents that failed.\n\
             Question: {question}\n\
             Agent reports:\n{report}"
        );
        let messages = [Message::user(prompt)];
        let reply = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            reply = self.llm.complete(&messages, &[]) => reply?,
        };
        Ok(reply.content)
    }
}
