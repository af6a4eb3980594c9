//! Semantic flow: Resolve → Route → Specialist(s) → Answer.
//!
//! The four stages emit a linear trace chain. Hybrid routes run the LPG and
//! RDF specialists in sequence, each with its own SPECIALIST step, keeping
//! the chain linear. Labels pinned by resolution are validated before any
//! specialist runs; an invalid label aborts the flow before Cypher exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::agent::AgentPool;
use crate::context::RequestContext;
use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::registry::require_valid_label;
use crate::resolve::{CandidateEntity, EntityOverride, Resolver, SemanticContext};
use crate::route::{Route, Router};
use crate::runtime::AgentRuntime;
use crate::trace::{StepType, TraceStep};

/// Result of one semantic run.
#[derive(Debug, Clone)]
pub struct SemanticOutcome {
    pub answer: String,
    pub route: Route,
    pub context: SemanticContext,
}

pub struct SemanticFlow {
    resolver: Arc<Resolver>,
    router: Arc<Router>,
    pool: Arc<AgentPool>,
    runtime: Arc<AgentRuntime>,
    llm: Arc<dyn LlmClient>,
}

impl SemanticFlow {
    pub fn new(
        resolver: Arc<Resolver>,
        router: Arc<Router>,
        pool: Arc<AgentPool>,
        runtime: Arc<AgentRuntime>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            resolver,
            router,
            pool,
            runtime,
            llm,
        }
    }

    /// Runs the pipeline. `parent_id` chains the RESOLVE step under an
    /// existing trace node (set when a blocked debate falls back here, so the
    /// request keeps a single root).
    pub async fn run(
        &self,
        ctx: &RequestContext,
        question: &str,
        dbs: &[String],
        overrides: &[EntityOverride],
        hints: &BTreeMap<String, Vec<String>>,
        parent_id: Option<String>,
    ) -> Result<SemanticOutcome, OrchestratorError> {
        // Resolve
        let context = self.resolver.resolve(question, dbs, overrides, hints).await?;
        let mut resolve_step = TraceStep::new(StepType::Resolve, "resolve");
        if let Some(parent) = parent_id {
            resolve_step = resolve_step.parent(parent);
        }
        let resolve_id = ctx.trace.record(
            resolve_step
                .content(format!(
                    "resolved {} entit{} across {} database{}",
                    context.entities.len(),
                    if context.entities.len() == 1 { "y" } else { "ies" },
                    dbs.len(),
                    if dbs.len() == 1 { "" } else { "s" },
                ))
                .metadata(json!({
                    "entities": &context.entities,
                    "matches": &context.matches,
                })),
        )?;

        // Route
        let route = self.router.classify(question).await;
        info!(route = route.as_str(), "question routed");
        let route_id = ctx.trace.record(
            TraceStep::new(StepType::Route, "route")
                .content(format!("routed to {}", route.as_str()))
                .parent(resolve_id)
                .metadata(json!({"route": route.as_str()})),
        )?;

        // Pinned labels are about to become part of query text; validate them
        // before any specialist can run.
        let pins: Vec<CandidateEntity> = context.pinned().into_iter().cloned().collect();
        for pin in &pins {
            for label in &pin.labels {
                require_valid_label(label)?;
            }
        }

        // Specialist(s)
        let target_db = pins
            .first()
            .map(|p| p.database.clone())
            .or_else(|| dbs.first().cloned());
        let mut prev_id = route_id;
        let mut facts: Vec<String> = Vec::new();
        if let Some(db) = target_db {
            let specialists: &[Route] = match route {
                Route::Hybrid => &[Route::Lpg, Route::Rdf],
                Route::Lpg => &[Route::Lpg],
                Route::Rdf => &[Route::Rdf],
            };
            for specialist in specialists {
                match self
                    .run_specialist(ctx, *specialist, &db, question, &pins, prev_id.clone())
                    .await?
                {
                    Some((step_id, text)) => {
                        prev_id = step_id;
                        facts.push(text);
                    }
                    None => break,
                }
            }
        }

        // Answer generation
        let answer = self
            .generate_answer(ctx, question, route, &facts, &context, overrides)
            .await?;
        ctx.trace.record(
            TraceStep::new(StepType::Answer, "answer")
                .content(answer.clone())
                .parent(prev_id)
                .metadata(json!({"route": route.as_str(), "facts": facts.len()})),
        )?;

        Ok(SemanticOutcome {
            answer,
            route,
            context,
        })
    }

    /// Runs one specialist against its agent. Returns `None` when the target
    /// database has no agent (unreachable); the flow degrades to answer
    /// generation over whatever facts were gathered.
    async fn run_specialist(
        &self,
        ctx: &RequestContext,
        route: Route,
        db: &str,
        question: &str,
        pins: &[CandidateEntity],
        parent_id: String,
    ) -> Result<Option<(String, String)>, OrchestratorError> {
        let Some(agent) = self.pool.agent(db) else {
            warn!(db, "no agent for specialist target, continuing with empty facts");
            return Ok(None);
        };
        let prompt = match route {
            Route::Rdf => rdf_prompt(question, pins),
            _ => lpg_prompt(question, pins, db),
        };
        let outcome = match self.runtime.run(&agent, &prompt, ctx).await {
            Ok(outcome) => outcome,
            Err(OrchestratorError::Unreachable { db, reason }) => {
                warn!(db = %db, reason = %reason, "specialist target went down mid-run");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let step_id = ctx.trace.record(
            TraceStep::new(StepType::Specialist, "specialist")
                .agent(db)
                .content(outcome.text.clone())
                .parent(parent_id)
                .metadata(json!({
                    "route": route.as_str(),
                    "tool_calls": outcome.tool_calls.len(),
                })),
        )?;
        Ok(Some((step_id, outcome.text)))
    }

    async fn generate_answer(
        &self,
        ctx: &RequestContext,
        question: &str,
        route: Route,
        facts: &[String],
        context: &SemanticContext,
        overrides: &[EntityOverride],
    ) -> Result<String, OrchestratorError> {
        let resolved: Vec<String> = context
            .pinned()
            .iter()
            .map(|p| format!("{} ({}, {})", p.display_name, p.database, p.node_id))
            .collect();
        let override_names: Vec<&str> = overrides
            .iter()
            .map(|o| o.display_name.as_str())
            .collect();
        let prompt = format!(
            "Compose the final answer.\n\
             Question: {question}\n\
             Route: {}\n\
             Resolved entities: {}\n\
             Caller-pinned entities: {}\n\
             Specialist findings:\n{}\n\
             Answer concisely from the findings; say so when they are empty.",
            route.as_str(),
            if resolved.is_empty() {
                "none".to_string()
            } else {
                resolved.join("; ")
            },
            if override_names.is_empty() {
                "none".to_string()
            } else {
                override_names.join("; ")
            },
            if facts.is_empty() {
                "(no findings)".to_string()
            } else {
                facts.join("\n---\n")
            },
        );
        let messages = [Message::user(prompt)];
        let reply = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            reply = self.llm.complete(&messages, &[]) => reply?,
        };
        Ok(reply.content)
    }
}

fn lpg_prompt(question: &str, pins: &[CandidateEntity], db: &str) -> String {
    let mut prompt = format!(
        "Answer this question with facts from the `{db}` database.\n\
         Question: {question}\n"
    );
    let local_pins: Vec<&CandidateEntity> = pins.iter().filter(|p| p.database == db).collect();
    if local_pins.is_empty() {
        prompt.push_str(
            "No entities are pinned; find relevant nodes first, then expand \
             their neighborhoods.\n",
        );
    } else {
        prompt.push_str("Pinned entities (use elementId binding, not name matching):\n");
        for pin in &local_pins {
            prompt.push_str(&format!(
                "- {} -> node_id {}\n", pin.display_name, pin.node_id
            ));
        }
        prompt.push_str(
            "Start from: MATCH (n) WHERE elementId(n) = $node_id \
             MATCH (n)-[r]-(m) RETURN type(r) AS rel, labels(m) AS labels, \
             coalesce(m.name, m.title) AS name LIMIT 25\n",
        );
    }
    prompt.push_str("Use query_db with bound parameters, then report the facts you found.");
    prompt
}

fn rdf_prompt(question: &str, pins: &[CandidateEntity]) -> String {
    let labels: Vec<&str> = pins
        .iter()
        .flat_map(|p| p.labels.iter().map(String::as_str))
        .collect();
    format!(
        "Answer this question about type hierarchies and definitions using \
         read-only Cypher over the class structure of the graph.\n\
         Question: {question}\n\
         Relevant labels: {}\n\
         Walk subclass/superclass relationships (e.g. \
         MATCH (c)-[:SUBCLASS_OF*1..3]->(p) RETURN c, p) and definition \
         properties; report the hierarchy facts you found.",
        if labels.is_empty() {
            "unknown".to_string()
        } else {
            labels.join(", ")
        }
    )
}
