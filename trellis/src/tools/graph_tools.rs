//! The database-bound tool set given to every agent.
//!
//! Each tool captures its target database by value when the agent is built;
//! the model can choose arguments but never the database.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::graph::{GraphClient, GraphError};
use crate::resolve::{rank_candidates, CandidateEntity, CandidateSource};

use super::{Tool, ToolContext, ToolError, ToolOutput, ToolSpec};

pub const TOOL_QUERY_DB: &str = "query_db";
pub const TOOL_GET_SCHEMA: &str = "get_schema";
pub const TOOL_RERANK_CANDIDATES: &str = "rerank_candidates";
pub const TOOL_PUT_SHARED_RESULT: &str = "put_shared_result";

fn map_graph_error(tool: &str, db: &str, e: GraphError) -> ToolError {
    match e {
        GraphError::Forbidden(reason) => ToolError::Denied(tool.to_string(), reason),
        GraphError::Unreachable(reason) => {
            ToolError::Unreachable(db.to_string(), reason)
        }
        GraphError::Timeout => ToolError::Execution(tool.to_string(), "graph timeout".into()),
        GraphError::Syntax(reason) => ToolError::Execution(tool.to_string(), reason),
    }
}

/// Runs read-only Cypher against the captured database, consulting the
/// request's shared memory first. Results are cached by `(db, query)`
/// fingerprint; the span metadata reports `cache=hit` or `cache=miss`.
pub struct QueryDbTool {
    database: String,
    graph: Arc<dyn GraphClient>,
}

impl QueryDbTool {
    pub fn new(database: impl Into<String>, graph: Arc<dyn GraphClient>) -> Self {
        Self {
            database: database.into(),
            graph,
        }
    }
}

#[derive(Deserialize)]
struct QueryDbArgs {
    query: String,
    #[serde(default)]
    params: Value,
}

#[async_trait]
impl Tool for QueryDbTool {
    fn name(&self) -> &str {
        TOOL_QUERY_DB
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_QUERY_DB.into(),
            description: Some(format!(
                "Run a read-only Cypher query against the {} database. \
                 Values must be bound via `params`, never inlined.",
                self.database
            )),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Read-only Cypher statement"},
                    "params": {"type": "object", "description": "Query parameters"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: QueryDbArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(TOOL_QUERY_DB.into(), e.to_string()))?;

        if let Some(cached) = ctx.memory.get_cached(&self.database, &args.query) {
            return Ok(ToolOutput {
                text: cached,
                span_metadata: json!({"cache": "hit", "db": &self.database}),
            });
        }

        let rows = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Execution(TOOL_QUERY_DB.into(), "cancelled".into()));
            }
            result = self.graph.run_cypher(&self.database, &args.query, args.params) => {
                result.map_err(|e| map_graph_error(TOOL_QUERY_DB, &self.database, e))?
            }
        };

        let text = serde_json::to_string(&rows)
            .map_err(|e| ToolError::Execution(TOOL_QUERY_DB.into(), e.to_string()))?;
        ctx.memory.put_cached(&self.database, &args.query, text.clone());
        Ok(ToolOutput {
            text,
            span_metadata: json!({"cache": "miss", "db": &self.database}),
        })
    }
}

/// Returns the schema snapshot taken when the agent was built.
pub struct GetSchemaTool {
    database: String,
    rendered: String,
}

impl GetSchemaTool {
    pub fn new(database: impl Into<String>, rendered: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            rendered: rendered.into(),
        }
    }
}

#[async_trait]
impl Tool for GetSchemaTool {
    fn name(&self) -> &str {
        TOOL_GET_SCHEMA
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GET_SCHEMA.into(),
            description: Some(format!(
                "Labels, relationship types and properties of the {} database.",
                self.database
            )),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(self.rendered.clone()))
    }
}

#[derive(Deserialize)]
struct RerankArgs {
    question_entity: String,
    candidates: Vec<RerankCandidate>,
    #[serde(default)]
    hints: Vec<String>,
}

#[derive(Deserialize)]
struct RerankCandidate {
    display_name: String,
    node_id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    source: Option<CandidateSource>,
}

/// Reranks candidate entities with the deterministic scorer, using the
/// configured weights and thresholds.
pub struct RerankCandidatesTool {
    database: String,
    config: Arc<Config>,
}

impl RerankCandidatesTool {
    pub fn new(database: impl Into<String>, config: Arc<Config>) -> Self {
        Self {
            database: database.into(),
            config,
        }
    }
}

#[async_trait]
impl Tool for RerankCandidatesTool {
    fn name(&self) -> &str {
        TOOL_RERANK_CANDIDATES
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_RERANK_CANDIDATES.into(),
            description: Some(
                "Rank candidate graph entities for a question entity by lexical \
                 similarity, retrieval score, and label hints."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question_entity": {"type": "string"},
                    "candidates": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "display_name": {"type": "string"},
                                "node_id": {"type": "string"},
                                "labels": {"type": "array", "items": {"type": "string"}},
                                "score": {"type": "number"}
                            },
                            "required": ["display_name", "node_id"]
                        }
                    },
                    "hints": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["question_entity", "candidates"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: RerankArgs = serde_json::from_value(args).map_err(|e| {
            ToolError::InvalidArguments(TOOL_RERANK_CANDIDATES.into(), e.to_string())
        })?;
        let candidates: Vec<CandidateEntity> = args
            .candidates
            .into_iter()
            .map(|c| CandidateEntity {
                question_entity: args.question_entity.clone(),
                display_name: c.display_name,
                database: self.database.clone(),
                node_id: c.node_id,
                labels: c.labels,
                score: c.score,
                source: c.source.unwrap_or(CandidateSource::Fulltext),
                is_confident: false,
            })
            .collect();
        let ranked = rank_candidates(&args.question_entity, candidates, &args.hints, &self.config);
        let text = serde_json::to_string(&ranked).map_err(|e| {
            ToolError::Execution(TOOL_RERANK_CANDIDATES.into(), e.to_string())
        })?;
        Ok(ToolOutput::text(text))
    }
}

#[derive(Deserialize)]
struct PutResultArgs {
    answer: String,
}

/// Writes the agent's answer fragment into the request's shared memory.
pub struct PutSharedResultTool {
    database: String,
}

impl PutSharedResultTool {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

#[async_trait]
impl Tool for PutSharedResultTool {
    fn name(&self) -> &str {
        TOOL_PUT_SHARED_RESULT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_PUT_SHARED_RESULT.into(),
            description: Some(format!(
                "Record the final answer fragment for the {} database so the \
                 supervisor can synthesize across agents.",
                self.database
            )),
            input_schema: json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: PutResultArgs = serde_json::from_value(args).map_err(|e| {
            ToolError::InvalidArguments(TOOL_PUT_SHARED_RESULT.into(), e.to_string())
        })?;
        ctx.memory.put_result(&self.database, args.answer);
        Ok(ToolOutput::text("recorded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MockGraph;
    use crate::memory::SharedMemory;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ToolContext {
        ToolContext {
            memory: Arc::new(SharedMemory::new(10)),
            cancel: CancellationToken::new(),
        }
    }

    /// **Scenario**: the second identical query is served from shared memory and
    /// the backend is hit exactly once.
    #[tokio::test]
    async fn query_db_caches_repeat_queries() {
        let graph = Arc::new(MockGraph::new().with_rows(
            "kgfibo",
            "RETURN n",
            vec![json!({"n": {"name": "Bond"}})],
        ));
        let tool = QueryDbTool::new("kgfibo", graph.clone());
        let ctx = ctx();
        let args = json!({"query": "MATCH (n) RETURN n"});

        let first = tool.call(args.clone(), &ctx).await.unwrap();
        assert_eq!(first.span_metadata["cache"], "miss");
        let second = tool.call(args, &ctx).await.unwrap();
        assert_eq!(second.span_metadata["cache"], "hit");
        assert_eq!(first.text, second.text);
        assert_eq!(graph.cypher_calls("kgfibo"), 1);
    }

    /// **Scenario**: a mutating statement is rejected before reaching the backend.
    #[tokio::test]
    async fn query_db_rejects_writes() {
        let graph = Arc::new(MockGraph::new());
        let tool = QueryDbTool::new("kgfibo", graph.clone());
        let err = tool
            .call(json!({"query": "CREATE (n:Thing)"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Denied(_, _)));
        assert_eq!(graph.cypher_calls("kgfibo"), 0);
    }

    /// **Scenario**: put_shared_result lands in the request's shared memory under
    /// the captured database name.
    #[tokio::test]
    async fn put_shared_result_records_fragment() {
        let tool = PutSharedResultTool::new("kgnormal");
        let ctx = ctx();
        tool.call(json!({"answer": "42 suppliers"}), &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.memory.all_results()["kgnormal"], "42 suppliers");
    }
}
