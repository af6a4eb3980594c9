//! Tools callable by agents during a run.
//!
//! A tool is a named callable with a typed argument shape. Database-bound
//! tools capture their target database by value at construction, so a call
//! can never be retargeted at another database. Per-request state (shared
//! memory, cancellation) arrives through [`ToolContext`] at call time.

mod graph_tools;

pub use graph_tools::{
    GetSchemaTool, PutSharedResultTool, QueryDbTool, RerankCandidatesTool, TOOL_GET_SCHEMA,
    TOOL_PUT_SHARED_RESULT, TOOL_QUERY_DB, TOOL_RERANK_CANDIDATES,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::memory::SharedMemory;

/// Tool failure kinds. `Denied` means the call was rejected before any I/O
/// (for example an invalid identifier); the other two happened while running.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}: arguments rejected: {1}")]
    InvalidArguments(String, String),
    #[error("{0}: {1}")]
    Execution(String, String),
    #[error("{0}: denied: {1}")]
    Denied(String, String),
    /// The captured database became unreachable mid-call.
    #[error("database {0} unreachable: {1}")]
    Unreachable(String, String),
}

/// Tool specification handed to the model: name, description, argument schema.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Text result of one tool call, plus metadata merged into the call's span
/// (e.g. cache hit/miss).
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub text: String,
    pub span_metadata: Value,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            span_metadata: Value::Null,
        }
    }
}

/// Request-scoped context injected into every tool call by the runtime.
#[derive(Clone)]
pub struct ToolContext {
    /// The current request's shared memory; never crosses requests.
    pub memory: Arc<SharedMemory>,
    /// Cooperative cancellation for in-flight backend calls.
    pub cancel: CancellationToken,
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within one agent's tool set.
    fn name(&self) -> &str;

    /// Specification shown to the model.
    fn spec(&self) -> ToolSpec;

    /// Executes with JSON arguments and the request context.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Tools available to one agent, keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; replaces an existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs for all registered tools, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
