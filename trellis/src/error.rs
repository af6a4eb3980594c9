//! Request-level error taxonomy.
//!
//! Every failure that can surface from a run maps to one of these kinds; the
//! HTTP layer turns each kind into exactly one status code via [`OrchestratorError::error_code`].

use thiserror::Error;

use crate::graph::GraphError;
use crate::llm::LlmError;
use crate::readiness::ReadinessSummary;
use crate::tools::ToolError;

/// Failure kinds for orchestrated runs.
///
/// Structural errors (`InvalidIdentifier`, `NotRegistered`, `PolicyDenied`)
/// surface from the supervisor before any work starts; the rest are produced
/// during a run and may leave a partial trace behind.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A database name or Cypher label failed validation. Raised before any I/O.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The database is syntactically valid but unknown to the registry.
    #[error("database not registered: {0}")]
    NotRegistered(String),

    /// The graph backend is down for one database.
    #[error("graph backend unreachable for {db}: {reason}")]
    Unreachable { db: String, reason: String },

    /// A tool failed inside an agent run. Debate workers record this as a
    /// partial fragment instead of failing the fan-out.
    #[error("tool {tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    /// A deadline elapsed. `scope` names which one (request, agent, graph).
    #[error("{scope} timed out after {secs}s")]
    Timeout { scope: &'static str, secs: u64 },

    /// The run was cancelled cooperatively (client disconnect or request deadline).
    #[error("run cancelled")]
    Cancelled,

    /// Debate had no ready or degraded agents and fallback was disabled.
    #[error("no agents available for debate")]
    Blocked(ReadinessSummary),

    /// The action or workspace is not permitted.
    #[error("not permitted: {0}")]
    PolicyDenied(String),

    /// A model backend failure that is not attributable to one tool or database.
    #[error("model backend error: {0}")]
    Llm(String),

    /// Anything uncaught. Never carries internals to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable machine-readable code used in the HTTP error envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::NotRegistered(_) => "not_registered",
            Self::Unreachable { .. } => "unreachable",
            Self::Tool { .. } => "tool_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "timeout",
            Self::Blocked(_) => "blocked",
            Self::PolicyDenied(_) => "policy_denied",
            Self::Llm(_) => "internal",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<GraphError> for OrchestratorError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Unreachable(reason) => OrchestratorError::Unreachable {
                db: String::new(),
                reason,
            },
            GraphError::Timeout => OrchestratorError::Timeout {
                scope: "graph",
                secs: 0,
            },
            GraphError::Forbidden(q) => OrchestratorError::PolicyDenied(q),
            GraphError::Syntax(msg) => OrchestratorError::Internal(msg),
        }
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => OrchestratorError::Cancelled,
            LlmError::Backend(msg) => OrchestratorError::Llm(msg),
        }
    }
}

impl From<ToolError> for OrchestratorError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Denied(tool, reason) => {
                OrchestratorError::InvalidIdentifier(format!("{tool}: {reason}"))
            }
            ToolError::Unreachable(db, reason) => OrchestratorError::Unreachable { db, reason },
            ToolError::InvalidArguments(tool, reason) | ToolError::Execution(tool, reason) => {
                OrchestratorError::Tool { tool, reason }
            }
        }
    }
}
