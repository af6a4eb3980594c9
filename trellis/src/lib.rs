//! # Trellis
//!
//! Multi-agent question answering over labeled property graphs. A request
//! fans a natural-language question out across per-database agents under one
//! of two strategies, the **semantic flow** (resolve entities, route, run a
//! specialist, compose) or the **debate** (parallel fan-out, collect,
//! supervisor synthesis), and returns one answer plus a trace DAG a UI can
//! render without heuristics.
//!
//! ## Design principles
//!
//! - **Explicit request context**: shared memory, cancellation, trace and span
//!   collection travel in [`RequestContext`]; no request-scoped globals.
//! - **Closure-bound tools**: every database-bound tool captures its target
//!   database at construction, so a call can never be retargeted.
//! - **Validate before I/O**: database names and Cypher labels pass
//!   [`registry`] validation before any statement is built.
//! - **Seams are traits**: the model backend ([`LlmClient`]) and the graph
//!   backend ([`GraphClient`]) are traits with production and mock
//!   implementations; every flow is testable without a live backend.
//!
//! ## Main modules
//!
//! - [`supervisor`]: [`RequestSupervisor`], [`RunRequest`], [`RunResult`]: the entry point.
//! - [`flow`]: [`SemanticFlow`] (resolve → route → specialist → answer) and
//!   [`DebateFlow`] (fan-out → collect → synthesis).
//! - [`agent`]: [`Agent`], [`AgentPool`]: per-database agents with bound tool sets.
//! - [`resolve`]: entity extraction, candidate retrieval, deterministic reranking.
//! - [`route`]: [`Router`]: deterministic `{lpg, rdf, hybrid}` classification.
//! - [`runtime`]: [`AgentRuntime`]: the tool loop over any [`LlmClient`].
//! - [`graph`]: [`GraphClient`], [`Neo4jGraph`], [`MockGraph`]: read-only Cypher,
//!   fulltext, schema snapshots.
//! - [`memory`]: [`SharedMemory`]: per-request bounded LRU and answer fragments.
//! - [`trace`]: [`TraceStep`] DAG recorder and observability [`Span`]s.
//! - [`registry`]: identifier validation and the database registry.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod message;
pub mod readiness;
pub mod registry;
pub mod resolve;
pub mod route;
pub mod runtime;
pub mod supervisor;
pub mod tools;
pub mod trace;

pub use agent::{Agent, AgentPool};
pub use config::Config;
pub use context::RequestContext;
pub use error::OrchestratorError;
pub use flow::{DebateFlow, DebateOutcome, SemanticFlow, SemanticOutcome, WorkerStatus};
pub use graph::{
    CandidateHit, EnsureResult, GraphClient, GraphError, MockGraph, Neo4jGraph, SchemaSnapshot,
};
pub use llm::{ChatOpenAI, LlmClient, LlmError, LlmReply, LlmUsage, MockLlm, ToolCallRequest};
pub use memory::SharedMemory;
pub use message::Message;
pub use readiness::{debate_state, DebateState, Readiness, ReadinessSummary};
pub use registry::IdentifierRegistry;
pub use resolve::{CandidateEntity, CandidateSource, EntityOverride, Resolver, SemanticContext};
pub use route::{Route, Router};
pub use runtime::{AgentRuntime, RunOutcome};
pub use supervisor::{Mode, RequestFailure, RequestSupervisor, RunRequest, RunResult};
pub use tools::{Tool, ToolContext, ToolError, ToolOutput, ToolRegistry, ToolSpec};
pub use trace::{MemorySpanSink, Span, SpanSink, StepType, TraceRecorder, TraceStep, TracingSpanSink};
