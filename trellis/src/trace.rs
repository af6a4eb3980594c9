//! Trace topology and observability spans.
//!
//! Every run produces a DAG of [`TraceStep`]s: `parent_id` for linear chains,
//! `parent_ids` for joins. The recorder guarantees the invariants a UI relies
//! on: node ids are unique within the request and every referenced parent was
//! recorded earlier, so rendering never needs heuristics.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Step kinds, named for where they are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Orchestration,
    Fanout,
    FanOutChild,
    Collect,
    Synthesis,
    Route,
    Resolve,
    Specialist,
    Answer,
}

/// One node in the trace DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    /// Stable within the request; unique across all steps of the run.
    pub node_id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Agent (database) the step belongs to, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Coarse phase label shown by the UI (e.g. "resolve", "debate").
    pub phase: String,
    /// Human-readable step content.
    pub content: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub metadata: Value,
    /// Single parent for linear chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Multiple parents for joins (COLLECT).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parent_ids: Vec<String>,
}

impl TraceStep {
    pub fn new(step_type: StepType, phase: impl Into<String>) -> Self {
        Self {
            node_id: new_node_id(),
            step_type,
            agent: None,
            phase: phase.into(),
            content: String::new(),
            metadata: Value::Null,
            parent_id: None,
            parent_ids: Vec::new(),
        }
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn parents(mut self, parent_ids: Vec<String>) -> Self {
        self.parent_ids = parent_ids;
        self
    }
}

fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Collects the steps of one request and enforces the DAG invariants.
pub struct TraceRecorder {
    inner: Mutex<RecorderInner>,
}

struct RecorderInner {
    steps: Vec<TraceStep>,
    seen: HashSet<String>,
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                steps: Vec::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// Appends a step, returning its node id. Fails when the step reuses an id
    /// or references a parent that was not recorded earlier; both indicate a
    /// flow bug, not bad input.
    pub fn record(&self, step: TraceStep) -> Result<String, OrchestratorError> {
        let mut inner = self.inner.lock().expect("trace lock");
        if inner.seen.contains(&step.node_id) {
            return Err(OrchestratorError::Internal(format!(
                "duplicate trace node id {}",
                step.node_id
            )));
        }
        for parent in step.parent_id.iter().chain(step.parent_ids.iter()) {
            if !inner.seen.contains(parent) {
                return Err(OrchestratorError::Internal(format!(
                    "trace step references unknown parent {parent}"
                )));
            }
        }
        let id = step.node_id.clone();
        inner.seen.insert(id.clone());
        inner.steps.push(step);
        Ok(id)
    }

    /// Snapshot of all steps recorded so far, in emission order.
    pub fn steps(&self) -> Vec<TraceStep> {
        self.inner.lock().expect("trace lock").steps.clone()
    }
}

/// A nested timing span for the observability sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    /// Unix milliseconds.
    pub start: u64,
    pub end: u64,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Sink for finished spans. Implementations must tolerate concurrent workers.
pub trait SpanSink: Send + Sync {
    fn record(&self, span: Span);
}

/// Keeps spans in memory; used by tests and returned in run outcomes.
#[derive(Default)]
pub struct MemorySpanSink {
    spans: Mutex<Vec<Span>>,
}

impl MemorySpanSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().expect("span lock").clone()
    }
}

impl SpanSink for MemorySpanSink {
    fn record(&self, span: Span) {
        self.spans.lock().expect("span lock").push(span);
    }
}

/// Forwards spans to the tracing subscriber as debug events.
#[derive(Default)]
pub struct TracingSpanSink;

impl SpanSink for TracingSpanSink {
    fn record(&self, span: Span) {
        tracing::debug!(
            name = %span.name,
            start = span.start,
            end = span.end,
            parent = span.parent.as_deref().unwrap_or(""),
            "span"
        );
    }
}

/// Current time as unix milliseconds, for span boundaries.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
