//! Explicit per-request context.
//!
//! Everything that used to be ambient (shared memory, cancellation, trace and
//! span collection, workspace) travels in one value created by the
//! supervisor and passed through the flows. No process-wide mutable state
//! participates in request handling except the registry and the agent pool.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::memory::SharedMemory;
use crate::tools::ToolContext;
use crate::trace::{SpanSink, TraceRecorder};

/// State scoped to exactly one request.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub workspace_id: String,
    /// This request's shared memory; tools receive it by reference.
    pub memory: Arc<SharedMemory>,
    /// Cooperative cancellation; cancelled on deadline or client disconnect.
    pub cancel: CancellationToken,
    pub trace: Arc<TraceRecorder>,
    pub spans: Arc<dyn SpanSink>,
    pub config: Arc<Config>,
}

impl RequestContext {
    pub fn new(workspace_id: impl Into<String>, config: Arc<Config>, spans: Arc<dyn SpanSink>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            memory: Arc::new(SharedMemory::new(config.memory_capacity)),
            cancel: CancellationToken::new(),
            trace: Arc::new(TraceRecorder::new()),
            spans,
            config,
        }
    }

    /// Context handed to tools: the same shared memory, a child token.
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            memory: Arc::clone(&self.memory),
            cancel: self.cancel.child_token(),
        }
    }
}
