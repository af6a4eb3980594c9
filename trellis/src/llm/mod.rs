//! Model client abstraction for tool-using agent runs.
//!
//! The runtime depends on a callable that takes messages plus tool
//! specifications and returns assistant text with optional tool calls; this
//! module defines the trait, a scripted [`MockLlm`] for tests, and the
//! [`ChatOpenAI`] backend.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;
use crate::tools::ToolSpec;

/// Model backend failure.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model backend: {0}")]
    Backend(String),
    #[error("model call cancelled")]
    Cancelled,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRequest {
    /// Provider call id, echoed back when correlating results.
    pub id: Option<String>,
    /// Tool name as listed in the run's tool specs.
    pub name: String,
    /// Arguments as a JSON string; parsed by the tool itself.
    pub arguments: String,
}

/// Token usage for one model call.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    /// Accumulates another call's usage into this one.
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from one model completion.
#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    /// Assistant text; may be empty when the turn is tool calls only.
    pub content: String,
    /// Tool calls for this turn; empty ends the tool loop.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<LlmUsage>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest {
                id: None,
                name: name.into(),
                arguments: arguments.to_string(),
            }],
            ..Default::default()
        }
    }
}

/// Tool-calling chat client. One turn per call: read messages and available
/// tools, return assistant content and any tool invocations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError>;
}
