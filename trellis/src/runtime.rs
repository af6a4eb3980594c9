//! Agent runtime: the one stable entry point for model-driven tool loops.
//!
//! `run` accepts an agent, a prompt, and the request context, and drives the
//! conversation until the model stops calling tools or the turn cap is hit.
//! Backend differences (call conventions, tool wire formats) stay behind
//! [`LlmClient`]; nothing else in the crate talks to a model SDK directly.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::agent::Agent;
use crate::context::RequestContext;
use crate::error::OrchestratorError;
use crate::llm::{LlmClient, LlmUsage};
use crate::message::Message;
use crate::trace::{now_millis, Span};

/// One executed tool call, for trace metadata and diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: String,
    pub ok: bool,
}

/// Result of one agent run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Final assistant text.
    pub text: String,
    /// Every tool call made during the run, in order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Accumulated token usage across turns, when the backend reports it.
    pub usage: Option<LlmUsage>,
    /// Spans emitted for this run (also forwarded to the context's sink).
    pub spans: Vec<Span>,
}

/// Drives tool loops over any [`LlmClient`].
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    max_turns: usize,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, max_turns: usize) -> Self {
        Self {
            llm,
            max_turns: max_turns.max(1),
        }
    }

    /// Runs one agent to completion.
    ///
    /// Cancellation is cooperative: the loop checks the context token before
    /// and during every model call. Tool failures propagate as errors; the
    /// caller decides whether they fail the request (semantic flow) or only
    /// the worker (debate).
    pub async fn run(
        &self,
        agent: &Agent,
        prompt: &str,
        ctx: &RequestContext,
    ) -> Result<RunOutcome, OrchestratorError> {
        let run_span_start = now_millis();
        let run_span_name = format!("agent:{}", agent.database);
        let tool_ctx = ctx.tool_context();
        let tool_specs = agent.tools.specs();

        let mut messages = vec![
            Message::system(agent.instructions.clone()),
            Message::user(prompt.to_string()),
        ];
        let mut outcome = RunOutcome::default();

        for turn in 0..self.max_turns {
            if ctx.cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            let reply = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                reply = self.llm.complete(&messages, &tool_specs) => reply?,
            };
            if let Some(usage) = &reply.usage {
                outcome
                    .usage
                    .get_or_insert_with(LlmUsage::default)
                    .add(usage);
            }

            if reply.tool_calls.is_empty() {
                outcome.text = reply.content;
                break;
            }
            messages.push(Message::assistant(reply.content));

            for call in &reply.tool_calls {
                let tool = agent.tools.get(&call.name).ok_or_else(|| {
                    OrchestratorError::Tool {
                        tool: call.name.clone(),
                        reason: "unknown tool".into(),
                    }
                })?;
                let args: Value =
                    serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
                debug!(agent = %agent.database, tool = %call.name, turn, "tool call");

                let span_start = now_millis();
                let result = tool.call(args, &tool_ctx).await;
                let mut span = Span {
                    name: format!("tool:{}", call.name),
                    start: span_start,
                    end: now_millis(),
                    metadata: Value::Null,
                    parent: Some(run_span_name.clone()),
                };
                match result {
                    Ok(output) => {
                        span.metadata = output.span_metadata.clone();
                        ctx.spans.record(span.clone());
                        outcome.spans.push(span);
                        outcome.tool_calls.push(ToolCallRecord {
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            ok: true,
                        });
                        messages.push(Message::user(format!(
                            "Tool {}: {}",
                            call.name, output.text
                        )));
                    }
                    Err(e) => {
                        span.metadata = json!({"error": e.to_string()});
                        ctx.spans.record(span.clone());
                        outcome.spans.push(span);
                        outcome.tool_calls.push(ToolCallRecord {
                            tool: call.name.clone(),
                            arguments: call.arguments.clone(),
                            ok: false,
                        });
                        return Err(e.into());
                    }
                }
            }
        }

        let run_span = Span {
            name: run_span_name,
            start: run_span_start,
            end: now_millis(),
            metadata: json!({
                "db": &agent.database,
                "tool_calls": outcome.tool_calls.len(),
            }),
            parent: Some(format!("request:{}", ctx.request_id)),
        };
        ctx.spans.record(run_span.clone());
        outcome.spans.push(run_span);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::Config;
    use crate::llm::{LlmReply, MockLlm};
    use crate::readiness::Readiness;
    use crate::tools::{PutSharedResultTool, ToolRegistry};
    use crate::trace::MemorySpanSink;

    fn test_agent() -> Agent {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(PutSharedResultTool::new("kgnormal")));
        Agent {
            id: "agent-kgnormal".into(),
            database: "kgnormal".into(),
            instructions: "Answer from the kgnormal database only.".into(),
            tools,
            readiness: Readiness::Ready,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(
            "default",
            Arc::new(Config::default()),
            Arc::new(MemorySpanSink::new()),
        )
    }

    /// **Scenario**: a tool-call turn executes the tool, feeds the result back,
    /// and the final text comes from the follow-up turn.
    #[tokio::test]
    async fn tool_loop_executes_and_finishes() {
        let llm = Arc::new(MockLlm::scripted(
            vec![
                LlmReply::tool_call("put_shared_result", json!({"answer": "42"})),
                LlmReply::text("done: 42"),
            ],
            LlmReply::text("unused"),
        ));
        let runtime = AgentRuntime::new(llm, 8);
        let ctx = ctx();
        let outcome = runtime.run(&test_agent(), "answer", &ctx).await.unwrap();
        assert_eq!(outcome.text, "done: 42");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].ok);
        assert_eq!(ctx.memory.all_results()["kgnormal"], "42");
    }

    /// **Scenario**: a call to an unknown tool fails the run as a tool error.
    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let llm = Arc::new(MockLlm::scripted(
            vec![LlmReply::tool_call("no_such_tool", json!({}))],
            LlmReply::text("unused"),
        ));
        let runtime = AgentRuntime::new(llm, 8);
        let err = runtime
            .run(&test_agent(), "answer", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Tool { .. }));
    }

    /// **Scenario**: a cancelled context stops the loop before the model is called.
    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let llm = Arc::new(MockLlm::always("never"));
        let runtime = AgentRuntime::new(llm, 8);
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = runtime
            .run(&test_agent(), "answer", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }
}
