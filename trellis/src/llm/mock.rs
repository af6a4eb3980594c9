//! Scripted model client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::Message;
use crate::tools::ToolSpec;

use super::{LlmClient, LlmError, LlmReply};

/// Returns scripted replies in order; when the script runs out, repeats the
/// fallback reply. Optional per-call delays are keyed on message content so a
/// single mock can make one debate worker slow while the others answer.
pub struct MockLlm {
    script: Mutex<VecDeque<LlmReply>>,
    fallback: LlmReply,
    delay_when: Vec<(String, Duration)>,
}

impl MockLlm {
    /// Consumes `replies` in order, then keeps answering with `fallback`.
    pub fn scripted(replies: Vec<LlmReply>, fallback: LlmReply) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback,
            delay_when: Vec::new(),
        }
    }

    /// Always answers with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), LlmReply::text(text))
    }

    /// Sleeps for `delay` before answering whenever any input message
    /// contains `needle`. Used to drive per-agent timeout scenarios.
    pub fn with_delay_when(mut self, needle: impl Into<String>, delay: Duration) -> Self {
        self.delay_when.push((needle.into(), delay));
        self
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        for (needle, delay) in &self.delay_when {
            if messages.iter().any(|m| m.content().contains(needle)) {
                tokio::time::sleep(*delay).await;
            }
        }
        let next = self.script.lock().expect("mock script lock").pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: scripted replies come back in order, then the fallback repeats.
    #[tokio::test]
    async fn scripted_then_fallback() {
        let llm = MockLlm::scripted(
            vec![LlmReply::text("first"), LlmReply::text("second")],
            LlmReply::text("rest"),
        );
        assert_eq!(llm.complete(&[], &[]).await.unwrap().content, "first");
        assert_eq!(llm.complete(&[], &[]).await.unwrap().content, "second");
        assert_eq!(llm.complete(&[], &[]).await.unwrap().content, "rest");
        assert_eq!(llm.complete(&[], &[]).await.unwrap().content, "rest");
    }
}
