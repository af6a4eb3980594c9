//! OpenAI-compatible chat backend.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        FunctionObject,
    },
    Client,
};
use async_trait::async_trait;

use crate::message::Message;
use crate::tools::ToolSpec;

use super::{LlmClient, LlmError, LlmReply, LlmUsage, ToolCallRequest};

/// Tool-calling chat client over any OpenAI-compatible endpoint.
///
/// The API key comes from `OPENAI_API_KEY` unless a custom config is given.
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatOpenAI {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Custom configuration, e.g. a different base URL or API key.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

fn convert_message(message: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    match message {
        Message::System(content) => ChatCompletionRequestSystemMessageArgs::default()
            .content(content.as_str())
            .build()
            .map(ChatCompletionRequestMessage::System)
            .map_err(|e| LlmError::Backend(e.to_string())),
        Message::User(content) => ChatCompletionRequestUserMessageArgs::default()
            .content(content.as_str())
            .build()
            .map(ChatCompletionRequestMessage::User)
            .map_err(|e| LlmError::Backend(e.to_string())),
        Message::Assistant(content) => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content.as_str())
            .build()
            .map(ChatCompletionRequestMessage::Assistant)
            .map_err(|e| LlmError::Backend(e.to_string())),
    }
}

fn convert_tool(spec: &ToolSpec) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: Some(spec.input_schema.clone()),
            strict: None,
        },
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        let converted: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(convert_message)
            .collect::<Result<_, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(converted);
        if !tools.is_empty() {
            builder.tools(tools.iter().map(convert_tool).collect::<Vec<_>>());
        }
        let request = builder
            .build()
            .map_err(|e| LlmError::Backend(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Backend(e.to_string()))?;

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Backend("empty choices in completion".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: Some(tc.id),
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(LlmReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }
}
