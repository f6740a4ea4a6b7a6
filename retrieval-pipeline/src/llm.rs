//! Concrete `Llm` adapter over `async_openai`, used by the RAG Orchestrator
//! for both the non-streaming `query` path and the token-streamed
//! `stream` path.

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::{
    domain::{Llm, LlmMessage},
    error::AppError,
};
use futures::{stream::BoxStream, StreamExt};

pub struct OpenAiLlm {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiLlm {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn to_request_messages(messages: Vec<LlmMessage>) -> Vec<ChatCompletionRequestMessage> {
    messages
        .into_iter()
        .map(|message| match message.role {
            "system" => ChatCompletionRequestSystemMessage::from(message.content).into(),
            _ => ChatCompletionRequestUserMessage::from(message.content).into(),
        })
        .collect()
}

#[async_trait]
impl Llm for OpenAiLlm {
    async fn complete(
        &self,
        messages: Vec<LlmMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_request_messages(messages))
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("empty completion response".into()))
    }

    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_request_messages(messages))
            .temperature(temperature)
            .max_tokens(max_tokens)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;
        let mapped = stream.map(|chunk| {
            let chunk = chunk?;
            let delta = chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone())
                .unwrap_or_default();
            Ok(delta)
        });

        Ok(mapped.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::LlmMessage;

    #[test]
    fn system_and_user_messages_map_to_distinct_request_roles() {
        let messages = vec![LlmMessage::system("be terse"), LlmMessage::user("hi")];
        let request_messages = to_request_messages(messages);
        assert_eq!(request_messages.len(), 2);
    }
}
