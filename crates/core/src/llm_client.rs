use crate::message::{Message, MessageRole};
use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::pin::Pin;

/// One prior entry of the conversation, as sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Everything the model service needs for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub user_text: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// The same request with a different final user turn.
    pub fn with_user_text(&self, user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..self.clone()
        }
    }
}

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM. An `Err` item is a chunk that could
/// not be decoded; the stream may continue after it.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent>> + Send>>;

/// A generic client for a chat-completion model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call and returns the full completion text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Makes a streaming call; the returned stream ends with the completion.
    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("Missing API key for the model service")]
    MissingApiKey,
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// Fails before any request is attempted when the bearer credential is empty.
    pub fn new(
        api_key: &SecretString,
        api_base: &str,
        model: impl Into<String>,
    ) -> Result<Self, ClientConfigError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ClientConfigError::MissingApiKey);
        }
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(api_base);
        Ok(Self {
            client: Client::with_config(config),
            model: model.into(),
        })
    }

    fn build_messages(request: &CompletionRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()?
                .into(),
        ];
        for turn in &request.history {
            match turn.role {
                MessageRole::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.clone())
                        .build()?
                        .into(),
                ),
                MessageRole::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.clone())
                        .build()?
                        .into(),
                ),
            };
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user_text.clone())
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(&request)?)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(body).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("LLM response had no text content."))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<LLMStream> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(&request)?)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(body).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    if content.is_empty() {
                        None
                    } else {
                        Some(Ok(LLMStreamEvent::TextChunk(content)))
                    }
                }
                Err(e) => Some(Err(anyhow!(e))),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "system".to_string(),
            history: vec![
                ChatTurn {
                    role: MessageRole::Assistant,
                    content: "Bonjour".to_string(),
                },
                ChatTurn {
                    role: MessageRole::User,
                    content: "Salut".to_string(),
                },
            ],
            user_text: "Question".to_string(),
            max_tokens: 150,
            temperature: 0.3,
        }
    }

    #[test]
    fn test_missing_api_key_is_rejected_up_front() {
        let key = SecretString::from("   ");
        let result = OpenAICompatibleClient::new(&key, "https://api.openai.com/v1", "gpt-4o-mini");
        assert!(matches!(result, Err(ClientConfigError::MissingApiKey)));
    }

    #[test]
    fn test_build_messages_orders_system_history_then_user() {
        let messages = OpenAICompatibleClient::build_messages(&request()).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_with_user_text_keeps_everything_else() {
        let original = request();
        let retried = original.with_user_text("Corrige ton format");
        assert_eq!(retried.user_text, "Corrige ton format");
        assert_eq!(retried.history, original.history);
        assert_eq!(retried.max_tokens, original.max_tokens);
    }
}
