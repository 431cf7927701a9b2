//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies)
//! via the base URL override in [`ProviderConfig`].

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, CreateEmbeddingRequest,
    EmbeddingInput,
};
use async_trait::async_trait;

use super::LlmProvider;
use crate::config::ProviderConfig;
use crate::error::{Error, ProviderError, Result};

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions and embeddings.
/// Compatible with any API that follows the `OpenAI` spec.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiProvider {
    /// Creates a new provider from configuration.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Self {
            client: Client::with_config(openai_config),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }

    /// Maps SDK errors onto the transport/rejected split the job runner
    /// uses for retry decisions.
    fn map_error(err: &OpenAIError) -> Error {
        match err {
            OpenAIError::ApiError(api) => Error::Provider(ProviderError::Rejected {
                message: api.message.clone(),
            }),
            other => Error::Provider(ProviderError::Transport {
                message: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequest {
            model: self.embedding_model.clone(),
            input: EmbeddingInput::String(text.to_string()),
            ..Default::default()
        };

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Self::map_error(&e))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Provider(ProviderError::EmptyResponse))
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let message = ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            name: None,
        });

        let request = CreateChatCompletionRequest {
            model: self.chat_model.clone(),
            messages: vec![message],
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| Self::map_error(&e))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        if content.is_empty() {
            return Err(Error::Provider(ProviderError::EmptyResponse));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            api_key: "test-key".to_string(),
            base_url: Some("http://localhost:9999/v1".to_string()),
            chat_model: "gpt-5-mini-2025-08-07".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }

    #[test]
    fn test_provider_construction() {
        let provider = OpenAiProvider::new(&test_config());
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.chat_model, "gpt-5-mini-2025-08-07");
    }

    #[test]
    fn test_debug_hides_client() {
        let provider = OpenAiProvider::new(&test_config());
        let debug = format!("{provider:?}");
        assert!(debug.contains("chat_model"));
        assert!(!debug.contains("test-key"));
    }
}
