//! Pluggable LLM provider trait.
//!
//! Implementations translate the two operations the pipeline needs,
//! `embed` and `generate`, into provider-specific SDK calls. This keeps
//! the analyzer and embedder decoupled from any particular LLM vendor.

mod mock;
mod openai;

pub use mock::MockProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::Result;

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls) for a
/// specific provider while presenting a uniform interface to the pipeline.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"mock"`).
    fn name(&self) -> &'static str;

    /// Generates an embedding vector for the given text.
    ///
    /// # Errors
    ///
    /// Returns a provider error on API failures or empty responses.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns a provider error on API failures or empty responses.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Creates the default provider: OpenAI-compatible when credentials are
/// present in the environment, otherwise the deterministic mock so the
/// pipeline stays usable offline.
#[must_use]
pub fn create_provider(embedding_dim: usize) -> Box<dyn LlmProvider> {
    match ProviderConfig::from_env() {
        Ok(config) => Box::new(OpenAiProvider::new(&config)),
        Err(_) => {
            tracing::warn!("no provider credentials found, using deterministic mock provider");
            Box::new(MockProvider::new(embedding_dim))
        }
    }
}
