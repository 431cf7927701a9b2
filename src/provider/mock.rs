//! Deterministic mock provider.
//!
//! Provides hash-based pseudo-embeddings and canned generation responses
//! when no real provider is configured. Embeddings cluster lexically
//! similar text together (word and trigram overlap, not semantics), which
//! is enough for the retrieval layer to behave sensibly offline and for
//! tests to exercise the full pipeline without a network.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use super::LlmProvider;
use crate::error::{Error, ProviderError, Result};

/// Hash-based mock provider.
///
/// Embeddings are deterministic: the same text always produces the same
/// unit-length vector. Generation pops queued responses in order, falling
/// back to a fixed JSON narrative when the queue is empty.
pub struct MockProvider {
    dimensions: usize,
    responses: Mutex<Vec<String>>,
    fail_embeddings: bool,
    fail_generation: bool,
}

impl MockProvider {
    /// Creates a mock provider with the given embedding dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            responses: Mutex::new(Vec::new()),
            fail_embeddings: false,
            fail_generation: false,
        }
    }

    /// Queues a generation response (popped front-first).
    #[must_use]
    pub fn with_response(self, response: &str) -> Self {
        #[allow(clippy::unwrap_used)] // mutex cannot be poisoned during construction
        self.responses.lock().unwrap().push(response.to_string());
        self
    }

    /// Makes every embedding call fail with a transport error.
    #[must_use]
    pub const fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    /// Makes every generation call fail with a transport error.
    #[must_use]
    pub const fn failing_generation(mut self) -> Self {
        self.fail_generation = true;
        self
    }

    /// Hashes a string to a u64 value.
    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Generates a pseudo-embedding from text.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing (primary signal)
        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigram hashing (secondary signal for fuzzy matching)
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        // Normalize to unit length for cosine similarity
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail_embeddings {
            return Err(Error::Provider(ProviderError::Transport {
                message: "mock embedding failure".to_string(),
            }));
        }
        Ok(self.generate_embedding(text))
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        if self.fail_generation {
            return Err(Error::Provider(ProviderError::Transport {
                message: "mock generation failure".to_string(),
            }));
        }

        let queued = {
            #[allow(clippy::unwrap_used)] // lock poisoning implies a prior test panic
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };

        Ok(queued.unwrap_or_else(|| {
            r#"{"rootCause": "Mock analysis: the pipeline failed.", "failureStage": "unknown", "suggestedFix": "Inspect the detected errors and re-run the workflow."}"#
                .to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let provider = MockProvider::new(768);
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unit_length() {
        let provider = MockProvider::new(768);
        let emb = provider.embed("hello world").await.unwrap();
        let magnitude: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_similar_text_higher_similarity() {
        let provider = MockProvider::new(768);
        let base = provider
            .embed("Cannot find module 'react'")
            .await
            .unwrap();
        let similar = provider
            .embed("Cannot find module 'react-dom'")
            .await
            .unwrap();
        let different = provider
            .embed("database connection pool exhausted")
            .await
            .unwrap();

        let sim_similar = cosine_similarity(&base, &similar);
        let sim_different = cosine_similarity(&base, &different);
        assert!(
            sim_similar > sim_different,
            "similar text should score higher: {sim_similar} vs {sim_different}"
        );
    }

    #[tokio::test]
    async fn test_queued_responses_pop_in_order() {
        let provider = MockProvider::new(8)
            .with_response("first")
            .with_response("second");
        assert_eq!(provider.generate("p").await.unwrap(), "first");
        assert_eq!(provider.generate("p").await.unwrap(), "second");
        // Queue drained: fixed JSON fallback
        let fallback = provider.generate("p").await.unwrap();
        assert!(fallback.contains("rootCause"));
    }

    #[tokio::test]
    async fn test_failing_modes() {
        let provider = MockProvider::new(8).failing_embeddings();
        assert!(provider.embed("x").await.is_err());

        let provider = MockProvider::new(8).failing_generation();
        assert!(provider.generate("x").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_text_zero_vector() {
        let provider = MockProvider::new(16);
        let emb = provider.embed("").await.unwrap();
        assert!(emb.iter().all(|&x| x == 0.0));
    }
}
