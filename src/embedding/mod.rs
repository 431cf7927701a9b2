//! Embedding generation for chunk-level semantic retrieval.
//!
//! Embeddings come from the configured [`LlmProvider`]; this module owns
//! input preparation, cosine similarity, and the best-effort per-chunk
//! driver used after persistence. A failure on one chunk never aborts the
//! remaining chunks: failures are counted, logged and reported while the
//! pipeline proceeds.

use crate::config::PipelineConfig;
use crate::core::LogChunk;
use crate::provider::LlmProvider;
use crate::storage::SqliteStorage;

/// Expected embedding dimensions from the provider.
///
/// Other dimensions are accepted and stored, but logged, so a provider
/// swap is visible in the logs before it surfaces in retrieval quality.
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Prepares chunk content for the embedding endpoint: collapses all
/// whitespace runs to single spaces and truncates to `max_chars`.
#[must_use]
pub fn prepare_input(content: &str, max_chars: usize) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.len() <= max_chars {
        return collapsed;
    }

    tracing::warn!(
        original = collapsed.len(),
        truncated = max_chars,
        "embedding input truncated"
    );

    let mut end = max_chars;
    while !collapsed.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    collapsed[..end].to_string()
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical).
/// For normalized vectors (L2 norm = 1), this is equivalent to the dot product.
///
/// # Panics
///
/// Does not panic but returns 0.0 if vectors have different lengths or zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Outcome of an embedding pass over a run's chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingReport {
    /// Chunks embedded and stored.
    pub embedded: usize,
    /// Chunks whose embedding call or storage write failed.
    pub failed: usize,
}

/// Embeds every chunk of a run, best-effort and sequential.
///
/// A short fixed delay between calls serves as soft rate-limiting against
/// the provider. All chunks are attempted regardless of individual
/// failures; the report carries both counts.
pub async fn embed_chunks(
    storage: &mut SqliteStorage,
    provider: &dyn LlmProvider,
    chunks: &[LogChunk],
    config: &PipelineConfig,
) -> EmbeddingReport {
    let mut report = EmbeddingReport::default();

    for (i, chunk) in chunks.iter().enumerate() {
        let Some(chunk_id) = chunk.id else {
            tracing::warn!(index = chunk.index, "skipping unpersisted chunk");
            report.failed += 1;
            continue;
        };

        if i > 0 && !config.embedding_inter_call_delay.is_zero() {
            tokio::time::sleep(config.embedding_inter_call_delay).await;
        }

        let input = prepare_input(&chunk.content, config.embedding_max_chars);

        match provider.embed(&input).await {
            Ok(vector) => {
                if vector.len() != config.embedding_dim {
                    tracing::info!(
                        chunk_id,
                        dimensions = vector.len(),
                        expected = config.embedding_dim,
                        "provider returned unexpected embedding dimensions"
                    );
                }
                match storage.update_chunk_embedding(chunk_id, &vector) {
                    Ok(()) => report.embedded += 1,
                    Err(e) => {
                        tracing::warn!(chunk_id, error = %e, "failed to store embedding");
                        report.failed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "embedding call failed");
                report.failed += 1;
            }
        }
    }

    report
}

/// Convenience wrapper: embeds arbitrary text with prepared input.
///
/// Used by the RAG layer to embed retrieval queries with the same input
/// discipline as chunk embedding.
///
/// # Errors
///
/// Returns the provider's error unchanged.
pub async fn embed_text(
    provider: &dyn LlmProvider,
    text: &str,
    config: &PipelineConfig,
) -> crate::error::Result<Vec<f32>> {
    let input = prepare_input(text, config.embedding_max_chars);
    provider.embed(&input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::storage::Storage;
    use std::time::Duration;

    #[test]
    fn test_prepare_input_collapses_whitespace() {
        let input = prepare_input("a\n\nb\t\tc   d", 1000);
        assert_eq!(input, "a b c d");
    }

    #[test]
    fn test_prepare_input_truncates() {
        let long = "word ".repeat(100);
        let input = prepare_input(&long, 20);
        assert!(input.len() <= 20);
    }

    #[test]
    fn test_prepare_input_truncates_at_char_boundary() {
        let input = prepare_input(&"é".repeat(30), 21);
        assert!(input.len() <= 21);
        assert!(input.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    fn config_no_delay() -> PipelineConfig {
        PipelineConfig::builder()
            .embedding_inter_call_delay(Duration::ZERO)
            .embedding_dim(32)
            .build()
    }

    fn storage_with_chunks(contents: &[&str]) -> (SqliteStorage, Vec<LogChunk>) {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let run_id = crate::storage::tests_support::insert_test_run(&mut storage);

        let chunks: Vec<LogChunk> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| LogChunk::new(run_id, i, format!("step {i}"), (*c).to_string(), i, i))
            .collect();
        let persisted = storage.replace_chunks(run_id, &chunks).unwrap();
        (storage, persisted)
    }

    #[tokio::test]
    async fn test_embed_chunks_best_effort() {
        let (mut storage, chunks) = storage_with_chunks(&["alpha", "beta"]);
        let provider = MockProvider::new(32);
        let report = embed_chunks(&mut storage, &provider, &chunks, &config_no_delay()).await;

        assert_eq!(report.embedded, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_embed_chunks_failures_do_not_abort() {
        let (mut storage, chunks) = storage_with_chunks(&["alpha", "beta", "gamma"]);
        let provider = MockProvider::new(32).failing_embeddings();
        let report = embed_chunks(&mut storage, &provider, &chunks, &config_no_delay()).await;

        assert_eq!(report.embedded, 0);
        assert_eq!(report.failed, 3);
    }

    #[tokio::test]
    async fn test_embed_chunks_idempotent() {
        let (mut storage, chunks) = storage_with_chunks(&["alpha"]);
        let provider = MockProvider::new(32);

        embed_chunks(&mut storage, &provider, &chunks, &config_no_delay()).await;
        let first = storage.get_chunk(chunks[0].id.unwrap()).unwrap().unwrap();

        embed_chunks(&mut storage, &provider, &chunks, &config_no_delay()).await;
        let second = storage.get_chunk(chunks[0].id.unwrap()).unwrap().unwrap();

        assert_eq!(first.embedding, second.embedding);
    }
}
