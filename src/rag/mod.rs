//! Retrieval-augmented generation support.
//!
//! When the classifier does not short-circuit, the analyzer retrieves
//! similar past failures and splices them into the prompt so the returned
//! narrative is grounded in prior resolutions. Retrieval is best-effort: a
//! failed query embedding degrades to an empty context, never a failed job.

pub mod prompt;

pub use prompt::{
    ANALYSIS_SYSTEM_PROMPT, CLASSIFICATION_SYSTEM_PROMPT, PROMPT_TAIL_LINES,
    build_analysis_prompt, build_classification_prompt,
};

use crate::config::PipelineConfig;
use crate::core::{DetectedError, LogChunk};
use crate::embedding::embed_text;
use crate::provider::LlmProvider;
use crate::search::{SimilarCase, find_similar_with_analysis};
use crate::storage::SqliteStorage;

/// Error messages concatenated into the retrieval query.
const QUERY_MAX_ERRORS: usize = 5;

/// Lines taken from the first error-bearing chunk.
const QUERY_CONTEXT_LINES: usize = 10;

/// Builds the retrieval query text: the top detected-error messages plus
/// the head of the first error-bearing chunk.
#[must_use]
pub fn build_retrieval_query(errors: &[DetectedError], chunks: &[LogChunk]) -> String {
    let mut parts: Vec<String> = errors
        .iter()
        .take(QUERY_MAX_ERRORS)
        .map(|e| e.message.clone())
        .collect();

    if let Some(error_chunk) = chunks.iter().find(|c| c.has_errors) {
        parts.push(error_chunk.head_lines(QUERY_CONTEXT_LINES).join("\n"));
    }

    parts.join("\n").trim().to_string()
}

/// Retrieves up to `rag_max_cases` similar past failures above the
/// admission threshold.
///
/// Returns an empty list when the query is empty or embedding fails; the
/// analyzer then proceeds without historical context.
pub async fn retrieve_cases(
    storage: &SqliteStorage,
    provider: &dyn LlmProvider,
    errors: &[DetectedError],
    chunks: &[LogChunk],
    config: &PipelineConfig,
) -> Vec<SimilarCase> {
    let query = build_retrieval_query(errors, chunks);
    if query.is_empty() {
        return Vec::new();
    }

    let query_vec = match embed_text(provider, &query, config).await {
        Ok(vec) => vec,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval query embedding failed, skipping RAG context");
            return Vec::new();
        }
    };

    match find_similar_with_analysis(storage, &query_vec, config.rag_max_cases) {
        Ok(cases) => cases
            .into_iter()
            .filter(|c| c.similarity >= config.rag_min_similarity)
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "similarity retrieval failed, skipping RAG context");
            Vec::new()
        }
    }
}

/// Synthesizes a narrative confidence score from the retrieved cases.
///
/// Tiers by top similarity, with the highest tier reserved for at least
/// two corroborating cases; no cases at all yields the neutral 0.5.
#[must_use]
pub fn synthesize_confidence(cases: &[SimilarCase]) -> f32 {
    let Some(top) = cases
        .iter()
        .map(|c| c.similarity)
        .fold(None::<f32>, |acc, s| {
            Some(acc.map_or(s, |a| a.max(s)))
        })
    else {
        return 0.5;
    };

    if cases.len() >= 2 && top >= 0.9 {
        0.95
    } else if top >= 0.8 {
        0.85
    } else if top >= 0.7 {
        0.75
    } else {
        0.6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Confidence;
    use crate::provider::MockProvider;
    use crate::storage::Storage;
    use crate::storage::tests_support::insert_test_run;
    use std::time::Duration;

    fn error(message: &str) -> DetectedError {
        DetectedError {
            category: "Dependency Issue".to_string(),
            message: message.to_string(),
            confidence: Confidence::High,
            evidence_lines: vec![],
            intentional: false,
            chunk_index: 0,
            step_name: "Install".to_string(),
        }
    }

    fn case(similarity: f32) -> SimilarCase {
        SimilarCase {
            chunk: LogChunk::new(1, 0, "s".to_string(), "c".to_string(), 0, 0),
            similarity,
            workflow_name: None,
            failure_type: None,
            root_cause: None,
            suggested_fix: None,
        }
    }

    #[test]
    fn test_query_concatenates_top_errors() {
        let errors: Vec<DetectedError> =
            (0..8).map(|i| error(&format!("error {i}"))).collect();
        let query = build_retrieval_query(&errors, &[]);

        assert!(query.contains("error 0"));
        assert!(query.contains("error 4"));
        assert!(!query.contains("error 5"));
    }

    #[test]
    fn test_query_includes_first_error_chunk_head() {
        let mut clean_chunk = LogChunk::new(1, 0, "a".to_string(), "clean output".to_string(), 0, 0);
        clean_chunk.set_error_count(0);
        let mut error_chunk =
            LogChunk::new(1, 1, "b".to_string(), "npm ERR! boom\ndetails".to_string(), 1, 2);
        error_chunk.set_error_count(1);

        let query = build_retrieval_query(&[error("npm ERR! boom")], &[clean_chunk, error_chunk]);
        assert!(query.contains("details"));
        assert!(!query.contains("clean output"));
    }

    #[test]
    fn test_query_empty_when_nothing_detected() {
        assert!(build_retrieval_query(&[], &[]).is_empty());
    }

    #[test]
    fn test_confidence_tiers() {
        assert!((synthesize_confidence(&[]) - 0.5).abs() < f32::EPSILON);
        assert!((synthesize_confidence(&[case(0.95), case(0.91)]) - 0.95).abs() < f32::EPSILON);
        // Single case never reaches the top tier
        assert!((synthesize_confidence(&[case(0.95)]) - 0.85).abs() < f32::EPSILON);
        assert!((synthesize_confidence(&[case(0.82)]) - 0.85).abs() < f32::EPSILON);
        assert!((synthesize_confidence(&[case(0.74)]) - 0.75).abs() < f32::EPSILON);
        assert!((synthesize_confidence(&[case(0.61)]) - 0.6).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_retrieve_cases_filters_threshold() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let provider = MockProvider::new(64);
        let config = PipelineConfig::builder()
            .embedding_inter_call_delay(Duration::ZERO)
            .embedding_dim(64)
            .build();

        // Seed a past run whose chunk text matches the query errors
        let run_id = insert_test_run(&mut storage);
        let mut chunk = LogChunk::new(
            run_id,
            0,
            "Install".to_string(),
            "npm ERR! Cannot find module 'react'".to_string(),
            0,
            0,
        );
        chunk.set_error_count(1);
        let persisted = storage.replace_chunks(run_id, &[chunk]).unwrap();
        let vector = provider.embed("npm ERR! Cannot find module 'react'").await.unwrap();
        storage
            .update_chunk_embedding(persisted[0].id.unwrap(), &vector)
            .unwrap();

        let errors = vec![error("npm ERR! Cannot find module 'react'")];
        let cases = retrieve_cases(&storage, &provider, &errors, &[], &config).await;

        assert_eq!(cases.len(), 1);
        assert!(cases[0].similarity >= config.rag_min_similarity);
    }

    #[tokio::test]
    async fn test_retrieve_cases_embedding_failure_degrades() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let provider = MockProvider::new(64).failing_embeddings();
        let config = PipelineConfig::default();

        let cases =
            retrieve_cases(&storage, &provider, &[error("boom")], &[], &config).await;
        assert!(cases.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_cases_empty_query() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        let provider = MockProvider::new(64);
        let config = PipelineConfig::default();

        let cases = retrieve_cases(&storage, &provider, &[], &[], &config).await;
        assert!(cases.is_empty());
    }
}
