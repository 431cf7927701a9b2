//! Cosine-similarity queries over stored chunk embeddings.
//!
//! Similarity is `1 - cosine_distance`; higher is more similar. Every query
//! filters out rows whose embedding is NULL (done in SQL before the scan).
//! The default admission thresholds are 0.6 for RAG context and 0.7 for
//! general search, both configurable.

use crate::core::LogChunk;
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::storage::{EmbeddingScope, SqliteStorage, Storage};

pub use crate::storage::EmbeddingStats;

/// A chunk scored against a query vector.
#[derive(Debug, Clone)]
pub struct SimilarChunk {
    /// The matched chunk.
    pub chunk: LogChunk,
    /// Similarity in [0, 1] under normalized embeddings.
    pub similarity: f32,
}

/// A historical case: a similar chunk joined to its run's analysis.
///
/// Rows without an analysis are still returned with `None` narrative
/// fields, so callers can weigh unanalyzed history too.
#[derive(Debug, Clone)]
pub struct SimilarCase {
    /// The matched chunk.
    pub chunk: LogChunk,
    /// Similarity in [0, 1].
    pub similarity: f32,
    /// Workflow name of the originating run, when the run still exists.
    pub workflow_name: Option<String>,
    /// Failure tag from the run's analysis.
    pub failure_type: Option<String>,
    /// Root cause from the run's analysis.
    pub root_cause: Option<String>,
    /// Suggested fix from the run's analysis.
    pub suggested_fix: Option<String>,
}

/// Ranks embedding rows against the query, best first.
fn rank(
    rows: Vec<(i64, Vec<f32>)>,
    query: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Vec<(i64, f32)> {
    let mut scored: Vec<(i64, f32)> = rows
        .into_iter()
        .map(|(chunk_id, embedding)| (chunk_id, cosine_similarity(query, &embedding)))
        .filter(|(_, sim)| *sim >= min_similarity)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Hydrates ranked IDs into full chunks.
fn hydrate(storage: &SqliteStorage, ranked: Vec<(i64, f32)>) -> Vec<SimilarChunk> {
    ranked
        .into_iter()
        .filter_map(|(chunk_id, similarity)| {
            storage
                .get_chunk(chunk_id)
                .ok()
                .flatten()
                .map(|chunk| SimilarChunk { chunk, similarity })
        })
        .collect()
}

/// Finds the most similar chunks across all runs.
///
/// # Errors
///
/// Returns an error if the embedding scan fails.
pub fn find_similar_chunks(
    storage: &SqliteStorage,
    query: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Result<Vec<SimilarChunk>> {
    let rows = storage.embedding_rows(EmbeddingScope::All)?;
    Ok(hydrate(storage, rank(rows, query, limit, min_similarity)))
}

/// Finds the most similar error-bearing chunks.
///
/// # Errors
///
/// Returns an error if the embedding scan fails.
pub fn find_similar_errors(
    storage: &SqliteStorage,
    query: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Result<Vec<SimilarChunk>> {
    let rows = storage.embedding_rows(EmbeddingScope::ErrorsOnly)?;
    Ok(hydrate(storage, rank(rows, query, limit, min_similarity)))
}

/// Finds similar chunks joined to their runs' analysis results.
///
/// No similarity floor is applied here; the RAG layer filters retrieved
/// cases against its own admission threshold.
///
/// # Errors
///
/// Returns an error if the embedding scan fails.
pub fn find_similar_with_analysis(
    storage: &SqliteStorage,
    query: &[f32],
    limit: usize,
) -> Result<Vec<SimilarCase>> {
    let rows = storage.embedding_rows(EmbeddingScope::All)?;
    let ranked = rank(rows, query, limit, 0.0);

    let mut cases = Vec::with_capacity(ranked.len());
    for (chunk_id, similarity) in ranked {
        let Some(chunk) = storage.get_chunk(chunk_id)? else {
            continue;
        };

        let run = storage.get_run(chunk.run_id)?;
        let analysis = storage.get_analysis(chunk.run_id)?;

        cases.push(SimilarCase {
            similarity,
            workflow_name: run.map(|r| r.workflow_name),
            failure_type: analysis.as_ref().map(|a| a.failure_type.clone()),
            root_cause: analysis.as_ref().map(|a| a.root_cause.clone()),
            suggested_fix: analysis.map(|a| a.suggested_fix),
            chunk,
        });
    }

    Ok(cases)
}

/// Finds the most relevant chunks within one run.
///
/// Used for per-run conversational retrieval, where the scope is the run
/// being discussed rather than all history.
///
/// # Errors
///
/// Returns an error if the embedding scan fails.
pub fn find_relevant_chunks_for_run(
    storage: &SqliteStorage,
    run_id: i64,
    query: &[f32],
    limit: usize,
) -> Result<Vec<SimilarChunk>> {
    let rows = storage.embedding_rows(EmbeddingScope::Run(run_id))?;
    Ok(hydrate(storage, rank(rows, query, limit, 0.0)))
}

/// Embedding coverage statistics.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn embedding_stats(storage: &SqliteStorage) -> Result<EmbeddingStats> {
    storage.embedding_stats()
}
