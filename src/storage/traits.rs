//! Storage trait definition.
//!
//! Defines the interface for persistent storage backends, enabling
//! pluggable storage implementations. Embedding and queue operations are
//! backend-specific and live on the concrete type.

use serde::Serialize;

use crate::core::{AnalysisResult, LogChunk, Repository, WorkflowRun};
use crate::error::Result;

/// Trait for persistent storage backends.
///
/// Implementations handle repositories, runs, chunks and analysis results.
/// All multi-row writes must be atomic.
pub trait Storage: Send {
    /// Initializes storage (creates schema, runs migrations).
    ///
    /// Should be idempotent - safe to call multiple times.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    fn init(&mut self) -> Result<()>;

    /// Checks if storage is initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    fn is_initialized(&self) -> Result<bool>;

    /// Resets all stored state.
    ///
    /// Deletes all data but preserves the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    fn reset(&mut self) -> Result<()>;

    // ==================== Repository Operations ====================

    /// Inserts or updates a repository keyed by its provider ID.
    ///
    /// Returns the repository's storage ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_repository(&mut self, repository: &Repository) -> Result<i64>;

    /// Retrieves a repository by provider ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_repository_by_provider(&self, provider_id: i64) -> Result<Option<Repository>>;

    /// Retrieves a repository by `owner/name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_repository_by_full_name(&self, owner: &str, name: &str) -> Result<Option<Repository>>;

    // ==================== Run Operations ====================

    /// Inserts or updates a run keyed by its provider run ID.
    ///
    /// Returns the run's storage ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_run(&mut self, run: &WorkflowRun) -> Result<i64>;

    /// Retrieves a run by storage ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_run(&self, id: i64) -> Result<Option<WorkflowRun>>;

    /// Retrieves a run by provider run ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_run_by_provider(&self, provider_run_id: i64) -> Result<Option<WorkflowRun>>;

    // ==================== Chunk Operations ====================

    /// Atomically replaces all chunks of a run.
    ///
    /// Deletes existing chunks first, then inserts the new set in index
    /// order with NULL embeddings. Returns the persisted chunks with their
    /// assigned IDs. Safe to re-run: deletion happens first, inside the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn replace_chunks(&mut self, run_id: i64, chunks: &[LogChunk]) -> Result<Vec<LogChunk>>;

    /// Retrieves all chunks for a run in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_chunks(&self, run_id: i64) -> Result<Vec<LogChunk>>;

    /// Retrieves a specific chunk by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_chunk(&self, id: i64) -> Result<Option<LogChunk>>;

    /// Returns the count of chunks for a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    fn chunk_count(&self, run_id: i64) -> Result<usize>;

    // ==================== Analysis Operations ====================

    /// Inserts or updates the analysis result keyed by run ID.
    ///
    /// Returns the result's storage ID. This is the last write of a
    /// pipeline job.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_analysis(&mut self, result: &AnalysisResult) -> Result<i64>;

    /// Retrieves the analysis result for a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_analysis(&self, run_id: i64) -> Result<Option<AnalysisResult>>;

    /// Gets storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    fn stats(&self) -> Result<StorageStats>;
}

/// Storage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    /// Number of repositories stored.
    pub repository_count: usize,
    /// Number of runs stored.
    pub run_count: usize,
    /// Total number of chunks across all runs.
    pub chunk_count: usize,
    /// Number of analysis results.
    pub analysis_count: usize,
    /// Schema version.
    pub schema_version: u32,
    /// Database file size in bytes (if applicable).
    pub db_size: Option<u64>,
}

/// Embedding coverage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingStats {
    /// Total chunk rows.
    pub total: usize,
    /// Chunks with a stored embedding.
    pub with_embeddings: usize,
    /// Chunks whose embedding is still NULL.
    pub without_embeddings: usize,
    /// Coverage percentage in [0, 100].
    pub percent_complete: f64,
}
