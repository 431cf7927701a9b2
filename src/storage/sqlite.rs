//! `SQLite` storage implementation.
//!
//! Provides persistent storage using `SQLite` with proper transaction
//! management and migration support. Chunk embeddings are stored inline as
//! little-endian `f32` BLOBs; the queue table models an at-least-once
//! delivery channel with lock leases.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::core::{AnalysisResult, LogChunk, Repository, RunStatus, WorkflowRun};
use crate::error::{Result, StorageError};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
};
use crate::storage::traits::{EmbeddingStats, Storage, StorageStats};

/// Scope selector for embedding scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingScope {
    /// All chunks with embeddings.
    All,
    /// Only chunks where errors were extracted.
    ErrorsOnly,
    /// Only chunks belonging to one run.
    Run(i64),
}

/// A job claimed from the queue.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Queue row ID.
    pub id: i64,
    /// Raw JSON payload.
    pub payload: String,
    /// Attempts consumed including this claim.
    pub attempts: u32,
}

/// SQLite-based storage implementation.
///
/// Provides persistent storage for pipeline state with full ACID
/// guarantees.
///
/// # Examples
///
/// ```no_run
/// use loglens::storage::{SqliteStorage, Storage};
///
/// let mut storage = SqliteStorage::open("loglens.db").unwrap();
/// storage.init().unwrap();
/// ```
pub struct SqliteStorage {
    /// `SQLite` connection.
    conn: Connection,
    /// Path to the database file (None for in-memory).
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Opens or creates a `SQLite` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;

        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        // WAL mode for better concurrent access (returns result, use query_row)
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory `SQLite` database.
    ///
    /// Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;

        Ok(Self { conn, path: None })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Gets the current schema version.
    fn get_schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;

        Ok(version.and_then(|v| v.parse().ok()))
    }

    /// Sets the schema version.
    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Returns current Unix timestamp.
    #[allow(clippy::cast_possible_wrap)]
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRun> {
        Ok(WorkflowRun {
            id: Some(row.get::<_, i64>(0)?),
            provider_run_id: row.get(1)?,
            repository_id: row.get(2)?,
            workflow_name: row.get(3)?,
            status: RunStatus::parse(&row.get::<_, String>(4)?),
            trigger: row.get(5)?,
            commit_sha: row.get(6)?,
            branch: row.get(7)?,
            actor: row.get(8)?,
            provider_url: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogChunk> {
        let embedding: Option<Vec<u8>> = row.get(11)?;
        Ok(LogChunk {
            id: Some(row.get::<_, i64>(0)?),
            run_id: row.get(1)?,
            index: row.get::<_, i64>(2)? as usize,
            step_name: row.get(3)?,
            content: row.get(4)?,
            start_line: row.get::<_, i64>(5)? as usize,
            end_line: row.get::<_, i64>(6)? as usize,
            line_count: row.get::<_, i64>(7)? as usize,
            token_estimate: row.get::<_, i64>(8)? as usize,
            has_errors: row.get::<_, i64>(9)? != 0,
            error_count: row.get::<_, i64>(10)? as usize,
            embedding: embedding.map(|bytes| bytes_to_vec(&bytes)),
        })
    }

    const CHUNK_COLUMNS: &'static str = "id, run_id, chunk_index, step_name, content, start_line, end_line, line_count, token_estimate, has_errors, error_count, embedding";

    const RUN_COLUMNS: &'static str = "id, provider_run_id, repository_id, workflow_name, status, trigger_event, commit_sha, branch, actor, provider_url, created_at";
}

/// Serializes an f32 slice to little-endian bytes.
fn vec_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserializes little-endian bytes back to an f32 vector.
fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl Storage for SqliteStorage {
    fn init(&mut self) -> Result<()> {
        // Check if already initialized
        let is_init: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            // Fresh install - create schema
            self.conn
                .execute_batch(SCHEMA_SQL)
                .map_err(StorageError::from)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else {
            // Check for migrations
            if let Some(current) = self.get_schema_version()? {
                if current < CURRENT_SCHEMA_VERSION {
                    let migrations = crate::storage::schema::get_migrations_from(current);
                    for migration in migrations {
                        self.conn
                            .execute_batch(migration.sql)
                            .map_err(|e| StorageError::Migration(e.to_string()))?;
                    }
                    self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
                }
            }
        }

        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    fn reset(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            DELETE FROM analysis_results;
            DELETE FROM chunks;
            DELETE FROM runs;
            DELETE FROM repositories;
            DELETE FROM jobs;
        ",
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Repository Operations ====================

    fn upsert_repository(&mut self, repository: &Repository) -> Result<i64> {
        let now = Self::now();

        self.conn
            .execute(
                r"
            INSERT INTO repositories (provider_id, owner, name, private, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(provider_id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                private = excluded.private
        ",
                params![
                    repository.provider_id,
                    repository.owner,
                    repository.name,
                    i64::from(repository.private),
                    now,
                ],
            )
            .map_err(StorageError::from)?;

        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM repositories WHERE provider_id = ?",
                params![repository.provider_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;

        Ok(id)
    }

    fn get_repository_by_provider(&self, provider_id: i64) -> Result<Option<Repository>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, provider_id, owner, name, private FROM repositories WHERE provider_id = ?",
                params![provider_id],
                |row| {
                    Ok(Repository {
                        id: Some(row.get::<_, i64>(0)?),
                        provider_id: row.get(1)?,
                        owner: row.get(2)?,
                        name: row.get(3)?,
                        private: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;

        Ok(result)
    }

    fn get_repository_by_full_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, provider_id, owner, name, private FROM repositories WHERE owner = ? AND name = ?",
                params![owner, name],
                |row| {
                    Ok(Repository {
                        id: Some(row.get::<_, i64>(0)?),
                        provider_id: row.get(1)?,
                        owner: row.get(2)?,
                        name: row.get(3)?,
                        private: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;

        Ok(result)
    }

    // ==================== Run Operations ====================

    fn upsert_run(&mut self, run: &WorkflowRun) -> Result<i64> {
        let now = Self::now();

        self.conn
            .execute(
                r"
            INSERT INTO runs (
                provider_run_id, repository_id, workflow_name, status,
                trigger_event, commit_sha, branch, actor, provider_url, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider_run_id) DO UPDATE SET
                workflow_name = excluded.workflow_name,
                status = excluded.status,
                trigger_event = excluded.trigger_event,
                commit_sha = excluded.commit_sha,
                branch = excluded.branch,
                actor = excluded.actor,
                provider_url = excluded.provider_url
        ",
                params![
                    run.provider_run_id,
                    run.repository_id,
                    run.workflow_name,
                    run.status.as_str(),
                    run.trigger,
                    run.commit_sha,
                    run.branch,
                    run.actor,
                    run.provider_url,
                    if run.created_at > 0 { run.created_at } else { now },
                ],
            )
            .map_err(StorageError::from)?;

        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM runs WHERE provider_run_id = ?",
                params![run.provider_run_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;

        Ok(id)
    }

    fn get_run(&self, id: i64) -> Result<Option<WorkflowRun>> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?", Self::RUN_COLUMNS);
        let result = self
            .conn
            .query_row(&sql, params![id], Self::row_to_run)
            .optional()
            .map_err(StorageError::from)?;

        Ok(result)
    }

    fn get_run_by_provider(&self, provider_run_id: i64) -> Result<Option<WorkflowRun>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE provider_run_id = ?",
            Self::RUN_COLUMNS
        );
        let result = self
            .conn
            .query_row(&sql, params![provider_run_id], Self::row_to_run)
            .optional()
            .map_err(StorageError::from)?;

        Ok(result)
    }

    // ==================== Chunk Operations ====================

    #[allow(clippy::cast_possible_wrap)]
    fn replace_chunks(&mut self, run_id: i64, chunks: &[LogChunk]) -> Result<Vec<LogChunk>> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let now = Self::now();
        let mut persisted = Vec::with_capacity(chunks.len());

        // Delete-then-insert keeps re-ingestion idempotent: a retried job
        // replaces whatever the previous attempt left behind.
        tx.execute("DELETE FROM chunks WHERE run_id = ?", params![run_id])
            .map_err(StorageError::from)?;

        {
            let mut stmt = tx
                .prepare(
                    r"
                INSERT INTO chunks (
                    run_id, chunk_index, step_name, content, start_line, end_line,
                    line_count, token_estimate, has_errors, error_count,
                    embedding, embedding_dim, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)
            ",
                )
                .map_err(StorageError::from)?;

            for chunk in chunks {
                stmt.execute(params![
                    run_id,
                    chunk.index as i64,
                    chunk.step_name,
                    chunk.content,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.line_count as i64,
                    chunk.token_estimate as i64,
                    i64::from(chunk.has_errors),
                    chunk.error_count as i64,
                    now,
                ])
                .map_err(StorageError::from)?;

                let mut stored = chunk.clone();
                stored.id = Some(tx.last_insert_rowid());
                stored.run_id = run_id;
                stored.embedding = None;
                persisted.push(stored);
            }
        }

        tx.commit().map_err(StorageError::from)?;
        Ok(persisted)
    }

    fn get_chunks(&self, run_id: i64) -> Result<Vec<LogChunk>> {
        let sql = format!(
            "SELECT {} FROM chunks WHERE run_id = ? ORDER BY chunk_index",
            Self::CHUNK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;

        let chunks = stmt
            .query_map(params![run_id], Self::row_to_chunk)
            .map_err(StorageError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        Ok(chunks)
    }

    fn get_chunk(&self, id: i64) -> Result<Option<LogChunk>> {
        let sql = format!("SELECT {} FROM chunks WHERE id = ?", Self::CHUNK_COLUMNS);
        let result = self
            .conn
            .query_row(&sql, params![id], Self::row_to_chunk)
            .optional()
            .map_err(StorageError::from)?;

        Ok(result)
    }

    fn chunk_count(&self, run_id: i64) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE run_id = ?",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as usize)
    }

    // ==================== Analysis Operations ====================

    fn upsert_analysis(&mut self, result: &AnalysisResult) -> Result<i64> {
        let now = Self::now();
        let detected_errors =
            serde_json::to_string(&result.detected_errors).map_err(StorageError::from)?;
        let steps = serde_json::to_string(&result.steps).map_err(StorageError::from)?;

        self.conn
            .execute(
                r"
            INSERT INTO analysis_results (
                run_id, root_cause, failure_stage, suggested_fix, failure_type,
                priority, confidence, used_llm, detected_errors, steps, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                root_cause = excluded.root_cause,
                failure_stage = excluded.failure_stage,
                suggested_fix = excluded.suggested_fix,
                failure_type = excluded.failure_type,
                priority = excluded.priority,
                confidence = excluded.confidence,
                used_llm = excluded.used_llm,
                detected_errors = excluded.detected_errors,
                steps = excluded.steps,
                created_at = excluded.created_at
        ",
                params![
                    result.run_id,
                    result.root_cause,
                    result.failure_stage,
                    result.suggested_fix,
                    result.failure_type,
                    i64::from(result.priority),
                    f64::from(result.confidence),
                    i64::from(result.used_llm),
                    detected_errors,
                    steps,
                    now,
                ],
            )
            .map_err(StorageError::from)?;

        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM analysis_results WHERE run_id = ?",
                params![result.run_id],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;

        Ok(id)
    }

    fn get_analysis(&self, run_id: i64) -> Result<Option<AnalysisResult>> {
        let row: Option<(i64, String, String, String, String, i64, f64, i64, String, String, i64)> =
            self.conn
                .query_row(
                    r"
            SELECT id, root_cause, failure_stage, suggested_fix, failure_type,
                   priority, confidence, used_llm, detected_errors, steps, created_at
            FROM analysis_results WHERE run_id = ?
        ",
                    params![run_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                            row.get(10)?,
                        ))
                    },
                )
                .optional()
                .map_err(StorageError::from)?;

        let Some((
            id,
            root_cause,
            failure_stage,
            suggested_fix,
            failure_type,
            priority,
            confidence,
            used_llm,
            detected_errors,
            steps,
            created_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(AnalysisResult {
            id: Some(id),
            run_id,
            root_cause,
            failure_stage,
            suggested_fix,
            failure_type,
            priority: priority as u8,
            confidence: confidence as f32,
            used_llm: used_llm != 0,
            detected_errors: serde_json::from_str(&detected_errors).map_err(StorageError::from)?,
            steps: serde_json::from_str(&steps).map_err(StorageError::from)?,
            created_at,
        }))
    }

    fn stats(&self) -> Result<StorageStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(StorageError::from)?;
            Ok(n as usize)
        };

        let repository_count = count("SELECT COUNT(*) FROM repositories")?;
        let run_count = count("SELECT COUNT(*) FROM runs")?;
        let chunk_count = count("SELECT COUNT(*) FROM chunks")?;
        let analysis_count = count("SELECT COUNT(*) FROM analysis_results")?;

        let schema_version = self.get_schema_version()?.unwrap_or(0);

        let db_size = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok().map(|m| m.len()));

        Ok(StorageStats {
            repository_count,
            run_count,
            chunk_count,
            analysis_count,
            schema_version,
            db_size,
        })
    }
}

// ==================== Embedding Operations ====================

impl SqliteStorage {
    /// Stores (or overwrites) the embedding for a chunk.
    ///
    /// Idempotent: writing the same vector twice leaves the same column
    /// value.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk does not exist or the write fails.
    #[allow(clippy::cast_possible_wrap)]
    pub fn update_chunk_embedding(&mut self, chunk_id: i64, embedding: &[f32]) -> Result<()> {
        let bytes = vec_to_bytes(embedding);

        let updated = self
            .conn
            .execute(
                "UPDATE chunks SET embedding = ?, embedding_dim = ? WHERE id = ?",
                params![bytes, embedding.len() as i64, chunk_id],
            )
            .map_err(StorageError::from)?;

        if updated == 0 {
            return Err(StorageError::ChunkNotFound { id: chunk_id }.into());
        }

        Ok(())
    }

    /// Returns `(chunk_id, embedding)` pairs for the given scope.
    ///
    /// Rows whose embedding is NULL are filtered in SQL before the scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn embedding_rows(&self, scope: EmbeddingScope) -> Result<Vec<(i64, Vec<f32>)>> {
        fn row_to_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Vec<f32>)> {
            let chunk_id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((chunk_id, bytes_to_vec(&bytes)))
        }

        let (sql, run_id) = match scope {
            EmbeddingScope::All => (
                "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL",
                None,
            ),
            EmbeddingScope::ErrorsOnly => (
                "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL AND has_errors = 1",
                None,
            ),
            EmbeddingScope::Run(run_id) => (
                "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL AND run_id = ?",
                Some(run_id),
            ),
        };

        let mut stmt = self.conn.prepare(sql).map_err(StorageError::from)?;

        let rows = match run_id {
            Some(run_id) => stmt
                .query_map(params![run_id], row_to_embedding)
                .map_err(StorageError::from)?,
            None => stmt
                .query_map([], row_to_embedding)
                .map_err(StorageError::from)?,
        };

        let results = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        Ok(results)
    }

    /// Embedding coverage statistics across all chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn embedding_stats(&self) -> Result<EmbeddingStats> {
        let (total, with_embeddings): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COUNT(embedding) FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StorageError::from)?;

        let percent_complete = if total > 0 {
            (with_embeddings as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Ok(EmbeddingStats {
            total: total as usize,
            with_embeddings: with_embeddings as usize,
            without_embeddings: (total - with_embeddings) as usize,
            percent_complete,
        })
    }
}

// ==================== Queue Operations ====================

impl SqliteStorage {
    /// Enqueues a job payload on the named queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn enqueue_job(&mut self, queue: &str, payload: &str) -> Result<i64> {
        let now = Self::now();
        self.conn
            .execute(
                r"
            INSERT INTO jobs (queue, payload, status, run_after, created_at, updated_at)
            VALUES (?, ?, 'queued', 0, ?, ?)
        ",
                params![queue, payload, now, now],
            )
            .map_err(StorageError::from)?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Claims the next available job, taking a lock lease.
    ///
    /// A job is claimable when it is queued and due, or active with an
    /// expired lease (stalled worker). Stalled jobs that already consumed
    /// `max_attempts` are marked failed instead of being handed out again,
    /// which bounds redelivery for the at-least-once channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim transaction fails.
    #[allow(clippy::cast_possible_wrap)]
    pub fn claim_job(
        &mut self,
        queue: &str,
        lock: Duration,
        max_attempts: u32,
    ) -> Result<Option<ClaimedJob>> {
        let now = Self::now();
        let tx = self.conn.transaction().map_err(StorageError::from)?;

        // Retire stalled jobs that are out of retry budget.
        tx.execute(
            r"
            UPDATE jobs SET status = 'failed',
                            last_error = COALESCE(last_error, 'stalled'),
                            updated_at = ?
            WHERE queue = ? AND status = 'active' AND locked_until <= ? AND attempts >= ?
        ",
            params![now, queue, now, i64::from(max_attempts)],
        )
        .map_err(StorageError::from)?;

        let candidate: Option<(i64, String, i64)> = tx
            .query_row(
                r"
            SELECT id, payload, attempts FROM jobs
            WHERE queue = ? AND run_after <= ?
              AND (status = 'queued' OR (status = 'active' AND locked_until <= ?))
            ORDER BY id
            LIMIT 1
        ",
                params![queue, now, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(StorageError::from)?;

        let Some((id, payload, attempts)) = candidate else {
            tx.commit().map_err(StorageError::from)?;
            return Ok(None);
        };

        tx.execute(
            r"
            UPDATE jobs SET status = 'active',
                            attempts = attempts + 1,
                            locked_until = ?,
                            updated_at = ?
            WHERE id = ?
        ",
            params![now + lock.as_secs() as i64, now, id],
        )
        .map_err(StorageError::from)?;

        tx.commit().map_err(StorageError::from)?;

        Ok(Some(ClaimedJob {
            id,
            payload,
            attempts: (attempts + 1) as u32,
        }))
    }

    /// Marks a claimed job as completed. Completed jobs are retained for
    /// bounded history inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn complete_job(&mut self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET status = 'completed', locked_until = NULL, updated_at = ? WHERE id = ?",
                params![Self::now(), id],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Records a job failure.
    ///
    /// With `retry_after`, the job is requeued to run after the delay
    /// (transient failure, exponential backoff computed by the caller).
    /// Without it the job is terminally failed and retained for
    /// inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[allow(clippy::cast_possible_wrap)]
    pub fn fail_job(&mut self, id: i64, error: &str, retry_after: Option<Duration>) -> Result<()> {
        let now = Self::now();
        match retry_after {
            Some(delay) => {
                self.conn
                    .execute(
                        r"
                    UPDATE jobs SET status = 'queued',
                                    locked_until = NULL,
                                    run_after = ?,
                                    last_error = ?,
                                    updated_at = ?
                    WHERE id = ?
                ",
                        params![now + delay.as_secs().max(1) as i64, error, now, id],
                    )
                    .map_err(StorageError::from)?;
            }
            None => {
                self.conn
                    .execute(
                        r"
                    UPDATE jobs SET status = 'failed',
                                    locked_until = NULL,
                                    last_error = ?,
                                    updated_at = ?
                    WHERE id = ?
                ",
                        params![error, now, id],
                    )
                    .map_err(StorageError::from)?;
            }
        }
        Ok(())
    }

    /// Returns `(queued, active, completed, failed)` counts for a queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_counts(&self, queue: &str) -> Result<(usize, usize, usize, usize)> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs WHERE queue = ? GROUP BY status")
            .map_err(StorageError::from)?;

        let mut counts = (0usize, 0usize, 0usize, 0usize);
        let rows = stmt
            .query_map(params![queue], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StorageError::from)?;

        for row in rows {
            let (status, n) = row.map_err(StorageError::from)?;
            let n = n as usize;
            match status.as_str() {
                "queued" => counts.0 = n,
                "active" => counts.1 = n,
                "completed" => counts.2 = n,
                "failed" => counts.3 = n,
                _ => {}
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetectedError, Narrative};

    fn setup() -> SqliteStorage {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        storage
    }

    fn insert_run(storage: &mut SqliteStorage, provider_run_id: i64) -> i64 {
        let repo = Repository::new(
            provider_run_id + 9000,
            "octo".to_string(),
            "repo".to_string(),
            false,
        );
        let repo_id = storage.upsert_repository(&repo).unwrap();
        let run = WorkflowRun::new(provider_run_id, repo_id, "CI".to_string());
        storage.upsert_run(&run).unwrap()
    }

    fn make_chunks(run_id: i64, n: usize) -> Vec<LogChunk> {
        (0..n)
            .map(|i| LogChunk::new(run_id, i, format!("step {i}"), format!("content {i}"), i, i))
            .collect()
    }

    #[test]
    fn test_init() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        assert!(storage.init().is_ok());
        assert!(storage.is_initialized().unwrap());
    }

    #[test]
    fn test_init_idempotent() {
        let mut storage = SqliteStorage::in_memory().unwrap();
        assert!(storage.init().is_ok());
        assert!(storage.init().is_ok());
    }

    #[test]
    fn test_repository_upsert_by_provider_id() {
        let mut storage = setup();
        let repo = Repository::new(42, "octo".to_string(), "repo".to_string(), false);
        let id1 = storage.upsert_repository(&repo).unwrap();

        let renamed = Repository::new(42, "octo".to_string(), "renamed".to_string(), true);
        let id2 = storage.upsert_repository(&renamed).unwrap();

        assert_eq!(id1, id2);
        let loaded = storage.get_repository_by_provider(42).unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert!(loaded.private);
    }

    #[test]
    fn test_repository_by_full_name() {
        let mut storage = setup();
        let repo = Repository::new(42, "octo".to_string(), "repo".to_string(), false);
        storage.upsert_repository(&repo).unwrap();

        let found = storage
            .get_repository_by_full_name("octo", "repo")
            .unwrap();
        assert!(found.is_some());
        assert!(
            storage
                .get_repository_by_full_name("octo", "other")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_run_upsert_by_provider_run_id() {
        let mut storage = setup();
        let id1 = insert_run(&mut storage, 1001);

        // Second webhook for the same run upserts
        let repo_id = storage
            .get_repository_by_provider(1001 + 9000)
            .unwrap()
            .unwrap()
            .id
            .unwrap();
        let mut run = WorkflowRun::new(1001, repo_id, "CI renamed".to_string());
        run.branch = "main".to_string();
        let id2 = storage.upsert_run(&run).unwrap();

        assert_eq!(id1, id2);
        let loaded = storage.get_run(id1).unwrap().unwrap();
        assert_eq!(loaded.workflow_name, "CI renamed");
        assert_eq!(loaded.branch, "main");
    }

    #[test]
    fn test_get_run_by_provider() {
        let mut storage = setup();
        let id = insert_run(&mut storage, 555);
        let run = storage.get_run_by_provider(555).unwrap().unwrap();
        assert_eq!(run.id, Some(id));
        assert!(storage.get_run_by_provider(556).unwrap().is_none());
    }

    #[test]
    fn test_replace_chunks_assigns_ids() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 3)).unwrap();

        assert_eq!(persisted.len(), 3);
        for chunk in &persisted {
            assert!(chunk.id.is_some());
            assert!(chunk.embedding.is_none());
        }
        assert_eq!(storage.chunk_count(run_id).unwrap(), 3);
    }

    #[test]
    fn test_replace_chunks_idempotent() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let chunks = make_chunks(run_id, 3);

        storage.replace_chunks(run_id, &chunks).unwrap();
        storage.replace_chunks(run_id, &chunks).unwrap();

        let loaded = storage.get_chunks(run_id).unwrap();
        assert_eq!(loaded.len(), 3);
        let indices: Vec<usize> = loaded.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_replace_chunks_clears_prior_embeddings() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 1)).unwrap();
        storage
            .update_chunk_embedding(persisted[0].id.unwrap(), &[1.0, 2.0])
            .unwrap();

        // Re-ingestion replaces the chunks; embeddings start NULL again
        let replaced = storage.replace_chunks(run_id, &make_chunks(run_id, 1)).unwrap();
        let loaded = storage.get_chunk(replaced[0].id.unwrap()).unwrap().unwrap();
        assert!(loaded.embedding.is_none());
    }

    #[test]
    fn test_duplicate_chunk_index_rejected() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let mut chunks = make_chunks(run_id, 2);
        chunks[1].index = 0;

        let result = storage.replace_chunks(run_id, &chunks);
        assert!(matches!(
            result,
            Err(crate::error::Error::Storage(StorageError::Constraint(_)))
        ));
    }

    #[test]
    fn test_embedding_roundtrip() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 1)).unwrap();
        let chunk_id = persisted[0].id.unwrap();

        let vector = vec![0.25f32, -1.5, 3.75];
        storage.update_chunk_embedding(chunk_id, &vector).unwrap();

        let loaded = storage.get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(loaded.embedding, Some(vector));
    }

    #[test]
    fn test_embedding_update_idempotent() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 1)).unwrap();
        let chunk_id = persisted[0].id.unwrap();

        let vector = vec![1.0f32, 2.0];
        storage.update_chunk_embedding(chunk_id, &vector).unwrap();
        storage.update_chunk_embedding(chunk_id, &vector).unwrap();

        let loaded = storage.get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(loaded.embedding, Some(vector));
    }

    #[test]
    fn test_embedding_unknown_chunk() {
        let mut storage = setup();
        let result = storage.update_chunk_embedding(9999, &[1.0]);
        assert!(matches!(
            result,
            Err(crate::error::Error::Storage(StorageError::ChunkNotFound { .. }))
        ));
    }

    #[test]
    fn test_embedding_rows_scopes() {
        let mut storage = setup();
        let run_a = insert_run(&mut storage, 1);
        let run_b = insert_run(&mut storage, 2);

        let mut chunks_a = make_chunks(run_a, 2);
        chunks_a[1].set_error_count(1);
        let persisted_a = storage.replace_chunks(run_a, &chunks_a).unwrap();
        let persisted_b = storage.replace_chunks(run_b, &make_chunks(run_b, 1)).unwrap();

        for c in persisted_a.iter().chain(persisted_b.iter()) {
            storage
                .update_chunk_embedding(c.id.unwrap(), &[1.0, 0.0])
                .unwrap();
        }

        assert_eq!(storage.embedding_rows(EmbeddingScope::All).unwrap().len(), 3);
        assert_eq!(
            storage
                .embedding_rows(EmbeddingScope::ErrorsOnly)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            storage
                .embedding_rows(EmbeddingScope::Run(run_b))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_embedding_rows_excludes_null() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 2)).unwrap();
        storage
            .update_chunk_embedding(persisted[0].id.unwrap(), &[1.0])
            .unwrap();

        let rows = storage.embedding_rows(EmbeddingScope::All).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_embedding_stats() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        let persisted = storage.replace_chunks(run_id, &make_chunks(run_id, 4)).unwrap();
        storage
            .update_chunk_embedding(persisted[0].id.unwrap(), &[1.0])
            .unwrap();

        let stats = storage.embedding_stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.with_embeddings, 1);
        assert_eq!(stats.without_embeddings, 3);
        assert!((stats.percent_complete - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_analysis_upsert_exactly_one_per_run() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);

        let narrative = Narrative {
            root_cause: "first".to_string(),
            failure_stage: "Build".to_string(),
            suggested_fix: "fix".to_string(),
        };
        let mut result = AnalysisResult::new(run_id, narrative, "BUILD".to_string(), 2);
        result.detected_errors = vec![DetectedError {
            category: "Build Failure".to_string(),
            message: "build failed".to_string(),
            confidence: crate::core::Confidence::High,
            evidence_lines: vec!["build failed".to_string()],
            intentional: false,
            chunk_index: 0,
            step_name: "Build".to_string(),
        }];
        let id1 = storage.upsert_analysis(&result).unwrap();

        result.root_cause = "second".to_string();
        result.used_llm = true;
        let id2 = storage.upsert_analysis(&result).unwrap();

        assert_eq!(id1, id2);
        let loaded = storage.get_analysis(run_id).unwrap().unwrap();
        assert_eq!(loaded.root_cause, "second");
        assert!(loaded.used_llm);
        assert_eq!(loaded.detected_errors.len(), 1);
        assert_eq!(loaded.detected_errors[0].category, "Build Failure");
    }

    #[test]
    fn test_delete_run_cascades() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        storage.replace_chunks(run_id, &make_chunks(run_id, 2)).unwrap();
        let result = AnalysisResult::new(run_id, Narrative::default(), "TEST".to_string(), 1);
        storage.upsert_analysis(&result).unwrap();

        storage
            .conn
            .execute("DELETE FROM runs WHERE id = ?", params![run_id])
            .unwrap();

        assert_eq!(storage.chunk_count(run_id).unwrap(), 0);
        assert!(storage.get_analysis(run_id).unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        storage.replace_chunks(run_id, &make_chunks(run_id, 2)).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.repository_count, 1);
        assert_eq!(stats.run_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.analysis_count, 0);
        assert_eq!(stats.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_reset() {
        let mut storage = setup();
        let run_id = insert_run(&mut storage, 1);
        storage.replace_chunks(run_id, &make_chunks(run_id, 2)).unwrap();

        storage.reset().unwrap();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.run_count, 0);
        assert_eq!(stats.chunk_count, 0);
    }

    // ==================== Queue Tests ====================

    #[test]
    fn test_enqueue_and_claim() {
        let mut storage = setup();
        let id = storage.enqueue_job("log-processing", r#"{"runId":1}"#).unwrap();

        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.payload, r#"{"runId":1}"#);

        // Locked: no second claim
        let second = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_claim_empty_queue() {
        let mut storage = setup();
        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(claimed.is_none());
    }

    #[test]
    fn test_claim_skips_other_queues() {
        let mut storage = setup();
        storage.enqueue_job("other-queue", "{}").unwrap();
        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(claimed.is_none());
    }

    #[test]
    fn test_stalled_job_reclaimable() {
        let mut storage = setup();
        storage.enqueue_job("log-processing", "{}").unwrap();

        // Claim with a zero lease: instantly stalled
        let first = storage
            .claim_job("log-processing", Duration::ZERO, 3)
            .unwrap()
            .unwrap();
        assert_eq!(first.attempts, 1);

        let second = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap()
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
    }

    #[test]
    fn test_stalled_job_retired_after_max_attempts() {
        let mut storage = setup();
        storage.enqueue_job("log-processing", "{}").unwrap();

        for _ in 0..3 {
            storage
                .claim_job("log-processing", Duration::ZERO, 3)
                .unwrap()
                .unwrap();
        }

        // Fourth claim retires the job instead of handing it out
        let fourth = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(fourth.is_none());

        let (_, _, _, failed) = storage.queue_counts("log-processing").unwrap();
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_complete_job() {
        let mut storage = setup();
        storage.enqueue_job("log-processing", "{}").unwrap();
        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap()
            .unwrap();

        storage.complete_job(claimed.id).unwrap();
        let (queued, active, completed, failed) = storage.queue_counts("log-processing").unwrap();
        assert_eq!((queued, active, completed, failed), (0, 0, 1, 0));
    }

    #[test]
    fn test_fail_job_terminal() {
        let mut storage = setup();
        storage.enqueue_job("log-processing", "{}").unwrap();
        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap()
            .unwrap();

        storage.fail_job(claimed.id, "empty log", None).unwrap();
        let (_, _, _, failed) = storage.queue_counts("log-processing").unwrap();
        assert_eq!(failed, 1);

        // Terminal failures are not reclaimed
        let next = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_fail_job_with_backoff_requeues() {
        let mut storage = setup();
        storage.enqueue_job("log-processing", "{}").unwrap();
        let claimed = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap()
            .unwrap();

        storage
            .fail_job(claimed.id, "timeout", Some(Duration::from_secs(3600)))
            .unwrap();

        // Not due yet: run_after is in the future
        let next = storage
            .claim_job("log-processing", Duration::from_secs(600), 3)
            .unwrap();
        assert!(next.is_none());

        let (queued, _, _, _) = storage.queue_counts("log-processing").unwrap();
        assert_eq!(queued, 1);
    }

    #[test]
    fn test_vec_bytes_roundtrip() {
        let vector = vec![0.1f32, -2.5, 1000.0, f32::MIN_POSITIVE];
        let bytes = vec_to_bytes(&vector);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_vec(&bytes), vector);
    }
}
