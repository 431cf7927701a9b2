//! Error types for loglens operations.
//!
//! This module provides a comprehensive error hierarchy using `thiserror` for
//! all pipeline operations including storage, parsing, the LLM provider, and
//! the job queue. The job runner uses [`Error::is_retryable`] to decide
//! between exponential backoff and terminal failure.

use thiserror::Error;

/// Result type alias for loglens operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Log parsing and chunking errors.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// LLM provider errors (embedding and generation).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Job queue and worker errors.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

impl Error {
    /// Whether the job runner should retry the failed job with backoff.
    ///
    /// Transient transport failures (HTTP download, provider connectivity,
    /// busy database) are retryable. Malformed archives, empty logs and
    /// constraint violations are terminal: re-running cannot succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Queue(QueueError::Transport { .. })
                | Self::Provider(ProviderError::Transport { .. })
                | Self::Storage(StorageError::Busy)
        )
    }
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("loglens not initialized. Run: loglens init")]
    NotInitialized,

    /// Run not found by ID or provider run ID.
    #[error("run not found: {identifier}")]
    RunNotFound {
        /// Run ID or provider run ID that was not found.
        identifier: String,
    },

    /// Chunk not found by ID.
    #[error("chunk not found: {id}")]
    ChunkNotFound {
        /// Chunk ID that was not found.
        id: i64,
    },

    /// Uniqueness or foreign-key constraint violation. Fatal to the job;
    /// reported for operator attention.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Database locked by a concurrent writer.
    #[error("database busy")]
    Busy,

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Serialization/deserialization error for embedded JSON columns.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Parsing- and chunking-specific errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The fetched archive contained no `.txt` log entries.
    #[error("empty log: archive contains no log entries")]
    EmptyLog,

    /// The fetched archive could not be read as a ZIP file.
    #[error("invalid log archive: {reason}")]
    InvalidArchive {
        /// Reason the archive was rejected.
        reason: String,
    },

    /// Invalid chunker configuration.
    #[error("invalid chunk configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Regex compilation error in the pattern catalogue.
    #[error("regex error: {0}")]
    Regex(String),

    /// Failed to read a local log file.
    #[error("failed to read log file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// LLM provider errors for embedding and generation calls.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transient transport failure (connection, timeout, 5xx). Retryable.
    #[error("provider transport error: {message}")]
    Transport {
        /// Underlying transport message.
        message: String,
    },

    /// The provider rejected the request (auth, quota, bad input).
    #[error("provider request rejected: {message}")]
    Rejected {
        /// Provider error message.
        message: String,
    },

    /// The provider returned a response with no usable content.
    #[error("provider returned empty response")]
    EmptyResponse,

    /// API key missing from configuration and environment.
    #[error("API key missing: set OPENAI_API_KEY or LOGLENS_API_KEY")]
    ApiKeyMissing,
}

/// Job queue and worker errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Transient transport error while fetching the log archive. Retryable.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying transport message.
        message: String,
    },

    /// Malformed job payload.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    /// Job exceeded its retry budget.
    #[error("job {id} exhausted {attempts} attempts")]
    RetriesExhausted {
        /// Queue job ID.
        id: i64,
        /// Attempts consumed.
        attempts: u32,
    },

    /// No log source is configured for fetching run archives.
    #[error("no log source configured")]
    NoLogSource,
}

// Implement From traits for standard library and third-party errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Pipeline(PipelineError::ReadFailed {
            path: String::new(),
            reason: err.to_string(),
        })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, ref msg) => match e.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    Self::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::Busy
                }
                _ => Self::Database(err.to_string()),
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<regex::Error> for PipelineError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::InvalidArchive {
            reason: err.to_string(),
        }
    }
}
