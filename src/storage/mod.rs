//! Persistent storage for runs, chunks, analyses and the job queue.

pub mod schema;
mod sqlite;
mod traits;

pub use sqlite::{ClaimedJob, EmbeddingScope, SqliteStorage};
pub use traits::{EmbeddingStats, Storage, StorageStats};

/// Default database path relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".loglens/loglens.db";
