//! Database schema definitions.
//!
//! Contains SQL schema and migration logic for the loglens `SQLite`
//! database. Embeddings live in a nullable BLOB column on the chunk rows
//! (little-endian `f32`), which keeps similarity queries a single scan over
//! `embedding IS NOT NULL` rows.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Watched repositories
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL UNIQUE,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    private INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

-- Index for repository lookup by full name
CREATE INDEX IF NOT EXISTS idx_repositories_full_name ON repositories(owner, name);

-- Workflow runs, upserted by provider run ID on terminal-state webhooks
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_run_id INTEGER NOT NULL UNIQUE,
    repository_id INTEGER NOT NULL,
    workflow_name TEXT NOT NULL,
    status TEXT NOT NULL,
    trigger_event TEXT NOT NULL DEFAULT '',
    commit_sha TEXT NOT NULL DEFAULT '',
    branch TEXT NOT NULL DEFAULT '',
    actor TEXT NOT NULL DEFAULT '',
    provider_url TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
);

-- Index for run lookup by repository
CREATE INDEX IF NOT EXISTS idx_runs_repository ON runs(repository_id);

-- Log chunks; (run_id, chunk_index) forms a dense prefix per run
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    step_name TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    line_count INTEGER NOT NULL,
    token_estimate INTEGER NOT NULL,
    has_errors INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    embedding BLOB,  -- f32 array serialized as bytes, NULL until embedded
    embedding_dim INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE (run_id, chunk_index),
    FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
);

-- Index for chunk ordering within a run
CREATE INDEX IF NOT EXISTS idx_chunks_run ON chunks(run_id, chunk_index);

-- Index for error-bearing chunk scans
CREATE INDEX IF NOT EXISTS idx_chunks_errors ON chunks(has_errors);

-- Analysis results, exactly one per run
CREATE TABLE IF NOT EXISTS analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL UNIQUE,
    root_cause TEXT NOT NULL,
    failure_stage TEXT NOT NULL,
    suggested_fix TEXT NOT NULL,
    failure_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    confidence REAL NOT NULL DEFAULT 0,
    used_llm INTEGER NOT NULL DEFAULT 0,
    detected_errors TEXT NOT NULL DEFAULT '[]',  -- JSON array of DetectedError
    steps TEXT NOT NULL DEFAULT '[]',            -- JSON array of LogStep
    created_at INTEGER NOT NULL,
    FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
);

-- Job queue with lock leases for at-least-once processing (v2)
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INTEGER NOT NULL DEFAULT 0,
    locked_until INTEGER,
    run_after INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Index for queue claims
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(queue, status, run_after);
";

/// SQL to check if schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// SQL for v1 to v2 migration (adds the job queue).
const MIGRATION_V1_TO_V2: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INTEGER NOT NULL DEFAULT 0,
    locked_until INTEGER,
    run_after INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(queue, status, run_after);
";

/// Available migrations.
pub const MIGRATIONS: &[Migration] = &[Migration {
    from_version: 1,
    to_version: 2,
    sql: MIGRATION_V1_TO_V2,
}];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }

    #[test]
    fn test_schema_sql_not_empty() {
        assert!(!SCHEMA_SQL.is_empty());
        assert!(SCHEMA_SQL.contains("CREATE TABLE"));
        assert!(SCHEMA_SQL.contains("UNIQUE (run_id, chunk_index)"));
    }

    #[test]
    fn test_migrations_ordered() {
        for migration in MIGRATIONS {
            assert!(migration.to_version > migration.from_version);
        }
    }

    #[test]
    fn test_get_migrations_from() {
        let migrations = get_migrations_from(1);
        assert_eq!(migrations.len(), 1);
        let migrations = get_migrations_from(CURRENT_SCHEMA_VERSION);
        assert!(migrations.is_empty());
    }
}
