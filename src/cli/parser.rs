//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// loglens: CI/CD build-log analysis pipeline.
///
/// Parses build logs into searchable chunks, classifies the failure
/// deterministically, and grounds LLM root-cause analysis in similar past
/// failures.
#[derive(Parser, Debug)]
#[command(name = "loglens")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the loglens database file.
    ///
    /// Defaults to `.loglens/loglens.db` in the current directory.
    #[arg(short, long, env = "LOGLENS_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the loglens database.
    ///
    /// Creates the database file and schema if they don't exist.
    Init {
        /// Force re-initialization (destroys existing data).
        #[arg(short, long)]
        force: bool,
    },

    /// Show storage and embedding coverage statistics.
    Status,

    /// Reset all stored state (delete all data).
    Reset {
        /// Skip confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Analyze a local log file synchronously (no persistence, no LLM).
    Analyze {
        /// Path to the log file.
        file: PathBuf,
    },

    /// Enqueue a log-processing job for a run.
    Enqueue {
        /// Repository full name (`owner/name`).
        repo: String,

        /// Provider run ID.
        run_id: i64,

        /// Provider installation ID.
        #[arg(long, default_value = "0")]
        installation_id: i64,
    },

    /// Run the worker pool against the job queue.
    Worker {
        /// Log archive URL template with `{repo}`, `{run_id}` and
        /// `{installation_id}` placeholders.
        #[arg(long, env = "LOGLENS_LOG_URL_TEMPLATE")]
        url_template: String,

        /// Number of concurrent worker tasks.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Serve the synchronous analyze endpoint over HTTP.
    Serve {
        /// Bind host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port.
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

impl Cli {
    /// Returns the database path, using the default if not specified.
    #[must_use]
    pub fn get_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::storage::DEFAULT_DB_PATH))
    }
}
