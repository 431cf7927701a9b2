//! CLI command execution.
//!
//! Dispatches parsed commands against storage, the pipeline, and the
//! worker pool. Commands return their output as a string; printing is the
//! binary's concern.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;

use crate::analyze::analyze_text;
use crate::cli::output::{OutputFormat, format_analysis, format_status};
use crate::cli::parser::{Cli, Commands};
use crate::config::PipelineConfig;
use crate::error::{Error, Result, StorageError};
use crate::io::LogFileReader;
use crate::provider::create_provider;
use crate::server;
use crate::storage::{SqliteStorage, Storage};
use crate::worker::{HttpLogSource, LogProcessingJob, Worker, enqueue};

/// Executes a parsed CLI command, returning its output.
///
/// # Errors
///
/// Returns an error when the command fails; the binary formats it for the
/// selected output format.
pub async fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let db_path = cli.get_db_path();

    match &cli.command {
        Commands::Init { force } => init(&db_path, *force),
        Commands::Status => status(&db_path, format),
        Commands::Reset { yes } => reset(&db_path, *yes),
        Commands::Analyze { file } => analyze_file(file, format),
        Commands::Enqueue {
            repo,
            run_id,
            installation_id,
        } => enqueue_run(&db_path, repo, *run_id, *installation_id),
        Commands::Worker {
            url_template,
            workers,
        } => run_worker(&db_path, url_template, *workers).await,
        Commands::Serve { host, port } => {
            server::serve(host, *port, PipelineConfig::from_env())
                .await
                .map_err(|e| Error::InvalidState {
                    message: e.to_string(),
                })?;
            Ok(String::new())
        }
    }
}

/// Opens storage and verifies it has been initialized.
fn open_initialized(db_path: &Path) -> Result<SqliteStorage> {
    let storage = SqliteStorage::open(db_path)?;
    if !storage.is_initialized()? {
        return Err(StorageError::NotInitialized.into());
    }
    Ok(storage)
}

fn init(db_path: &Path, force: bool) -> Result<String> {
    let mut storage = SqliteStorage::open(db_path)?;
    storage.init()?;
    if force {
        storage.reset()?;
    }
    Ok(format!("Initialized database at {}\n", db_path.display()))
}

fn status(db_path: &Path, format: OutputFormat) -> Result<String> {
    let storage = open_initialized(db_path)?;
    let storage_stats = storage.stats()?;
    let embedding_stats = storage.embedding_stats()?;
    Ok(format_status(&storage_stats, &embedding_stats, format))
}

fn reset(db_path: &Path, yes: bool) -> Result<String> {
    if !yes {
        return Err(Error::InvalidState {
            message: "refusing to reset without --yes".to_string(),
        });
    }
    let mut storage = open_initialized(db_path)?;
    storage.reset()?;
    Ok("All data deleted.\n".to_string())
}

fn analyze_file(file: &Path, format: OutputFormat) -> Result<String> {
    let reader = LogFileReader::open(file)?;
    let raw = reader.read_to_string()?;
    let config = PipelineConfig::from_env();
    let result = analyze_text(&raw, &config)?;
    Ok(format_analysis(&result, format))
}

fn enqueue_run(db_path: &Path, repo: &str, run_id: i64, installation_id: i64) -> Result<String> {
    let mut storage = open_initialized(db_path)?;
    let job = LogProcessingJob {
        repo_full_name: repo.to_string(),
        run_id,
        installation_id,
    };
    let job_id = enqueue(&mut storage, &job)?;
    Ok(format!("Enqueued job {job_id} for {repo}#{run_id}\n"))
}

async fn run_worker(
    db_path: &Path,
    url_template: &str,
    workers: Option<usize>,
) -> Result<String> {
    // Fail fast if the database was never initialized
    drop(open_initialized(db_path)?);

    let mut config = PipelineConfig::from_env();
    if let Some(n) = workers {
        config.worker_count = n;
    }

    let provider: Arc<dyn crate::provider::LlmProvider> =
        Arc::from(create_provider(config.embedding_dim));
    let source = Arc::new(HttpLogSource::new(url_template.to_string()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let worker = Arc::new(Worker::new(
        db_path.to_path_buf(),
        provider,
        source,
        config,
    ));
    worker.run(shutdown_rx).await?;

    Ok("Worker pool stopped.\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(db_path: std::path::PathBuf, command: Commands) -> Cli {
        Cli {
            db_path: Some(db_path),
            verbose: false,
            format: "text".to_string(),
            command,
        }
    }

    #[tokio::test]
    async fn test_init_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let out = execute(&cli_with(db_path.clone(), Commands::Init { force: false }))
            .await
            .unwrap();
        assert!(out.contains("Initialized"));

        let out = execute(&cli_with(db_path, Commands::Status)).await.unwrap();
        assert!(out.contains("Runs:"));
    }

    #[tokio::test]
    async fn test_status_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("uninit.db");

        let result = execute(&cli_with(db_path, Commands::Status)).await;
        assert!(matches!(
            result,
            Err(Error::Storage(StorageError::NotInitialized))
        ));
    }

    #[tokio::test]
    async fn test_reset_requires_yes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        execute(&cli_with(db_path.clone(), Commands::Init { force: false }))
            .await
            .unwrap();

        let result = execute(&cli_with(db_path.clone(), Commands::Reset { yes: false })).await;
        assert!(result.is_err());

        let out = execute(&cli_with(db_path, Commands::Reset { yes: true }))
            .await
            .unwrap();
        assert!(out.contains("deleted"));
    }

    #[tokio::test]
    async fn test_analyze_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("build.log");
        std::fs::write(&log_path, "AssertionError: expected 1 to equal 2").unwrap();

        let cli = cli_with(
            dir.path().join("test.db"),
            Commands::Analyze { file: log_path },
        );
        let out = execute(&cli).await.unwrap();
        assert!(out.contains("TEST"));
        assert!(out.contains("Detected errors (1)"));
    }

    #[tokio::test]
    async fn test_enqueue() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        execute(&cli_with(db_path.clone(), Commands::Init { force: false }))
            .await
            .unwrap();

        let out = execute(&cli_with(
            db_path,
            Commands::Enqueue {
                repo: "octo/hello".to_string(),
                run_id: 42,
                installation_id: 7,
            },
        ))
        .await
        .unwrap();
        assert!(out.contains("octo/hello#42"));
    }
}
