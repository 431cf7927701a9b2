//! Job queue protocol and worker pool.
//!
//! Jobs arrive on the `log-processing` queue as JSON payloads naming a
//! repository and a provider run ID. A pool of worker tasks claims jobs
//! under a lock lease and runs each one end-to-end: fetch → parse →
//! persist → embed → classify → analyze. Parallelism comes from running
//! multiple jobs concurrently; within a job the stages are sequential.
//!
//! Delivery is at-least-once and deduplication is not required: chunk
//! replacement deletes first, so re-execution is idempotent.

pub mod archive;

pub use archive::{download_archive, extract_log_archive};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::analyze::Analyzer;
use crate::config::PipelineConfig;
use crate::core::{Repository, WorkflowRun};
use crate::embedding::embed_chunks;
use crate::error::{Error, PipelineError, QueueError, Result};
use crate::pipeline::parse_log;
use crate::provider::LlmProvider;
use crate::storage::{ClaimedJob, SqliteStorage, Storage};

/// Queue (and job) name for log processing.
pub const QUEUE_NAME: &str = "log-processing";

/// Idle poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// A queued log-processing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogProcessingJob {
    /// Repository full name (`owner/name`).
    #[serde(rename = "repoFullName")]
    pub repo_full_name: String,

    /// Provider run ID.
    #[serde(rename = "runId")]
    pub run_id: i64,

    /// Provider installation ID used to authorize the log fetch.
    #[serde(rename = "installationId")]
    pub installation_id: i64,
}

impl LogProcessingJob {
    /// Splits the full name into `(owner, name)`.
    #[must_use]
    pub fn split_repo(&self) -> (&str, &str) {
        self.repo_full_name
            .split_once('/')
            .unwrap_or((self.repo_full_name.as_str(), ""))
    }
}

/// Source of raw log text for a run.
///
/// The real implementation downloads and unpacks the provider's log
/// archive; tests substitute fixed text.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetches the combined log text for a job.
    ///
    /// # Errors
    ///
    /// Transport failures are retryable; malformed or empty archives are
    /// terminal.
    async fn fetch_log(&self, job: &LogProcessingJob) -> Result<String>;
}

/// HTTP log source: resolves a URL template, downloads the ZIP archive and
/// extracts its `.txt` entries.
///
/// The template may reference `{repo}`, `{run_id}` and `{installation_id}`.
pub struct HttpLogSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpLogSource {
    /// Creates a source from a URL template.
    #[must_use]
    pub fn new(url_template: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template,
        }
    }

    fn resolve_url(&self, job: &LogProcessingJob) -> String {
        self.url_template
            .replace("{repo}", &job.repo_full_name)
            .replace("{run_id}", &job.run_id.to_string())
            .replace("{installation_id}", &job.installation_id.to_string())
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch_log(&self, job: &LogProcessingJob) -> Result<String> {
        let url = self.resolve_url(job);
        tracing::debug!(run_id = job.run_id, %url, "downloading log archive");
        let bytes = download_archive(&self.client, &url).await?;
        extract_log_archive(&bytes)
    }
}

/// Enqueues a log-processing job.
///
/// # Errors
///
/// Returns an error if serialization or the queue insert fails.
pub fn enqueue(storage: &mut SqliteStorage, job: &LogProcessingJob) -> Result<i64> {
    let payload = serde_json::to_string(job).map_err(QueueError::from)?;
    storage.enqueue_job(QUEUE_NAME, &payload)
}

/// Worker pool over the log-processing queue.
///
/// Each worker task opens its own database connection (WAL mode keeps
/// concurrent writers safe; busy errors are retryable), so jobs for
/// different runs proceed in parallel without shared mutable state.
pub struct Worker {
    db_path: PathBuf,
    provider: Arc<dyn LlmProvider>,
    source: Arc<dyn LogSource>,
    config: PipelineConfig,
}

impl Worker {
    /// Creates a worker pool configuration.
    #[must_use]
    pub fn new(
        db_path: PathBuf,
        provider: Arc<dyn LlmProvider>,
        source: Arc<dyn LogSource>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db_path,
            provider,
            source,
            config,
        }
    }

    /// Runs the worker pool until shutdown is signalled.
    ///
    /// Shutdown is graceful: each worker finishes (or releases) its
    /// current job before exiting; an unfinished lease simply expires and
    /// the job is retried elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker connection cannot be opened.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.config.worker_count);

        for worker_id in 0..self.config.worker_count {
            let worker = Arc::clone(&self);
            let mut shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                let mut storage = match SqliteStorage::open(&worker.db_path) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(worker_id, error = %e, "worker failed to open storage");
                        return;
                    }
                };

                tracing::info!(worker_id, "worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    match worker.process_next(&mut storage).await {
                        Ok(true) => {}
                        Ok(false) => {
                            // Queue empty: idle until the next poll or shutdown
                            tokio::select! {
                                _ = tokio::time::sleep(IDLE_POLL) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "queue claim failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                tracing::info!(worker_id, "worker stopped");
            }));
        }

        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        Ok(())
    }

    /// Claims and processes at most one job.
    ///
    /// Returns `Ok(true)` when a job was handled (successfully or not)
    /// and `Ok(false)` when the queue was empty.
    ///
    /// # Errors
    ///
    /// Returns an error only when the claim itself fails; job failures
    /// are recorded on the queue row.
    pub async fn process_next(&self, storage: &mut SqliteStorage) -> Result<bool> {
        let Some(claimed) =
            storage.claim_job(QUEUE_NAME, self.config.job_lock, self.config.job_max_retries)?
        else {
            return Ok(false);
        };

        let job_id = claimed.id;
        match self.process_job(storage, &claimed).await {
            Ok(run_id) => {
                tracing::info!(job_id, run_id, "job completed");
                storage.complete_job(job_id)?;
            }
            Err(e) => {
                let retry = e.is_retryable() && claimed.attempts < self.config.job_max_retries;
                if retry {
                    let delay = backoff_delay(self.config.job_backoff_initial, claimed.attempts);
                    tracing::warn!(job_id, error = %e, delay_secs = delay.as_secs(), "job failed, retrying");
                    storage.fail_job(job_id, &e.to_string(), Some(delay))?;
                } else {
                    tracing::error!(job_id, error = %e, "job failed terminally");
                    storage.fail_job(job_id, &e.to_string(), None)?;
                }
            }
        }

        Ok(true)
    }

    /// Runs one job end-to-end and returns the analyzed run ID.
    async fn process_job(&self, storage: &mut SqliteStorage, claimed: &ClaimedJob) -> Result<i64> {
        let job: LogProcessingJob =
            serde_json::from_str(&claimed.payload).map_err(QueueError::from)?;

        // Fetch and unpack the log archive (suspension point)
        let raw = self.source.fetch_log(&job).await?;

        let run_id = ensure_run(storage, &job)?;

        // Parse: clean → steps → chunks → errors
        let parsed = parse_log(run_id, &raw, &self.config)?;
        if parsed.is_empty() {
            return Err(PipelineError::EmptyLog.into());
        }

        // Persist: atomic delete-then-insert; embeddings start NULL
        let chunks = storage.replace_chunks(run_id, &parsed.chunks)?;

        // Embed: best-effort per chunk, never job-fatal
        let report = embed_chunks(storage, self.provider.as_ref(), &chunks, &self.config).await;
        if report.failed > 0 {
            tracing::warn!(
                run_id,
                embedded = report.embedded,
                failed = report.failed,
                "embedding pass incomplete"
            );
        }

        // Classify and analyze; the result upsert is the last write
        let analyzer = Analyzer::new(self.provider.as_ref(), &self.config);
        analyzer
            .analyze_run(storage, run_id, &parsed, &chunks)
            .await?;

        Ok(run_id)
    }
}

/// Resolves (or creates) the run row for a job.
///
/// The webhook router normally creates repository and run rows before
/// enqueueing; when a job arrives first, the worker upserts minimal rows
/// so the pipeline can proceed. The repository's provider ID is unknown at
/// this point, so a stable surrogate derived from the full name is used
/// until a webhook fills in the real one.
fn ensure_run(storage: &mut SqliteStorage, job: &LogProcessingJob) -> Result<i64> {
    if let Some(run) = storage.get_run_by_provider(job.run_id)? {
        return run.id.ok_or_else(|| Error::InvalidState {
            message: "run row without id".to_string(),
        });
    }

    let (owner, name) = job.split_repo();
    let repo_id = match storage.get_repository_by_full_name(owner, name)? {
        Some(repo) => repo.id.ok_or_else(|| Error::InvalidState {
            message: "repository row without id".to_string(),
        })?,
        None => {
            let repo = Repository::new(
                full_name_surrogate(&job.repo_full_name),
                owner.to_string(),
                name.to_string(),
                false,
            );
            storage.upsert_repository(&repo)?
        }
    };

    let run = WorkflowRun::new(job.run_id, repo_id, "unknown".to_string());
    storage.upsert_run(&run)
}

/// Stable negative surrogate provider ID for a repository full name.
#[allow(clippy::cast_possible_wrap)]
fn full_name_surrogate(full_name: &str) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    full_name.hash(&mut hasher);
    -((hasher.finish() >> 1) as i64)
}

/// Exponential backoff: `initial * 2^(attempt - 1)`.
fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
