//! Pipeline and provider configuration with builder pattern and environment
//! variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::time::Duration;

use crate::error::{Error, ProviderError};
use crate::pipeline::MAX_CHUNK_LINES;

/// Default token estimate ratio (tokens per character).
const DEFAULT_TOKENS_PER_CHAR: f64 = 0.25;
/// Default embedding dimensions expected from the provider.
const DEFAULT_EMBEDDING_DIM: usize = 768;
/// Default maximum characters sent to the embedding endpoint.
const DEFAULT_EMBEDDING_MAX_CHARS: usize = 20_000;
/// Default delay between embedding calls (soft rate limiting).
const DEFAULT_EMBEDDING_INTER_CALL_DELAY_MS: u64 = 100;
/// Default maximum historical cases spliced into the analysis prompt.
const DEFAULT_RAG_MAX_CASES: usize = 3;
/// Default similarity floor for RAG context admission.
const DEFAULT_RAG_MIN_SIMILARITY: f32 = 0.6;
/// Default similarity floor for general search.
const DEFAULT_SEARCH_MIN_SIMILARITY: f32 = 0.7;
/// Default job lock lease in seconds (covers slow LLM and embedding calls).
const DEFAULT_JOB_LOCK_SECONDS: u64 = 600;
/// Default maximum retries for a stalled or transiently failed job.
const DEFAULT_JOB_MAX_RETRIES: u32 = 3;
/// Default initial backoff for transient failures (doubles per attempt).
const DEFAULT_JOB_BACKOFF_INITIAL_MS: u64 = 2000;
/// Default stall-detection sweep interval in seconds.
const DEFAULT_STALL_SWEEP_SECONDS: u64 = 30;
/// Default worker pool size.
const DEFAULT_WORKER_COUNT: usize = 4;
/// Default priority assigned to intentional failures.
///
/// The alternative convention treats an intentional failure as a non-issue
/// and assigns 5; both are valid, so this is configuration rather than a
/// hard-coded constant.
const DEFAULT_INTENTIONAL_PRIORITY: u8 = 0;

/// Tunable settings for the ingestion and analysis pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum lines per chunk.
    pub max_chunk_lines: usize,
    /// Token estimate ratio (tokens per character).
    pub tokens_per_char: f64,
    /// Embedding dimensions expected from the provider.
    pub embedding_dim: usize,
    /// Maximum characters sent to the embedding endpoint.
    pub embedding_max_chars: usize,
    /// Delay between consecutive embedding calls.
    pub embedding_inter_call_delay: Duration,
    /// Maximum historical cases retrieved for the analysis prompt.
    pub rag_max_cases: usize,
    /// Similarity floor for RAG context admission.
    pub rag_min_similarity: f32,
    /// Similarity floor for general similarity search.
    pub search_min_similarity: f32,
    /// Job lock lease duration.
    pub job_lock: Duration,
    /// Maximum retries for a stalled or transiently failed job.
    pub job_max_retries: u32,
    /// Initial backoff for transient failures (exponential).
    pub job_backoff_initial: Duration,
    /// Stall-detection sweep interval.
    pub stall_sweep_interval: Duration,
    /// Number of concurrent worker tasks.
    pub worker_count: usize,
    /// Priority assigned to INTENTIONAL classifications (0 or 5).
    pub intentional_priority: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: MAX_CHUNK_LINES,
            tokens_per_char: DEFAULT_TOKENS_PER_CHAR,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            embedding_max_chars: DEFAULT_EMBEDDING_MAX_CHARS,
            embedding_inter_call_delay: Duration::from_millis(
                DEFAULT_EMBEDDING_INTER_CALL_DELAY_MS,
            ),
            rag_max_cases: DEFAULT_RAG_MAX_CASES,
            rag_min_similarity: DEFAULT_RAG_MIN_SIMILARITY,
            search_min_similarity: DEFAULT_SEARCH_MIN_SIMILARITY,
            job_lock: Duration::from_secs(DEFAULT_JOB_LOCK_SECONDS),
            job_max_retries: DEFAULT_JOB_MAX_RETRIES,
            job_backoff_initial: Duration::from_millis(DEFAULT_JOB_BACKOFF_INITIAL_MS),
            stall_sweep_interval: Duration::from_secs(DEFAULT_STALL_SWEEP_SECONDS),
            worker_count: DEFAULT_WORKER_COUNT,
            intentional_priority: DEFAULT_INTENTIONAL_PRIORITY,
        }
    }
}

impl PipelineConfig {
    /// Creates a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    max_chunk_lines: Option<usize>,
    tokens_per_char: Option<f64>,
    embedding_dim: Option<usize>,
    embedding_max_chars: Option<usize>,
    embedding_inter_call_delay: Option<Duration>,
    rag_max_cases: Option<usize>,
    rag_min_similarity: Option<f32>,
    search_min_similarity: Option<f32>,
    job_lock: Option<Duration>,
    job_max_retries: Option<u32>,
    job_backoff_initial: Option<Duration>,
    stall_sweep_interval: Option<Duration>,
    worker_count: Option<usize>,
    intentional_priority: Option<u8>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl PipelineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.max_chunk_lines.is_none() {
            self.max_chunk_lines = env_parse("LOGLENS_MAX_CHUNK_LINES");
        }
        if self.tokens_per_char.is_none() {
            self.tokens_per_char = env_parse("LOGLENS_TOKENS_PER_CHAR");
        }
        if self.embedding_dim.is_none() {
            self.embedding_dim = env_parse("LOGLENS_EMBEDDING_DIM");
        }
        if self.embedding_max_chars.is_none() {
            self.embedding_max_chars = env_parse("LOGLENS_EMBEDDING_MAX_CHARS");
        }
        if self.embedding_inter_call_delay.is_none() {
            self.embedding_inter_call_delay =
                env_parse("LOGLENS_EMBEDDING_INTER_CALL_DELAY_MS").map(Duration::from_millis);
        }
        if self.rag_max_cases.is_none() {
            self.rag_max_cases = env_parse("LOGLENS_RAG_MAX_CASES");
        }
        if self.rag_min_similarity.is_none() {
            self.rag_min_similarity = env_parse("LOGLENS_RAG_MIN_SIMILARITY");
        }
        if self.search_min_similarity.is_none() {
            self.search_min_similarity = env_parse("LOGLENS_SEARCH_MIN_SIMILARITY");
        }
        if self.job_lock.is_none() {
            self.job_lock = env_parse("LOGLENS_JOB_LOCK_SECONDS").map(Duration::from_secs);
        }
        if self.job_max_retries.is_none() {
            self.job_max_retries = env_parse("LOGLENS_JOB_MAX_STALLED_RETRIES");
        }
        if self.job_backoff_initial.is_none() {
            self.job_backoff_initial =
                env_parse("LOGLENS_JOB_BACKOFF_INITIAL_MS").map(Duration::from_millis);
        }
        if self.worker_count.is_none() {
            self.worker_count = env_parse("LOGLENS_WORKER_COUNT");
        }
        if self.intentional_priority.is_none() {
            self.intentional_priority = env_parse("LOGLENS_INTENTIONAL_PRIORITY");
        }
        self
    }

    /// Sets the maximum lines per chunk.
    #[must_use]
    pub const fn max_chunk_lines(mut self, n: usize) -> Self {
        self.max_chunk_lines = Some(n);
        self
    }

    /// Sets the embedding dimensions.
    #[must_use]
    pub const fn embedding_dim(mut self, n: usize) -> Self {
        self.embedding_dim = Some(n);
        self
    }

    /// Sets the maximum characters sent to the embedding endpoint.
    #[must_use]
    pub const fn embedding_max_chars(mut self, n: usize) -> Self {
        self.embedding_max_chars = Some(n);
        self
    }

    /// Sets the delay between embedding calls.
    #[must_use]
    pub const fn embedding_inter_call_delay(mut self, delay: Duration) -> Self {
        self.embedding_inter_call_delay = Some(delay);
        self
    }

    /// Sets the maximum RAG cases.
    #[must_use]
    pub const fn rag_max_cases(mut self, n: usize) -> Self {
        self.rag_max_cases = Some(n);
        self
    }

    /// Sets the RAG similarity floor.
    #[must_use]
    pub const fn rag_min_similarity(mut self, s: f32) -> Self {
        self.rag_min_similarity = Some(s);
        self
    }

    /// Sets the general search similarity floor.
    #[must_use]
    pub const fn search_min_similarity(mut self, s: f32) -> Self {
        self.search_min_similarity = Some(s);
        self
    }

    /// Sets the job lock lease.
    #[must_use]
    pub const fn job_lock(mut self, lock: Duration) -> Self {
        self.job_lock = Some(lock);
        self
    }

    /// Sets the maximum job retries.
    #[must_use]
    pub const fn job_max_retries(mut self, n: u32) -> Self {
        self.job_max_retries = Some(n);
        self
    }

    /// Sets the initial transient-failure backoff.
    #[must_use]
    pub const fn job_backoff_initial(mut self, backoff: Duration) -> Self {
        self.job_backoff_initial = Some(backoff);
        self
    }

    /// Sets the stall-detection sweep interval.
    #[must_use]
    pub const fn stall_sweep_interval(mut self, interval: Duration) -> Self {
        self.stall_sweep_interval = Some(interval);
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = Some(n);
        self
    }

    /// Sets the priority assigned to INTENTIONAL classifications.
    #[must_use]
    pub const fn intentional_priority(mut self, p: u8) -> Self {
        self.intentional_priority = Some(p);
        self
    }

    /// Builds the [`PipelineConfig`].
    #[must_use]
    pub fn build(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            max_chunk_lines: self.max_chunk_lines.unwrap_or(defaults.max_chunk_lines),
            tokens_per_char: self.tokens_per_char.unwrap_or(defaults.tokens_per_char),
            embedding_dim: self.embedding_dim.unwrap_or(defaults.embedding_dim),
            embedding_max_chars: self
                .embedding_max_chars
                .unwrap_or(defaults.embedding_max_chars),
            embedding_inter_call_delay: self
                .embedding_inter_call_delay
                .unwrap_or(defaults.embedding_inter_call_delay),
            rag_max_cases: self.rag_max_cases.unwrap_or(defaults.rag_max_cases),
            rag_min_similarity: self
                .rag_min_similarity
                .unwrap_or(defaults.rag_min_similarity),
            search_min_similarity: self
                .search_min_similarity
                .unwrap_or(defaults.search_min_similarity),
            job_lock: self.job_lock.unwrap_or(defaults.job_lock),
            job_max_retries: self.job_max_retries.unwrap_or(defaults.job_max_retries),
            job_backoff_initial: self
                .job_backoff_initial
                .unwrap_or(defaults.job_backoff_initial),
            stall_sweep_interval: self
                .stall_sweep_interval
                .unwrap_or(defaults.stall_sweep_interval),
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            intentional_priority: self
                .intentional_priority
                .unwrap_or(defaults.intentional_priority),
        }
    }
}

/// Configuration for the LLM provider backend.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model used for root-cause generation.
    pub chat_model: String,
    /// Model used for embeddings.
    pub embedding_model: String,
}

impl ProviderConfig {
    /// Creates provider configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("LOGLENS_API_KEY"))
            .map_err(|_| Error::Provider(ProviderError::ApiKeyMissing))?;

        Ok(Self {
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("LOGLENS_BASE_URL"))
                .ok(),
            chat_model: std::env::var("LOGLENS_CHAT_MODEL")
                .unwrap_or_else(|_| "gpt-5-mini-2025-08-07".to_string()),
            embedding_model: std::env::var("LOGLENS_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_chunk_lines, 1000);
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.embedding_max_chars, 20_000);
        assert_eq!(config.rag_max_cases, 3);
        assert!((config.rag_min_similarity - 0.6).abs() < f32::EPSILON);
        assert!((config.search_min_similarity - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.job_lock, Duration::from_secs(600));
        assert_eq!(config.job_max_retries, 3);
        assert_eq!(config.job_backoff_initial, Duration::from_millis(2000));
        assert_eq!(config.intentional_priority, 0);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = PipelineConfig::builder()
            .max_chunk_lines(500)
            .embedding_dim(1024)
            .rag_max_cases(5)
            .worker_count(8)
            .intentional_priority(5)
            .build();
        assert_eq!(config.max_chunk_lines, 500);
        assert_eq!(config.embedding_dim, 1024);
        assert_eq!(config.rag_max_cases, 5);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.intentional_priority, 5);
        // Unset fields keep defaults
        assert_eq!(config.embedding_max_chars, 20_000);
    }

    #[test]
    fn test_builder_durations() {
        let config = PipelineConfig::builder()
            .embedding_inter_call_delay(Duration::from_millis(250))
            .job_lock(Duration::from_secs(120))
            .job_backoff_initial(Duration::from_millis(500))
            .build();
        assert_eq!(
            config.embedding_inter_call_delay,
            Duration::from_millis(250)
        );
        assert_eq!(config.job_lock, Duration::from_secs(120));
        assert_eq!(config.job_backoff_initial, Duration::from_millis(500));
    }

    #[test]
    fn test_token_estimate_ratio_matches_divisor() {
        // ceil(chars * 0.25) must equal ceil(chars / 4) for the default ratio
        let config = PipelineConfig::default();
        assert!((config.tokens_per_char - 0.25).abs() < f64::EPSILON);
    }
}
