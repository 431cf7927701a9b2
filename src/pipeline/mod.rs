//! Log ingestion pipeline: cleaning, step detection, chunking and error
//! extraction.
//!
//! Every stage is a pure transformation; [`parse_log`] runs them in order
//! and returns the parsed representation that the persister, embedder and
//! classifier consume. Two identical inputs always produce byte-for-byte
//! identical output.

pub mod chunker;
pub mod cleaner;
pub mod patterns;
pub mod steps;

pub use chunker::chunk_steps;
pub use cleaner::clean;
pub use patterns::{ErrorPattern, EXIT_FAILURE_CATEGORY, catalogue, extract_errors};
pub use steps::{FULL_LOG_STEP, detect_steps};

use crate::config::PipelineConfig;
use crate::core::{DetectedError, LogChunk, LogStep};
use crate::error::Result;

/// Default maximum lines per chunk.
pub const MAX_CHUNK_LINES: usize = 1000;

/// A fully parsed log, ready for persistence and classification.
#[derive(Debug, Clone)]
pub struct ParsedLog {
    /// Detected step layout.
    pub steps: Vec<LogStep>,
    /// Chunks with error flags already applied.
    pub chunks: Vec<LogChunk>,
    /// All extracted errors in chunk order, deduplicated per chunk.
    pub errors: Vec<DetectedError>,
}

impl ParsedLog {
    /// Whether the log produced no content at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Parses raw log text into steps, chunks and extracted errors.
///
/// `run_id` is stamped onto the produced chunks; the synchronous analyze
/// path passes 0 since its chunks are never persisted. The config supplies
/// the chunk size bound and the token-estimate ratio.
///
/// # Errors
///
/// Returns an error only for invalid chunker configuration; empty input
/// yields an empty [`ParsedLog`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn parse_log(run_id: i64, raw: &str, config: &PipelineConfig) -> Result<ParsedLog> {
    let lines = clean(raw);
    let steps = detect_steps(&lines);
    let mut chunks = chunk_steps(run_id, &lines, &steps, config.max_chunk_lines)?;

    let mut errors = Vec::new();
    for chunk in &mut chunks {
        chunk.token_estimate = (chunk.content.len() as f64 * config.tokens_per_char).ceil() as usize;
        let chunk_errors = extract_errors(chunk);
        chunk.set_error_count(chunk_errors.len());
        errors.extend(chunk_errors);
    }

    Ok(ParsedLog {
        steps,
        chunks,
        errors,
    })
}
