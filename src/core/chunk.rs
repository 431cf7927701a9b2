//! Log chunk and step representations.
//!
//! Chunks are contiguous slices of cleaned log lines belonging to exactly
//! one step. Each chunk maintains its absolute line range in the cleaned
//! line sequence and a dense, 0-based index within its run.

use serde::{Deserialize, Serialize};

/// A named region of a log detected by structural markers.
///
/// Ranges are inclusive line indices into the cleaned line sequence. The
/// detected steps cover the entire input with no gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStep {
    /// Step name.
    pub name: String,

    /// First line of the step (inclusive, 0-based).
    #[serde(rename = "startLine")]
    pub start_line: usize,

    /// Last line of the step (inclusive, 0-based).
    #[serde(rename = "endLine")]
    pub end_line: usize,
}

impl LogStep {
    /// Creates a new step covering the given inclusive line range.
    #[must_use]
    pub const fn new(name: String, start_line: usize, end_line: usize) -> Self {
        Self {
            name,
            start_line,
            end_line,
        }
    }

    /// Number of lines in the step.
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// A chunk of cleaned log lines.
///
/// Indices are assigned monotonically during chunking and form a dense
/// prefix `0..N-1` per run. The embedding is filled asynchronously after
/// persistence and stays `None` when embedding fails for the chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogChunk {
    /// Unique identifier (assigned by storage layer).
    pub id: Option<i64>,

    /// ID of the run this chunk belongs to.
    pub run_id: i64,

    /// Sequential index within the run (0-based, dense).
    pub index: usize,

    /// Name of the step this chunk was cut from. Multi-part steps carry a
    /// `(part k)` suffix.
    pub step_name: String,

    /// Chunk content: cleaned lines joined with single newlines.
    pub content: String,

    /// First line of the chunk (inclusive, absolute in the cleaned sequence).
    pub start_line: usize,

    /// Last line of the chunk (inclusive, absolute in the cleaned sequence).
    pub end_line: usize,

    /// Number of lines in the chunk.
    pub line_count: usize,

    /// Token estimate for the content (`ceil(chars / 4)`).
    pub token_estimate: usize,

    /// Whether any error pattern matched a line in this chunk.
    pub has_errors: bool,

    /// Number of deduplicated errors extracted from this chunk.
    pub error_count: usize,

    /// Embedding vector, filled after persistence (best-effort).
    pub embedding: Option<Vec<f32>>,
}

impl LogChunk {
    /// Creates a new chunk from step content.
    ///
    /// The token estimate uses the ~4 characters per token approximation.
    #[must_use]
    pub fn new(
        run_id: i64,
        index: usize,
        step_name: String,
        content: String,
        start_line: usize,
        end_line: usize,
    ) -> Self {
        let token_estimate = content.len().div_ceil(4);
        Self {
            id: None,
            run_id,
            index,
            step_name,
            content,
            start_line,
            end_line,
            line_count: end_line - start_line + 1,
            token_estimate,
            has_errors: false,
            error_count: 0,
            embedding: None,
        }
    }

    /// Records the extracted error count, keeping `has_errors` consistent.
    pub const fn set_error_count(&mut self, count: usize) {
        self.error_count = count;
        self.has_errors = count > 0;
    }

    /// Returns the size of the chunk content in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Checks if the chunk content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Returns the last `n` lines of the chunk content.
    ///
    /// Used when building analysis prompts, where only the tail of each
    /// selected step is quoted.
    #[must_use]
    pub fn tail_lines(&self, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self.content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }

    /// Returns the first `n` lines of the chunk content.
    #[must_use]
    pub fn head_lines(&self, n: usize) -> Vec<&str> {
        self.content.lines().take(n).collect()
    }
}
