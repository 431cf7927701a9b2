//! Step-aware chunking of cleaned log lines.
//!
//! Each step is partitioned into chunks of at most `max_chunk_lines` lines.
//! Steps that fit produce exactly one chunk carrying the step's name; larger
//! steps become `⌈N / max⌉` contiguous chunks named `<step> (part k)`.
//! Chunk indices are assigned from a single counter across all steps, so the
//! indices of a run form a dense prefix starting at 0.

use crate::core::{LogChunk, LogStep};
use crate::error::{PipelineError, Result};

/// Partitions steps into size-bounded chunks.
///
/// `lines` is the full cleaned line sequence; each step's range indexes into
/// it. Returns chunks in step order with contiguous global indices.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when `max_chunk_lines` is zero.
pub fn chunk_steps(
    run_id: i64,
    lines: &[String],
    steps: &[LogStep],
    max_chunk_lines: usize,
) -> Result<Vec<LogChunk>> {
    if max_chunk_lines == 0 {
        return Err(PipelineError::InvalidConfig {
            reason: "max_chunk_lines must be > 0".to_string(),
        }
        .into());
    }

    let mut chunks = Vec::new();
    let mut index = 0;

    for step in steps {
        let step_lines = &lines[step.start_line..=step.end_line];
        let part_count = step_lines.len().div_ceil(max_chunk_lines);

        for (part, window) in step_lines.chunks(max_chunk_lines).enumerate() {
            let name = if part_count > 1 {
                format!("{} (part {})", step.name, part + 1)
            } else {
                step.name.clone()
            };

            let start = step.start_line + part * max_chunk_lines;
            let end = start + window.len() - 1;

            chunks.push(LogChunk::new(
                run_id,
                index,
                name,
                window.join("\n"),
                start,
                end,
            ));
            index += 1;
        }
    }

    Ok(chunks)
}
