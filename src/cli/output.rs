//! Output formatting for CLI commands.

use std::fmt::Write;

use crate::core::AnalysisResult;
use crate::error::Error;
use crate::storage::{EmbeddingStats, StorageStats};

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name, defaulting to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Formats an error for the selected output format.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::json!({ "error": error.to_string() }).to_string()
        }
        OutputFormat::Text => error.to_string(),
    }
}

/// Formats an analysis result.
#[must_use]
pub fn format_analysis(result: &AnalysisResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
        }
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "Failure type: {} (priority {}, confidence {:.2})",
                result.failure_type, result.priority, result.confidence
            );
            let _ = writeln!(out, "Root cause:    {}", result.root_cause);
            let _ = writeln!(out, "Failure stage: {}", result.failure_stage);
            let _ = writeln!(out, "Suggested fix: {}", result.suggested_fix);

            let _ = writeln!(out, "\nDetected errors ({}):", result.detected_errors.len());
            for error in &result.detected_errors {
                let _ = writeln!(
                    out,
                    "  - [{}] {} ({})",
                    error.category, error.message, error.step_name
                );
            }

            let _ = writeln!(out, "\nSteps ({}):", result.steps.len());
            for step in &result.steps {
                let _ = writeln!(
                    out,
                    "  - {} (lines {}-{})",
                    step.name, step.start_line, step.end_line
                );
            }
            out
        }
    }
}

/// Formats storage and embedding statistics.
#[must_use]
pub fn format_status(
    storage: &StorageStats,
    embeddings: &EmbeddingStats,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "storage": storage,
            "embeddings": embeddings,
        })
        .to_string(),
        OutputFormat::Text => {
            let mut out = String::new();
            let _ = writeln!(out, "Repositories: {}", storage.repository_count);
            let _ = writeln!(out, "Runs:         {}", storage.run_count);
            let _ = writeln!(out, "Chunks:       {}", storage.chunk_count);
            let _ = writeln!(out, "Analyses:     {}", storage.analysis_count);
            let _ = writeln!(
                out,
                "Embeddings:   {}/{} ({:.1}%)",
                embeddings.with_embeddings, embeddings.total, embeddings.percent_complete
            );
            let _ = writeln!(out, "Schema:       v{}", storage.schema_version);
            out
        }
    }
}
