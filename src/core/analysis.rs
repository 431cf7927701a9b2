//! Analysis result and detected-error representations.
//!
//! Exactly one [`AnalysisResult`] exists per run after pipeline completion;
//! it is upserted keyed by the run ID. Detected errors and step layouts are
//! embedded as JSON rather than stored as independent rows.

use serde::{Deserialize, Serialize};

use super::chunk::LogStep;

/// Match confidence for an extracted error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Pattern is a strong failure signal.
    High,
    /// Pattern co-occurs with failures but also with noise.
    Medium,
    /// Weak signal.
    Low,
}

/// A single error extracted from a chunk by the pattern catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedError {
    /// Catalogue category (e.g. "Test Failure", "Dependency Issue").
    pub category: String,

    /// The matched log line, trimmed.
    pub message: String,

    /// Match confidence from the catalogue.
    pub confidence: Confidence,

    /// Surrounding lines quoted as evidence.
    #[serde(rename = "evidenceLines")]
    pub evidence_lines: Vec<String>,

    /// Whether the error is a deliberate non-zero exit (CI self-test).
    pub intentional: bool,

    /// Index of the chunk the error originated from.
    #[serde(rename = "chunkIndex")]
    pub chunk_index: usize,

    /// Name of the step the error originated from.
    #[serde(rename = "stepName")]
    pub step_name: String,
}

/// The human-readable analysis triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    /// What went wrong.
    #[serde(rename = "rootCause")]
    pub root_cause: String,

    /// Which stage of the pipeline failed.
    #[serde(rename = "failureStage")]
    pub failure_stage: String,

    /// Suggested remediation.
    #[serde(rename = "suggestedFix")]
    pub suggested_fix: String,
}

/// The final analysis record for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Unique identifier (assigned by storage layer).
    pub id: Option<i64>,

    /// ID of the analyzed run (unique; upsert key).
    pub run_id: i64,

    /// What went wrong.
    pub root_cause: String,

    /// Which stage of the pipeline failed.
    pub failure_stage: String,

    /// Suggested remediation.
    pub suggested_fix: String,

    /// Failure category tag (e.g. "TEST", "DEPENDENCY", "UNKNOWN").
    pub failure_type: String,

    /// Category priority; lower is more severe, 99 is unknown.
    pub priority: u8,

    /// Synthesized confidence in the narrative, in [0, 1].
    pub confidence: f32,

    /// Whether the narrative came from the LLM (false for classifier-derived
    /// and fallback-derived results).
    pub used_llm: bool,

    /// Errors extracted deterministically from the chunks.
    pub detected_errors: Vec<DetectedError>,

    /// Step layout of the analyzed log.
    pub steps: Vec<LogStep>,

    /// Unix timestamp when the result was written.
    pub created_at: i64,
}

impl AnalysisResult {
    /// Creates a result from a narrative and classification output.
    #[must_use]
    pub fn new(run_id: i64, narrative: Narrative, failure_type: String, priority: u8) -> Self {
        Self {
            id: None,
            run_id,
            root_cause: narrative.root_cause,
            failure_stage: narrative.failure_stage,
            suggested_fix: narrative.suggested_fix,
            failure_type,
            priority,
            confidence: 0.0,
            used_llm: false,
            detected_errors: Vec::new(),
            steps: Vec::new(),
            created_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_serde() {
        let json = serde_json::to_string(&Confidence::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Confidence = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(back, Confidence::Medium);
    }

    #[test]
    fn test_detected_error_serde_field_names() {
        let err = DetectedError {
            category: "Test Failure".to_string(),
            message: "AssertionError: expected 1".to_string(),
            confidence: Confidence::High,
            evidence_lines: vec!["AssertionError: expected 1".to_string()],
            intentional: false,
            chunk_index: 2,
            step_name: "Run tests".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"chunkIndex\":2"));
        assert!(json.contains("\"stepName\":\"Run tests\""));
        assert!(json.contains("\"evidenceLines\""));
    }

    #[test]
    fn test_analysis_result_new() {
        let narrative = Narrative {
            root_cause: "tests failed".to_string(),
            failure_stage: "Run tests".to_string(),
            suggested_fix: "fix the assertion".to_string(),
        };
        let result = AnalysisResult::new(7, narrative, "TEST".to_string(), 1);
        assert_eq!(result.run_id, 7);
        assert_eq!(result.failure_type, "TEST");
        assert_eq!(result.priority, 1);
        assert!(!result.used_llm);
    }

    #[test]
    fn test_narrative_json_field_names() {
        let narrative = Narrative {
            root_cause: "a".to_string(),
            failure_stage: "b".to_string(),
            suggested_fix: "c".to_string(),
        };
        let json = serde_json::to_string(&narrative).unwrap();
        assert!(json.contains("rootCause"));
        assert!(json.contains("failureStage"));
        assert!(json.contains("suggestedFix"));
    }
}
