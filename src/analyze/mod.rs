//! Analysis orchestration.
//!
//! Coordinates the classifier, retrieval and the LLM into exactly one
//! [`AnalysisResult`] per run: classify, short-circuit when the classifier
//! is certain, otherwise retrieve similar history, prompt the model and
//! parse its response. LLM failures fall back to a fixed narrative so the
//! pipeline always produces a result.

pub mod response;

pub use response::{
    extract_json_object, heuristic_narrative, normalize_category, parse_category, parse_narrative,
};

use crate::classify::{Classification, Classifier, FailureKind, UNKNOWN_PRIORITY};
use crate::config::PipelineConfig;
use crate::core::{AnalysisResult, DetectedError, LogChunk, Narrative};
use crate::error::Result;
use crate::pipeline::{ParsedLog, parse_log};
use crate::provider::LlmProvider;
use crate::rag::{build_analysis_prompt, build_classification_prompt, retrieve_cases,
    synthesize_confidence};
use crate::storage::{SqliteStorage, Storage};

/// Trailing chunks always included in the prompt (final status/summary).
const PROMPT_TAIL_CHUNKS: usize = 2;

/// Synchronous analysis of raw log text: parse, classify, and derive the
/// narrative from the classifier alone. No persistence, no LLM.
///
/// Backs `POST /analyze` and the CLI `analyze` command.
///
/// # Errors
///
/// Returns an error only for invalid chunker configuration.
pub fn analyze_text(raw: &str, config: &PipelineConfig) -> Result<AnalysisResult> {
    let parsed = parse_log(0, raw, config)?;
    let classifier = Classifier::new(config.intentional_priority);
    let classification = classifier.classify(&parsed.chunks, &parsed.errors);

    let mut result = result_from_classifier(0, &classification, &parsed.errors);
    result.steps = parsed.steps;
    result.detected_errors = parsed.errors;
    Ok(result)
}

/// Builds a result straight from classifier output.
fn result_from_classifier(
    run_id: i64,
    classification: &Classification,
    errors: &[DetectedError],
) -> AnalysisResult {
    let narrative = classification
        .narrative
        .clone()
        .unwrap_or_else(|| classifier_narrative(classification, errors));

    let mut result = AnalysisResult::new(
        run_id,
        narrative,
        classification.kind.tag().to_string(),
        classification.priority,
    );
    result.confidence = classification.confidence;
    result.used_llm = false;
    result
}

/// Coordinates classification, retrieval and generation for one run.
pub struct Analyzer<'a> {
    provider: &'a dyn LlmProvider,
    config: &'a PipelineConfig,
    classifier: Classifier,
}

impl<'a> Analyzer<'a> {
    /// Creates an analyzer over the given provider and configuration.
    #[must_use]
    pub fn new(provider: &'a dyn LlmProvider, config: &'a PipelineConfig) -> Self {
        Self {
            provider,
            config,
            classifier: Classifier::new(config.intentional_priority),
        }
    }

    /// Runs the full analysis for a persisted run and upserts the result.
    ///
    /// `chunks` are the persisted chunks (with IDs and error flags) and
    /// `parsed` supplies the step layout and deduplicated errors. The
    /// result upsert is the last write of the job.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; provider failures
    /// degrade to the fallback narrative.
    pub async fn analyze_run(
        &self,
        storage: &mut SqliteStorage,
        run_id: i64,
        parsed: &ParsedLog,
        chunks: &[LogChunk],
    ) -> Result<AnalysisResult> {
        let classification = self.classifier.classify(chunks, &parsed.errors);

        let mut result = if classification.skip_llm {
            result_from_classifier(run_id, &classification, &parsed.errors)
        } else {
            self.with_llm(storage, run_id, &classification, parsed, chunks)
                .await
        };

        result.steps = parsed.steps.clone();
        result.detected_errors = parsed.errors.clone();

        let id = storage.upsert_analysis(&result)?;
        result.id = Some(id);
        Ok(result)
    }

    /// The LLM path: optional fallback classification, retrieval, prompt,
    /// generation, tolerant parsing.
    async fn with_llm(
        &self,
        storage: &SqliteStorage,
        run_id: i64,
        classification: &Classification,
        parsed: &ParsedLog,
        chunks: &[LogChunk],
    ) -> AnalysisResult {
        let selected = select_prompt_chunks(chunks);

        let (failure_type, priority) = if classification.kind == FailureKind::Unknown {
            self.fallback_classification(&parsed.errors, &selected)
                .await
        } else {
            (
                classification.kind.tag().to_string(),
                classification.priority,
            )
        };

        let cases =
            retrieve_cases(storage, self.provider, &parsed.errors, chunks, self.config).await;

        let prompt = build_analysis_prompt(classification, &parsed.errors, &selected, &cases);

        match self.provider.generate(&prompt).await {
            Ok(text) => {
                let narrative = parse_narrative(&text);
                let mut result = AnalysisResult::new(run_id, narrative, failure_type, priority);
                result.confidence = synthesize_confidence(&cases);
                result.used_llm = true;
                result
            }
            Err(e) => {
                tracing::warn!(run_id, error = %e, "generation failed, using fallback narrative");
                let mut result = AnalysisResult::new(
                    run_id,
                    fallback_narrative(classification, &parsed.errors),
                    failure_type,
                    priority,
                );
                result.confidence = classification.confidence;
                result.used_llm = false;
                result
            }
        }
    }

    /// Asks the LLM to classify an UNKNOWN failure into a known category
    /// (or propose a new one). The returned category is normalized;
    /// provider failures keep the run UNKNOWN.
    async fn fallback_classification(
        &self,
        errors: &[DetectedError],
        selected: &[&LogChunk],
    ) -> (String, u8) {
        let prompt = build_classification_prompt(errors, selected);

        let raw = match self.provider.generate(&prompt).await {
            Ok(text) => parse_category(&text).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "fallback classification failed");
                String::new()
            }
        };

        let category = normalize_category(&raw);
        let priority = FailureKind::from_tag(&category).map_or(UNKNOWN_PRIORITY, |kind| {
            if kind == FailureKind::Intentional {
                self.config.intentional_priority
            } else {
                kind.base_priority()
            }
        });

        (category, priority)
    }
}

/// Selects chunks for the prompt: every error-bearing chunk plus the final
/// two chunks (final status and summary), deduplicated by index.
#[must_use]
pub fn select_prompt_chunks(chunks: &[LogChunk]) -> Vec<&LogChunk> {
    let mut indices: Vec<usize> = chunks
        .iter()
        .filter(|c| c.has_errors)
        .map(|c| c.index)
        .collect();

    for chunk in chunks.iter().rev().take(PROMPT_TAIL_CHUNKS) {
        indices.push(chunk.index);
    }

    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .filter_map(|i| chunks.iter().find(|c| c.index == i))
        .collect()
}

/// Generic narrative for classifier-derived results (no LLM involved).
fn classifier_narrative(classification: &Classification, errors: &[DetectedError]) -> Narrative {
    let stage = errors
        .first()
        .map_or_else(|| "Unknown".to_string(), |e| e.step_name.clone());

    let detail = errors
        .first()
        .map_or_else(String::new, |e| format!(": {}", e.message));

    Narrative {
        root_cause: format!(
            "{} ({}){detail}",
            kind_summary(classification.kind),
            classification.reason
        ),
        failure_stage: stage,
        suggested_fix: kind_fix(classification.kind).to_string(),
    }
}

/// Fixed narrative used when the LLM call fails outright.
fn fallback_narrative(classification: &Classification, errors: &[DetectedError]) -> Narrative {
    let mut narrative = classifier_narrative(classification, errors);
    narrative.root_cause = format!(
        "{} (analysis service unavailable; derived from extracted errors)",
        narrative.root_cause
    );
    narrative
}

const fn kind_summary(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Intentional => "Deliberate pipeline failure",
        FailureKind::Test => "Test failures",
        FailureKind::Build => "Build failure",
        FailureKind::Runtime => "Runtime error",
        FailureKind::Infra => "Infrastructure failure",
        FailureKind::Security => "Security finding",
        FailureKind::Timeout => "Timeout",
        FailureKind::Dependency => "Dependency resolution failure",
        FailureKind::Config => "Configuration error",
        FailureKind::Permission => "Permission error",
        FailureKind::Lint => "Lint findings",
        FailureKind::Unknown => "Unrecognized failure",
    }
}

const fn kind_fix(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Intentional => {
            "Remove the forced exit from the workflow once the pipeline check is done."
        }
        FailureKind::Test => "Review the failing assertions and run the test suite locally.",
        FailureKind::Build => "Fix the compile errors reported above and rebuild.",
        FailureKind::Runtime => "Inspect the stack trace and guard the failing call site.",
        FailureKind::Infra => "Check service connectivity and retry the run.",
        FailureKind::Security => "Update the affected dependencies or rotate the failing credentials.",
        FailureKind::Timeout => "Raise the timeout or split the slow step.",
        FailureKind::Dependency => "Install the missing package or fix the lockfile resolution.",
        FailureKind::Config => "Provide the missing configuration value or fix its syntax.",
        FailureKind::Permission => "Grant the missing permission to the CI credentials.",
        FailureKind::Lint => "Run the linter locally and apply its fixes.",
        FailureKind::Unknown => "Inspect the log tail around the last failing step.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse_log;
    use crate::provider::MockProvider;
    use crate::storage::tests_support::insert_test_run;
    use std::time::Duration;

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .embedding_inter_call_delay(Duration::ZERO)
            .embedding_dim(64)
            .build()
    }

    fn setup_storage() -> SqliteStorage {
        let mut storage = SqliteStorage::in_memory().unwrap();
        storage.init().unwrap();
        storage
    }

    async fn analyze(raw: &str, provider: &MockProvider) -> AnalysisResult {
        let config = fast_config();
        let mut storage = setup_storage();
        let run_id = insert_test_run(&mut storage);
        let parsed = parse_log(run_id, raw, &config).unwrap();
        let chunks = storage.replace_chunks(run_id, &parsed.chunks).unwrap();

        let analyzer = Analyzer::new(provider, &config);
        analyzer
            .analyze_run(&mut storage, run_id, &parsed, &chunks)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_intentional_skips_llm() {
        let provider = MockProvider::new(64).failing_generation();
        let result = analyze(
            "##[group]Force CI failure (testing)\nexit 1\n##[endgroup]",
            &provider,
        )
        .await;

        assert_eq!(result.failure_type, "INTENTIONAL");
        assert!(!result.used_llm);
        assert_eq!(result.priority, 0);
        assert_eq!(result.failure_stage, "Force CI failure (testing)");
        assert!(result.suggested_fix.contains("forced exit"));
    }

    #[tokio::test]
    async fn test_llm_path_parses_json() {
        let provider = MockProvider::new(64).with_response(
            r#"{"rootCause": "assertion regression", "failureStage": "Run tests", "suggestedFix": "fix the test"}"#,
        );
        let result = analyze("AssertionError: expected 1 to equal 2", &provider).await;

        assert_eq!(result.failure_type, "TEST");
        assert_eq!(result.priority, 1);
        assert!(result.used_llm);
        assert_eq!(result.root_cause, "assertion regression");
        assert_eq!(result.suggested_fix, "fix the test");
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let provider = MockProvider::new(64).failing_generation();
        let result = analyze("AssertionError: expected 1 to equal 2", &provider).await;

        assert_eq!(result.failure_type, "TEST");
        assert!(!result.used_llm);
        assert!(!result.root_cause.is_empty());
        assert!(!result.suggested_fix.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_triggers_fallback_classification() {
        let provider = MockProvider::new(64)
            .with_response(r#"{"category": "flaky infra"}"#)
            .with_response(r#"{"rootCause": "flaky infra", "failureStage": "x", "suggestedFix": "y"}"#);
        let result = analyze("completely novel stack shape", &provider).await;

        assert_eq!(result.failure_type, "FLAKY_INFRA");
        assert_eq!(result.priority, UNKNOWN_PRIORITY);
        assert!(result.used_llm);
    }

    #[tokio::test]
    async fn test_unknown_with_known_category_response() {
        let provider = MockProvider::new(64)
            .with_response(r#"{"category": "dependency"}"#)
            .with_response(r#"{"rootCause": "a", "failureStage": "b", "suggestedFix": "c"}"#);
        let result = analyze("completely novel stack shape", &provider).await;

        assert_eq!(result.failure_type, "DEPENDENCY");
        assert_eq!(result.priority, 7);
    }

    #[tokio::test]
    async fn test_exactly_one_result_per_run() {
        let config = fast_config();
        let mut storage = setup_storage();
        let run_id = insert_test_run(&mut storage);
        let provider = MockProvider::new(64);
        let parsed = parse_log(run_id, "AssertionError: x", &config).unwrap();
        let chunks = storage.replace_chunks(run_id, &parsed.chunks).unwrap();

        let analyzer = Analyzer::new(&provider, &config);
        let first = analyzer
            .analyze_run(&mut storage, run_id, &parsed, &chunks)
            .await
            .unwrap();
        let second = analyzer
            .analyze_run(&mut storage, run_id, &parsed, &chunks)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(storage.get_analysis(run_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_result_carries_errors_and_steps() {
        let provider = MockProvider::new(64);
        let result = analyze(
            "##[group]Install\nnpm ERR! Cannot find module 'react'\n##[endgroup]",
            &provider,
        )
        .await;

        assert_eq!(result.detected_errors.len(), 1);
        assert_eq!(result.detected_errors[0].category, "Dependency Issue");
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].name, "Install");
    }

    #[test]
    fn test_analyze_text_sync_path() {
        let config = fast_config();
        let result = analyze_text("AssertionError: boom", &config).unwrap();

        assert_eq!(result.failure_type, "TEST");
        assert!(!result.used_llm);
        assert!(!result.root_cause.is_empty());
        assert_eq!(result.run_id, 0);
    }

    #[test]
    fn test_select_prompt_chunks() {
        let mut chunks: Vec<LogChunk> = (0..5)
            .map(|i| LogChunk::new(1, i, format!("s{i}"), format!("c{i}"), i, i))
            .collect();
        chunks[1].set_error_count(2);

        let selected = select_prompt_chunks(&chunks);
        let indices: Vec<usize> = selected.iter().map(|c| c.index).collect();
        // Error chunk 1 plus the last two chunks (3, 4)
        assert_eq!(indices, vec![1, 3, 4]);
    }

    #[test]
    fn test_select_prompt_chunks_dedup() {
        let mut chunks: Vec<LogChunk> = (0..2)
            .map(|i| LogChunk::new(1, i, format!("s{i}"), format!("c{i}"), i, i))
            .collect();
        chunks[1].set_error_count(1);

        let selected = select_prompt_chunks(&chunks);
        let indices: Vec<usize> = selected.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }
}
