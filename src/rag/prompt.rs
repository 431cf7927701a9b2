//! Prompt templates and builders for the analysis LLM calls.
//!
//! The grounding rules live in the prompt text, not in code: detected
//! errors outrank verbose log text, the classifier's priority hierarchy
//! must be respected, and retrieved history is preferred over speculation
//! but never over the detected errors.

use std::fmt::Write;

use crate::classify::Classification;
use crate::core::{DetectedError, LogChunk};
use crate::search::SimilarCase;

/// Lines quoted from the tail of each selected chunk.
pub const PROMPT_TAIL_LINES: usize = 30;

/// System prompt for root-cause analysis.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a CI/CD failure analyst. You are given the errors extracted deterministically from a build log, the current rule-based classification, the tail of each relevant log step, and similar past failures with their confirmed resolutions.

## Grounding rules

1. The DETECTED ERRORS section is authoritative. It was extracted by exact pattern matching and outranks anything you infer from the raw log text.
2. Respect the priority hierarchy below. A lower-priority issue must never be named as root cause while a higher-priority issue is present in the detected errors.
3. Prefer the SIMILAR PAST FAILURES over speculation, but when a past resolution conflicts with the detected errors, the detected errors win.
4. Be specific: name the failing module, test, or command when the log shows it.

## Priority hierarchy (most severe first)

1. TEST - test framework failures
2. BUILD - compile or bundler failures
3. RUNTIME - runtime exceptions
4. INFRA - connectivity, container or database failures
5. SECURITY - vulnerabilities, auth failures
6. TIMEOUT - timeouts and exceeded deadlines
7. DEPENDENCY - package manager and resolution failures
8. CONFIG - missing or invalid configuration
9. PERMISSION - filesystem or credential permissions
10. LINT - lint and format findings

## Output

Respond with a single JSON object with exactly these keys:

{"rootCause": "<what went wrong>", "failureStage": "<which step failed>", "suggestedFix": "<how to fix it>"}

Return ONLY the JSON object - no markdown, no commentary."#;

/// System prompt for the AI fallback classification.
pub const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"You are a CI/CD failure classifier. Assign exactly one category to the failure described below.

Known categories: TEST, BUILD, RUNTIME, INFRA, SECURITY, TIMEOUT, DEPENDENCY, CONFIG, PERMISSION, LINT.

If none fits, you may propose a new single-word category.

Respond with a single JSON object with exactly this shape:

{"category": "<CATEGORY>"}

Return ONLY the JSON object."#;

/// Builds the analysis prompt from detected errors, classification, the
/// selected step tails and retrieved history.
#[must_use]
pub fn build_analysis_prompt(
    classification: &Classification,
    errors: &[DetectedError],
    selected_chunks: &[&LogChunk],
    cases: &[SimilarCase],
) -> String {
    let mut prompt = String::from(ANALYSIS_SYSTEM_PROMPT);

    let _ = write!(
        prompt,
        "\n\n## CURRENT CLASSIFICATION\n\n{} (priority {}, confidence {:.2}): {}\n",
        classification.kind.tag(),
        classification.priority,
        classification.confidence,
        classification.reason
    );

    prompt.push_str("\n## DETECTED ERRORS\n\n");
    if errors.is_empty() {
        prompt.push_str("(none extracted)\n");
    }
    for error in errors {
        let _ = writeln!(
            prompt,
            "- [{}] ({:?}) in \"{}\" (chunk {}): {}",
            error.category, error.confidence, error.step_name, error.chunk_index, error.message
        );
    }

    prompt.push_str("\n## LOG TAILS\n");
    for chunk in selected_chunks {
        let _ = write!(
            prompt,
            "\n### {} (lines {}-{})\n\n```\n{}\n```\n",
            chunk.step_name,
            chunk.start_line,
            chunk.end_line,
            chunk.tail_lines(PROMPT_TAIL_LINES).join("\n")
        );
    }

    if !cases.is_empty() {
        prompt.push_str("\n## SIMILAR PAST FAILURES\n");
        for (i, case) in cases.iter().enumerate() {
            let _ = write!(
                prompt,
                "\n### Case {} (similarity {:.2})\n",
                i + 1,
                case.similarity
            );
            if let Some(ref workflow) = case.workflow_name {
                let _ = writeln!(prompt, "Workflow: {workflow}");
            }
            if let Some(ref failure_type) = case.failure_type {
                let _ = writeln!(prompt, "Classified as: {failure_type}");
            }
            if let Some(ref root_cause) = case.root_cause {
                let _ = writeln!(prompt, "Root cause: {root_cause}");
            }
            if let Some(ref fix) = case.suggested_fix {
                let _ = writeln!(prompt, "Resolution: {fix}");
            }
        }
    }

    prompt.push_str("\nRespond with the JSON object now.");
    prompt
}

/// Builds the AI fallback classification prompt.
#[must_use]
pub fn build_classification_prompt(errors: &[DetectedError], chunks: &[&LogChunk]) -> String {
    let mut prompt = String::from(CLASSIFICATION_SYSTEM_PROMPT);

    prompt.push_str("\n\n## EXTRACTED ERRORS\n\n");
    if errors.is_empty() {
        prompt.push_str("(none extracted)\n");
    }
    for error in errors.iter().take(10) {
        let _ = writeln!(prompt, "- [{}] {}", error.category, error.message);
    }

    prompt.push_str("\n## LOG TAILS\n");
    for chunk in chunks {
        let _ = write!(
            prompt,
            "\n### {}\n\n```\n{}\n```\n",
            chunk.step_name,
            chunk.tail_lines(PROMPT_TAIL_LINES).join("\n")
        );
    }

    prompt.push_str("\nRespond with the JSON object now.");
    prompt
}
