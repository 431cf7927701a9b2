//! Error pattern catalogue and extraction.
//!
//! The catalogue is an ordered list of `{category, regex, confidence}`
//! records compiled once at first use. Each line matches at most one
//! pattern: the first in catalogue order wins, which keeps extraction
//! deterministic. `Cannot find module` therefore tags as a Dependency
//! Issue even though the classifier's priority table ranks build failures
//! higher; first match in catalogue order is authoritative.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::{Confidence, DetectedError, LogChunk};

/// A single catalogue entry.
#[derive(Debug)]
pub struct ErrorPattern {
    /// Category name carried into [`DetectedError`].
    pub category: &'static str,
    /// Match confidence.
    pub confidence: Confidence,
    /// Whether a match marks a deliberate non-zero exit.
    pub intentional: bool,
    regex: Regex,
}

impl ErrorPattern {
    /// Whether this pattern matches the given line.
    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

/// Category name for deliberate non-zero exits.
pub const EXIT_FAILURE_CATEGORY: &str = "Exit Failure";

/// Raw catalogue: `(category, pattern, confidence, intentional)`, ordered.
const RAW_CATALOGUE: &[(&str, &str, Confidence, bool)] = &[
    // Build failures
    ("Build Failure", r"(?i)build failed", Confidence::High, false),
    ("Build Failure", r"(?i)compilation error", Confidence::High, false),
    ("Build Failure", r"(?i)could not compile", Confidence::High, false),
    // Dependency issues
    ("Dependency Issue", r"(?i)cannot find module", Confidence::High, false),
    ("Dependency Issue", r"(?i)module not found", Confidence::High, false),
    ("Dependency Issue", r"npm ERR!", Confidence::Medium, false),
    ("Dependency Issue", r"(?i)yarn error", Confidence::Medium, false),
    ("Dependency Issue", r"ERESOLVE", Confidence::Medium, false),
    ("Dependency Issue", r"(?i)peer dependency", Confidence::Medium, false),
    ("Dependency Issue", r"ENOENT.*package\.json", Confidence::High, false),
    // Test failures
    ("Test Failure", r"(?i)test.*failed", Confidence::High, false),
    ("Test Failure", r"(?i)assertion.*failed", Confidence::High, false),
    ("Test Failure", r"(?i)expected.*but got", Confidence::High, false),
    ("Test Failure", r"\d+ failing", Confidence::High, false),
    ("Test Failure", r"AssertionError", Confidence::High, false),
    // Syntax errors
    ("Syntax Error", r"SyntaxError", Confidence::High, false),
    ("Syntax Error", r"(?i)unexpected token", Confidence::High, false),
    ("Syntax Error", r"(?i)invalid syntax", Confidence::High, false),
    // Runtime errors
    ("Runtime Error", r"TypeError", Confidence::High, false),
    ("Runtime Error", r"ReferenceError", Confidence::High, false),
    ("Runtime Error", r"RangeError", Confidence::High, false),
    ("Runtime Error", r"(?i)cannot read propert(y|ies)", Confidence::High, false),
    ("Runtime Error", r"(?i)undefined is not", Confidence::High, false),
    // Network errors
    ("Network Error", r"ECONNREFUSED", Confidence::High, false),
    ("Network Error", r"ETIMEDOUT", Confidence::High, false),
    ("Network Error", r"(?i)network error", Confidence::Medium, false),
    // API errors
    ("API Error", r"\bHTTP\s+(4\d\d|5\d\d)\b", Confidence::High, false),
    ("API Error", r"(?i)\bstatus code[:\s]+(4\d\d|5\d\d)\b", Confidence::High, false),
    // CI runner errors
    ("CI Error", r"##\[error\]", Confidence::High, false),
    ("CI Error", r"Error:\s+Process completed with exit code", Confidence::High, false),
    // Process exits
    ("Process Exit", r"(?i)exit code [1-9]\d*", Confidence::High, false),
    ("Process Exit", r"(?i)exited with code [1-9]\d*", Confidence::High, false),
    ("Process Exit", r"(?i)command failed", Confidence::Medium, false),
    // Deliberate non-zero exit (CI self-test fixture)
    (EXIT_FAILURE_CATEGORY, r"^\s*exit\s+[1-9]\d*\s*$", Confidence::High, true),
    // Generic markers
    ("Generic", r"\bERROR\b", Confidence::Medium, false),
    ("Generic", r"\b(FATAL|CRITICAL)\b", Confidence::High, false),
];

#[allow(clippy::expect_used)] // pattern literals, covered by tests
static CATALOGUE: LazyLock<Vec<ErrorPattern>> = LazyLock::new(|| {
    RAW_CATALOGUE
        .iter()
        .map(|&(category, pattern, confidence, intentional)| ErrorPattern {
            category,
            confidence,
            intentional,
            regex: Regex::new(pattern).expect("valid catalogue regex"),
        })
        .collect()
});

/// Returns the compiled pattern catalogue in match order.
#[must_use]
pub fn catalogue() -> &'static [ErrorPattern] {
    &CATALOGUE
}

/// Extracts errors from a chunk, tagging each line against the catalogue.
///
/// A line matches at most one pattern (first match in catalogue order);
/// within the chunk, matches are deduplicated by `(category, message)`.
/// Each error carries the chunk's index and step name, plus the matched
/// line and its successor as evidence.
#[must_use]
pub fn extract_errors(chunk: &LogChunk) -> Vec<DetectedError> {
    let lines: Vec<&str> = chunk.content.lines().collect();
    let mut seen: HashSet<(&'static str, String)> = HashSet::new();
    let mut errors = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(pattern) = catalogue().iter().find(|p| p.is_match(line)) else {
            continue;
        };

        let message = (*line).to_string();
        if !seen.insert((pattern.category, message.clone())) {
            continue;
        }

        let mut evidence_lines = vec![message.clone()];
        if let Some(next) = lines.get(i + 1) {
            evidence_lines.push((*next).to_string());
        }

        errors.push(DetectedError {
            category: pattern.category.to_string(),
            message,
            confidence: pattern.confidence,
            evidence_lines,
            intentional: pattern.intentional,
            chunk_index: chunk.index,
            step_name: chunk.step_name.clone(),
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(content: &str) -> LogChunk {
        LogChunk::new(1, 3, "Run tests".to_string(), content.to_string(), 0, 0)
    }

    #[test]
    fn test_catalogue_compiles() {
        assert_eq!(catalogue().len(), RAW_CATALOGUE.len());
    }

    #[test]
    fn test_dependency_beats_generic() {
        let errors = extract_errors(&chunk_with("npm ERR! Cannot find module 'react'"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, "Dependency Issue");
        assert_eq!(errors[0].confidence, Confidence::High);
    }

    #[test]
    fn test_build_failure_beats_test_failure() {
        // "build failed" precedes "test.*failed" in catalogue order, so a
        // line matching both tags as Build Failure.
        let errors = extract_errors(&chunk_with("integration test build failed"));
        assert_eq!(errors[0].category, "Build Failure");
    }

    #[test]
    fn test_assertion_error() {
        let errors = extract_errors(&chunk_with("AssertionError: expected 2 to equal 3"));
        assert_eq!(errors[0].category, "Test Failure");
        assert_eq!(errors[0].confidence, Confidence::High);
    }

    #[test]
    fn test_runtime_errors() {
        let errors =
            extract_errors(&chunk_with("TypeError: Cannot read properties of undefined"));
        assert_eq!(errors[0].category, "Runtime Error");
    }

    #[test]
    fn test_exit_failure_sets_intentional() {
        let errors = extract_errors(&chunk_with("exit 1"));
        assert_eq!(errors[0].category, EXIT_FAILURE_CATEGORY);
        assert!(errors[0].intentional);
    }

    #[test]
    fn test_exit_zero_not_matched() {
        let errors = extract_errors(&chunk_with("exit 0"));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_api_error_status_codes() {
        let errors = extract_errors(&chunk_with("request failed with HTTP 503"));
        // "request failed" does not hit the test pattern ("test.*failed");
        // the API pattern claims the line.
        assert_eq!(errors[0].category, "API Error");

        let errors = extract_errors(&chunk_with("received status code: 404"));
        assert_eq!(errors[0].category, "API Error");

        let errors = extract_errors(&chunk_with("HTTP 200 OK"));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_ci_error_markers() {
        let errors = extract_errors(&chunk_with("##[error]Process completed with exit code 1."));
        assert_eq!(errors[0].category, "CI Error");
    }

    #[test]
    fn test_generic_fatal() {
        let errors = extract_errors(&chunk_with("FATAL unable to continue"));
        assert_eq!(errors[0].category, "Generic");
        assert_eq!(errors[0].confidence, Confidence::High);
    }

    #[test]
    fn test_generic_error_medium() {
        let errors = extract_errors(&chunk_with("ERROR something odd happened"));
        assert_eq!(errors[0].category, "Generic");
        assert_eq!(errors[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_lowercase_error_not_generic() {
        let errors = extract_errors(&chunk_with("no errors here, error free"));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_dedup_by_category_and_message() {
        let errors = extract_errors(&chunk_with("npm ERR! code 1\nnpm ERR! code 1\nnpm ERR! code 2"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_errors_carry_chunk_provenance() {
        let errors = extract_errors(&chunk_with("AssertionError: boom"));
        assert_eq!(errors[0].chunk_index, 3);
        assert_eq!(errors[0].step_name, "Run tests");
    }

    #[test]
    fn test_evidence_includes_following_line() {
        let errors = extract_errors(&chunk_with("TypeError: x is not a function\nat main.js:10"));
        assert_eq!(errors[0].evidence_lines.len(), 2);
        assert_eq!(errors[0].evidence_lines[1], "at main.js:10");
    }

    #[test]
    fn test_network_errors() {
        let errors = extract_errors(&chunk_with("connect ECONNREFUSED 127.0.0.1:5432"));
        assert_eq!(errors[0].category, "Network Error");

        let errors = extract_errors(&chunk_with("a network error occurred"));
        assert_eq!(errors[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_enoent_package_json() {
        let errors = extract_errors(&chunk_with("ENOENT: no such file, open '/app/package.json'"));
        assert_eq!(errors[0].category, "Dependency Issue");
        assert_eq!(errors[0].confidence, Confidence::High);
    }
}
