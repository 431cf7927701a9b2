//! Tolerant parsing of LLM responses.
//!
//! The model is prompted to return a single JSON object, but responses
//! arrive wrapped in markdown fences, prose, or not as JSON at all. The
//! extractor scans for the first balanced brace group, respecting string
//! literals and escapes; when that fails, a line-label heuristic recovers
//! the narrative fields from free text.

use crate::core::Narrative;

/// Maximum characters kept for a heuristically recovered root cause.
const ROOT_CAUSE_MAX: usize = 300;
/// Maximum characters kept for a heuristically recovered stage.
const STAGE_MAX: usize = 100;
/// Maximum characters kept for a heuristically recovered fix.
const FIX_MAX: usize = 500;

/// Extracts the first balanced `{...}` group from the text.
///
/// Balances braces while respecting double-quoted string literals and
/// backslash escapes, so braces inside JSON strings do not confuse the
/// scanner. Returns `None` when no balanced group exists.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

#[derive(serde::Deserialize)]
struct NarrativeFields {
    #[serde(alias = "rootCause", alias = "root_cause", default)]
    root_cause: String,
    #[serde(alias = "failureStage", alias = "failure_stage", default)]
    failure_stage: String,
    #[serde(alias = "suggestedFix", alias = "suggested_fix", default)]
    suggested_fix: String,
}

/// Parses a narrative from a response: JSON extraction first, then the
/// line-label heuristic.
#[must_use]
pub fn parse_narrative(text: &str) -> Narrative {
    if let Some(json) = extract_json_object(text) {
        if let Ok(fields) = serde_json::from_str::<NarrativeFields>(json) {
            if !fields.root_cause.is_empty()
                || !fields.failure_stage.is_empty()
                || !fields.suggested_fix.is_empty()
            {
                return Narrative {
                    root_cause: fields.root_cause,
                    failure_stage: fields.failure_stage,
                    suggested_fix: fields.suggested_fix,
                };
            }
        }
    }

    heuristic_narrative(text)
}

/// Recovers narrative fields from free text by scanning for labels.
///
/// Lines labelled `root cause`, `stage`/`step`, and `fix`/`solution`
/// capture the remainder of the line (or the following line when the label
/// stands alone). Captures are truncated to bounded lengths.
#[must_use]
pub fn heuristic_narrative(text: &str) -> Narrative {
    let lines: Vec<&str> = text.lines().collect();

    let root_cause = capture_label(&lines, &["root cause"]);
    let failure_stage = capture_label(&lines, &["failure stage", "stage", "step"]);
    let suggested_fix = capture_label(&lines, &["suggested fix", "fix", "solution"]);

    Narrative {
        root_cause: truncate_chars(&root_cause, ROOT_CAUSE_MAX),
        failure_stage: truncate_chars(&failure_stage, STAGE_MAX),
        suggested_fix: truncate_chars(&suggested_fix, FIX_MAX),
    }
}

/// Finds the first line containing any label and captures what follows.
fn capture_label(lines: &[&str], labels: &[&str]) -> String {
    for (i, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        let Some(label) = labels.iter().find(|l| lower.contains(**l)) else {
            continue;
        };

        // Prefer the text after the label's separator on the same line
        let after = lower
            .find(label)
            .and_then(|pos| line.get(pos + label.len()..))
            .unwrap_or("");
        let after = after.trim_start_matches([':', '-', ' ', '*']).trim();

        if !after.is_empty() {
            return after.to_string();
        }

        // Label stands alone: capture the next non-empty line
        if let Some(next) = lines[i + 1..].iter().find(|l| !l.trim().is_empty()) {
            return next.trim().to_string();
        }
    }

    String::new()
}

/// Parses the fallback-classification response into a raw category string.
#[must_use]
pub fn parse_category(text: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct CategoryField {
        category: String,
    }

    extract_json_object(text)
        .and_then(|json| serde_json::from_str::<CategoryField>(json).ok())
        .map(|f| f.category)
}

/// Normalizes an LLM-proposed category: uppercased, non-alphanumerics
/// collapsed to underscores, empty becomes `UNKNOWN`.
#[must_use]
pub fn normalize_category(raw: &str) -> String {
    let normalized: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = normalized.trim_matches('_');
    if trimmed.is_empty() {
        "UNKNOWN".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncates a string to at most `max` characters at a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
