//! Deterministic failure classification.
//!
//! Assigns a failure category, priority and confidence from the extracted
//! errors and chunk content. Detection order is strict: the first matching
//! rule wins, so a test failure outranks a co-occurring lint warning no
//! matter how many lint lines the log contains. INTENTIONAL is a firm
//! short-circuit: the classifier emits the full narrative itself and the
//! LLM is never consulted.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{DetectedError, LogChunk, Narrative};

/// Priority assigned to categories no rule recognises.
pub const UNKNOWN_PRIORITY: u8 = 99;

/// Failure categories in strict detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Deliberate non-zero exit (CI self-test fixture).
    Intentional,
    /// Test framework failures.
    Test,
    /// Compile or bundler failures.
    Build,
    /// Runtime exceptions.
    Runtime,
    /// Connectivity, container or database failures.
    Infra,
    /// Vulnerability or auth failures.
    Security,
    /// Timeouts and exceeded deadlines.
    Timeout,
    /// Package manager and resolution failures.
    Dependency,
    /// Missing or invalid configuration.
    Config,
    /// Filesystem or credential permission failures.
    Permission,
    /// Lint and format findings.
    Lint,
    /// No known signature matched.
    Unknown,
}

impl FailureKind {
    /// Canonical tag stored on analysis results.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Intentional => "INTENTIONAL",
            Self::Test => "TEST",
            Self::Build => "BUILD",
            Self::Runtime => "RUNTIME",
            Self::Infra => "INFRA",
            Self::Security => "SECURITY",
            Self::Timeout => "TIMEOUT",
            Self::Dependency => "DEPENDENCY",
            Self::Config => "CONFIG",
            Self::Permission => "PERMISSION",
            Self::Lint => "LINT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a canonical tag back into a kind.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "INTENTIONAL" => Some(Self::Intentional),
            "TEST" => Some(Self::Test),
            "BUILD" => Some(Self::Build),
            "RUNTIME" => Some(Self::Runtime),
            "INFRA" => Some(Self::Infra),
            "SECURITY" => Some(Self::Security),
            "TIMEOUT" => Some(Self::Timeout),
            "DEPENDENCY" => Some(Self::Dependency),
            "CONFIG" => Some(Self::Config),
            "PERMISSION" => Some(Self::Permission),
            "LINT" => Some(Self::Lint),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Category priority; lower is more severe. INTENTIONAL is configured
    /// on the [`Classifier`] and UNKNOWN is [`UNKNOWN_PRIORITY`].
    #[must_use]
    pub const fn base_priority(self) -> u8 {
        match self {
            Self::Intentional => 0,
            Self::Test => 1,
            Self::Build => 2,
            Self::Runtime => 3,
            Self::Infra => 4,
            Self::Security => 5,
            Self::Timeout => 6,
            Self::Dependency => 7,
            Self::Config => 8,
            Self::Permission => 9,
            Self::Lint => 10,
            Self::Unknown => UNKNOWN_PRIORITY,
        }
    }
}

/// Classification output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Matched category.
    pub kind: FailureKind,
    /// Category priority (respects the configured INTENTIONAL priority).
    pub priority: u8,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    /// Human-readable reason, e.g. "12 test failure(s) detected".
    pub reason: String,
    /// Whether the analyzer may skip the LLM entirely.
    pub skip_llm: bool,
    /// Full narrative, present only when the classifier is confident
    /// enough to bypass the LLM.
    pub narrative: Option<Narrative>,
}

/// A detection rule: error categories that claim the kind directly, plus an
/// optional content signature scanned over chunk text.
struct Rule {
    kind: FailureKind,
    categories: &'static [&'static str],
    content: Option<Regex>,
}

/// Raw rules in strict detection order (INTENTIONAL is handled separately).
const RAW_RULES: &[(FailureKind, &[&str], Option<&str>)] = &[
    (
        FailureKind::Test,
        &["Test Failure"],
        Some(r"(?i)\b\d+\s+(tests?|specs?)\s+failed\b"),
    ),
    (
        FailureKind::Build,
        &["Build Failure", "Syntax Error"],
        Some(r"error TS\d+"),
    ),
    (FailureKind::Runtime, &["Runtime Error"], None),
    (
        FailureKind::Infra,
        &["Network Error", "API Error"],
        Some(r"(?i)connection (refused|reset)|container exited|kubernetes|database connection"),
    ),
    (
        FailureKind::Security,
        &[],
        Some(r"(?i)CVE-\d{4}-\d+|vulnerabilit|security audit|authentication failed|unauthorized"),
    ),
    (
        FailureKind::Timeout,
        &[],
        Some(r"(?i)timeout|timed out|deadline exceeded"),
    ),
    (FailureKind::Dependency, &["Dependency Issue"], None),
    (
        FailureKind::Config,
        &[],
        Some(r"(?i)missing (required )?env(ironment)? var|invalid (yaml|json)|\.env file not found"),
    ),
    (
        FailureKind::Permission,
        &[],
        Some(r"(?i)EACCES|EPERM|permission denied|access denied"),
    ),
    (
        FailureKind::Lint,
        &[],
        Some(r"(?i)\b(eslint|tslint|stylelint|prettier|pylint|rubocop|clippy)\b|lint (error|warning)"),
    ),
];

#[allow(clippy::expect_used)] // pattern literals, covered by tests
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RAW_RULES
        .iter()
        .map(|&(kind, categories, content)| Rule {
            kind,
            categories,
            content: content.map(|p| Regex::new(p).expect("valid rule regex")),
        })
        .collect()
});

/// Deterministic failure classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    intentional_priority: u8,
}

impl Classifier {
    /// Creates a classifier with the given INTENTIONAL priority (0 or 5,
    /// depending on whether deliberate failures sort first or last among
    /// incidents).
    #[must_use]
    pub const fn new(intentional_priority: u8) -> Self {
        Self {
            intentional_priority,
        }
    }

    /// Classifies a run from its chunks and deduplicated error list.
    ///
    /// Never fails: when no rule matches, the result is UNKNOWN with
    /// `skip_llm = false` so the analyzer consults the LLM.
    #[must_use]
    pub fn classify(&self, chunks: &[LogChunk], errors: &[DetectedError]) -> Classification {
        if let Some(classification) = self.classify_intentional(chunks, errors) {
            return classification;
        }

        for rule in RULES.iter() {
            let matching: Vec<&DetectedError> = errors
                .iter()
                .filter(|e| rule.categories.contains(&e.category.as_str()))
                .collect();

            if !matching.is_empty() {
                let n = matching.len();
                let label = matching[0].category.to_lowercase();
                return Classification {
                    kind: rule.kind,
                    priority: rule.kind.base_priority(),
                    confidence: confidence_for_count(n),
                    reason: format!("{n} {label}(s) detected"),
                    skip_llm: false,
                    narrative: None,
                };
            }

            if let Some(ref re) = rule.content {
                if chunks.iter().any(|c| re.is_match(&c.content)) {
                    return Classification {
                        kind: rule.kind,
                        priority: rule.kind.base_priority(),
                        confidence: 0.6,
                        reason: format!("{} signature found in log content", rule.kind.tag()),
                        skip_llm: false,
                        narrative: None,
                    };
                }
            }
        }

        Classification {
            kind: FailureKind::Unknown,
            priority: UNKNOWN_PRIORITY,
            confidence: 0.3,
            reason: "no known failure signature".to_string(),
            skip_llm: false,
            narrative: None,
        }
    }

    /// INTENTIONAL detection: an explicit `exit N` line, or a step whose
    /// name contains both "force" and "fail" alongside extracted errors.
    fn classify_intentional(
        &self,
        chunks: &[LogChunk],
        errors: &[DetectedError],
    ) -> Option<Classification> {
        let exit_error = errors.iter().find(|e| e.intentional);

        let forced_step = chunks.iter().find(|c| {
            let name = c.step_name.to_lowercase();
            name.contains("force") && name.contains("fail") && c.has_errors
        });

        let stage = match (exit_error, forced_step) {
            (Some(e), _) => e.step_name.clone(),
            (None, Some(c)) => c.step_name.clone(),
            (None, None) => return None,
        };

        Some(Classification {
            kind: FailureKind::Intentional,
            priority: self.intentional_priority,
            confidence: 0.95,
            reason: "explicit non-zero exit detected".to_string(),
            skip_llm: true,
            narrative: Some(Narrative {
                root_cause: format!(
                    "The workflow exited with a deliberate non-zero exit code during \
                     \"{stage}\". This is a forced failure used to verify the CI \
                     pipeline itself, not a defect in the code under test."
                ),
                failure_stage: stage,
                suggested_fix: "Remove the forced exit (e.g. the `exit 1` line) from the \
                                workflow step once the pipeline check is no longer needed."
                    .to_string(),
            }),
        })
    }
}

/// Confidence for a category backed by `n` extracted errors.
#[allow(clippy::cast_precision_loss)]
fn confidence_for_count(n: usize) -> f32 {
    (0.05f32.mul_add(n as f32, 0.7)).min(0.95)
}
