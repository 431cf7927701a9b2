//! Step detection over cleaned log lines.
//!
//! Groups lines into named steps with absolute, inclusive line ranges. The
//! detected steps cover the entire input with no gaps: each step extends to
//! the line before the next step starts, and the final step extends to the
//! last line.
//!
//! Rules, in precedence order:
//!
//! 1. Log-file marker (`--- Log File: <name>.txt ---`) always starts a new
//!    step and always ends the prior one.
//! 2. `##[group]<name>` starts a step unless the current step came from a
//!    log-file marker.
//! 3. `##[endgroup]` closes a group-started step (the range still extends
//!    to the next step start).
//! 4. `Run <command>` starts a step only when no step is open.
//! 5. `Post <command>` starts a step only when no step is open.

use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::LogStep;

/// Step name used when no structural marker is found.
pub const FULL_LOG_STEP: &str = "Full Log";

/// Maximum command characters carried into a `Run:`/`Post:` step name.
const COMMAND_NAME_LIMIT: usize = 50;

#[allow(clippy::expect_used)] // pattern literal, covered by tests
static LOG_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---\s*Log File:\s*(.+\.txt)\s*---$").expect("valid log-file regex")
});

#[allow(clippy::expect_used)] // pattern literal, covered by tests
static FILE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+_").expect("valid prefix regex"));

#[allow(clippy::expect_used)] // pattern literal, covered by tests
static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\[group\](.+)$").expect("valid group regex"));

#[allow(clippy::expect_used)] // pattern literal, covered by tests
static RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Run\s+(.+)$").expect("valid run regex"));

#[allow(clippy::expect_used)] // pattern literal, covered by tests
static POST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Post\s+(.+)$").expect("valid post regex"));

/// Where a step boundary came from. Marker-origin steps swallow group and
/// run markers inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOrigin {
    LogFile,
    Group,
    Command,
}

/// An in-progress step before ranges are finalized.
#[derive(Debug)]
struct PendingStep {
    name: String,
    start: usize,
    origin: StepOrigin,
    open: bool,
}

/// Detects steps over a cleaned line sequence.
///
/// Returns inclusive, non-overlapping ranges covering the entire input.
/// When nothing matches, the whole log becomes a single [`FULL_LOG_STEP`]
/// step. An empty input produces no steps.
#[must_use]
pub fn detect_steps(lines: &[String]) -> Vec<LogStep> {
    if lines.is_empty() {
        return Vec::new();
    }

    let mut pending: Vec<PendingStep> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = LOG_FILE_RE.captures(line) {
            let name = log_file_step_name(&caps[1]);
            pending.push(PendingStep {
                name,
                start: i,
                origin: StepOrigin::LogFile,
                open: true,
            });
            continue;
        }

        let in_log_file = pending
            .last()
            .is_some_and(|s| s.origin == StepOrigin::LogFile);

        if let Some(caps) = GROUP_RE.captures(line) {
            if !in_log_file {
                pending.push(PendingStep {
                    name: caps[1].trim().to_string(),
                    start: i,
                    origin: StepOrigin::Group,
                    open: true,
                });
            }
            continue;
        }

        if line == "##[endgroup]" {
            if let Some(last) = pending.last_mut() {
                if last.origin == StepOrigin::Group {
                    last.open = false;
                }
            }
            continue;
        }

        let step_open = pending.last().is_some_and(|s| s.open);

        if let Some(caps) = RUN_RE.captures(line) {
            if !step_open {
                pending.push(PendingStep {
                    name: command_step_name("Run", &caps[1]),
                    start: i,
                    origin: StepOrigin::Command,
                    open: true,
                });
            }
            continue;
        }

        if let Some(caps) = POST_RE.captures(line) {
            if !step_open {
                pending.push(PendingStep {
                    name: command_step_name("Post", &caps[1]),
                    start: i,
                    origin: StepOrigin::Command,
                    open: true,
                });
            }
        }
    }

    if pending.is_empty() {
        return vec![LogStep::new(FULL_LOG_STEP.to_string(), 0, lines.len() - 1)];
    }

    // Leading lines before the first marker belong to the first step so the
    // ranges cover the whole input.
    if let Some(first) = pending.first_mut() {
        first.start = 0;
    }

    let mut steps = Vec::with_capacity(pending.len());
    for i in 0..pending.len() {
        let end = if i + 1 < pending.len() {
            pending[i + 1].start - 1
        } else {
            lines.len() - 1
        };
        steps.push(LogStep::new(pending[i].name.clone(), pending[i].start, end));
    }

    steps
}

/// Derives a step name from a log-file marker: strips the numeric `NN_`
/// prefix and the `.txt` suffix.
fn log_file_step_name(file_name: &str) -> String {
    let trimmed = file_name.trim();
    let without_suffix = trimmed.strip_suffix(".txt").unwrap_or(trimmed);
    FILE_PREFIX_RE.replace(without_suffix, "").to_string()
}

/// Builds a `Run: ...` / `Post: ...` step name, truncating the command at a
/// grapheme boundary.
fn command_step_name(kind: &str, command: &str) -> String {
    let command = command.trim();
    let graphemes: Vec<&str> = command.graphemes(true).collect();
    if graphemes.len() > COMMAND_NAME_LIMIT {
        let truncated: String = graphemes[..COMMAND_NAME_LIMIT].concat();
        format!("{kind}: {truncated}...")
    } else {
        format!("{kind}: {command}")
    }
}
