//! Raw log normalization.
//!
//! Turns raw CI log text into a normalized line sequence: control sequences
//! and leading timestamps stripped, stray carriage returns converted, lines
//! trimmed and empties dropped. Cleaning is idempotent and preserves input
//! order.

use std::sync::LazyLock;

use regex::Regex;

/// ANSI escape sequences: CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL`
/// or `ESC ] ... ST`) families.
#[allow(clippy::expect_used)] // pattern literal, covered by tests
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
        .expect("valid ANSI regex")
});

/// Leading ISO-8601 timestamps of the form `YYYY-MM-DDThh:mm:ss.fffZ `
/// that GitHub-style runners prefix onto every line.
#[allow(clippy::expect_used)] // pattern literal, covered by tests
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z ").expect("valid timestamp regex")
});

/// Cleans raw log text into an ordered sequence of non-empty lines.
///
/// # Examples
///
/// ```
/// use loglens::pipeline::clean;
///
/// let lines = clean("2024-01-01T10:00:00.000Z \x1b[32mok\x1b[0m\n\n  done  ");
/// assert_eq!(lines, vec!["ok", "done"]);
/// ```
#[must_use]
pub fn clean(raw: &str) -> Vec<String> {
    // Normalize stray carriage returns before splitting: progress spinners
    // emit `\r` without a following newline.
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let stripped = ANSI_RE.replace_all(&normalized, "");

    stripped
        .split('\n')
        .map(strip_line)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Trims a line and strips leading runner timestamps. Stripping repeats so
/// that cleaning already-cleaned text is a no-op.
fn strip_line(line: &str) -> String {
    let mut line = line.trim();
    while let Some(m) = TIMESTAMP_RE.find(line) {
        line = line[m.end()..].trim_start();
    }
    line.trim_end().to_string()
}
