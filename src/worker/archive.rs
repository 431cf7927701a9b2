//! Log archive download and extraction.
//!
//! CI providers hand out short-lived URLs for ZIP archives of run logs.
//! Every `.txt` entry is extracted and concatenated with a `Log File`
//! marker line, which the step detector treats as a first-class step
//! boundary. An archive with no `.txt` entries is an empty log: a terminal
//! job failure, never retried.

use std::io::{Cursor, Read};

use crate::error::{PipelineError, QueueError, Result};

/// Downloads a log archive from a short-lived URL.
///
/// # Errors
///
/// Returns a retryable transport error on connection failures or non-2xx
/// responses.
pub async fn download_archive(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(QueueError::from)?
        .error_for_status()
        .map_err(QueueError::from)?;

    let bytes = response.bytes().await.map_err(QueueError::from)?;
    Ok(bytes.to_vec())
}

/// Extracts every `.txt` entry from a ZIP archive into one log text.
///
/// Entries are concatenated in archive order as
/// `\n--- Log File: <entry-name> ---\n<contents>`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidArchive`] for unreadable archives and
/// [`PipelineError::EmptyLog`] when no `.txt` entry exists. Both are
/// terminal.
pub fn extract_log_archive(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(PipelineError::from)?;

    let mut combined = String::new();
    let mut entries = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(PipelineError::from)?;
        if !entry.is_file() || !entry.name().ends_with(".txt") {
            continue;
        }

        let name = entry.name().to_string();
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| PipelineError::InvalidArchive {
                reason: format!("entry {name}: {e}"),
            })?;

        combined.push_str(&format!("\n--- Log File: {name} ---\n"));
        combined.push_str(&contents);
        entries += 1;
    }

    if entries == 0 {
        return Err(PipelineError::EmptyLog.into());
    }

    Ok(combined)
}
