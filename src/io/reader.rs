//! Log file reading with memory mapping support.
//!
//! CI logs submitted through the CLI can run to hundreds of megabytes;
//! large files are memory-mapped instead of read into an intermediate
//! buffer.

// Memory mapping requires unsafe but is well-documented and safe for read-only access
#![allow(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{PipelineError, Result};

/// Threshold for using memory mapping (1MB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Maximum file size to read into memory (1GB).
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Log file reader.
///
/// Automatically chooses the reading strategy based on file size:
/// - Small files (< 1MB): Read directly into memory
/// - Large files (>= 1MB): Use memory mapping
///
/// # Examples
///
/// ```no_run
/// use loglens::io::LogFileReader;
///
/// let reader = LogFileReader::open("build.log").unwrap();
/// let content = reader.read_to_string().unwrap();
/// ```
pub struct LogFileReader {
    /// File handle.
    file: File,
    /// File size in bytes.
    size: u64,
    /// File path for error messages.
    path: String,
}

impl LogFileReader {
    /// Opens a log file for reading.
    ///
    /// The size cap is checked against the file metadata before the file
    /// is opened, so an oversized log never ties up a handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, can't be opened, or
    /// exceeds the size cap.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let size = std::fs::metadata(path)
            .map_err(|e| Self::read_error(&name, &e.to_string()))?
            .len();

        if size > MAX_FILE_SIZE {
            return Err(Self::read_error(
                &name,
                &format!("{size} bytes exceeds the {MAX_FILE_SIZE} byte cap"),
            ));
        }

        let file = File::open(path).map_err(|e| Self::read_error(&name, &e.to_string()))?;

        Ok(Self {
            file,
            size,
            path: name,
        })
    }

    fn read_error(path: &str, reason: &str) -> crate::error::Error {
        PipelineError::ReadFailed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Reads the file content as a string.
    ///
    /// Uses memory mapping for large files. Invalid UTF-8 sequences are
    /// replaced rather than rejected: CI logs routinely interleave binary
    /// output.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn read_to_string(&self) -> Result<String> {
        if self.size >= MMAP_THRESHOLD {
            self.read_mmap()
        } else {
            self.read_direct()
        }
    }

    /// Reads directly into memory (small files).
    fn read_direct(&self) -> Result<String> {
        let mut content = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        let mut file = &self.file;
        file.read_to_end(&mut content)
            .map_err(|e| Self::read_error(&self.path, &e.to_string()))?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Reads via memory mapping (large files).
    fn read_mmap(&self) -> Result<String> {
        // SAFETY: the mapping is read-only and the file handle outlives it
        let mmap = unsafe { Mmap::map(&self.file) }
            .map_err(|e| Self::read_error(&self.path, &format!("memory mapping failed: {e}")))?;
        Ok(String::from_utf8_lossy(&mmap).into_owned())
    }
}
