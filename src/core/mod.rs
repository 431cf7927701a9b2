//! Core domain types for the log analysis pipeline.

mod analysis;
mod chunk;
mod run;

pub use analysis::{AnalysisResult, Confidence, DetectedError, Narrative};
pub use chunk::{LogChunk, LogStep};
pub use run::{Repository, RunStatus, WorkflowRun};
