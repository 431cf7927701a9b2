//! # loglens
//!
//! CI/CD build-log analysis pipeline.
//!
//! loglens ingests raw build logs, transforms them into a searchable,
//! semantically-indexed representation, classifies the failure
//! deterministically, and - when classification is ambiguous - grounds an
//! LLM root-cause analysis in similar past failures and their confirmed
//! resolutions.
//!
//! ## Pipeline
//!
//! - **Cleaner**: strips control sequences, timestamps and empty lines
//! - **Step detection**: groups lines into named steps by structural markers
//! - **Chunking**: size-bounded chunks with dense per-run indices
//! - **Error extraction**: ordered pattern catalogue, first-match-wins
//! - **Persistence**: atomic chunk replacement in `SQLite`
//! - **Embedding**: best-effort per-chunk vectors from the LLM provider
//! - **Classification**: strict-order rules with an INTENTIONAL short-circuit
//! - **Analysis**: retrieval-augmented LLM narrative with tolerant parsing

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped I/O (memmap2)
#![warn(unsafe_code)]

pub mod analyze;
pub mod classify;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod provider;
pub mod rag;
pub mod search;
pub mod server;
pub mod storage;
pub mod worker;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{
    AnalysisResult, Confidence, DetectedError, LogChunk, LogStep, Narrative, Repository,
    RunStatus, WorkflowRun,
};

// Re-export configuration
pub use config::{PipelineConfig, ProviderConfig};

// Re-export pipeline entry points
pub use pipeline::{MAX_CHUNK_LINES, ParsedLog, clean, detect_steps, extract_errors, parse_log};

// Re-export classification types
pub use classify::{Classification, Classifier, FailureKind};

// Re-export analysis entry points
pub use analyze::{Analyzer, analyze_text};

// Re-export storage types
pub use storage::{DEFAULT_DB_PATH, SqliteStorage, Storage};

// Re-export provider types
pub use provider::{LlmProvider, MockProvider, OpenAiProvider, create_provider};

// Re-export embedding helpers
pub use embedding::{DEFAULT_DIMENSIONS, cosine_similarity};

// Re-export search operations
pub use search::{
    SimilarCase, SimilarChunk, embedding_stats, find_relevant_chunks_for_run,
    find_similar_chunks, find_similar_errors, find_similar_with_analysis,
};

// Re-export worker types
pub use worker::{HttpLogSource, LogProcessingJob, LogSource, QUEUE_NAME, Worker};
