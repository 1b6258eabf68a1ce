//! Clipscribe - a streamed media transcription and content generation pipeline
//!
//! This library uploads a media file to a processing service, decodes the
//! service's long-lived event stream into typed events, maps stage signals
//! into a single monotonic progress value, and supports mid-flight
//! cancellation. A batch scheduler drives the same per-item pipeline across
//! many files with pause/resume and per-item fault isolation.

pub mod batch;
pub mod cli;
pub mod config;
pub mod events;
pub mod job;
pub mod notify;
pub mod progress;
pub mod service;
pub mod storage;
pub mod store;
pub mod utils;

pub use batch::{BatchItem, BatchItemStatus, BatchScheduler, GeneratedClip};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use events::{EventStreamDecoder, StreamEvent};
pub use job::{JobOrchestrator, JobOutcome};
pub use progress::{JobStage, ProgressTracker};
pub use store::{ContentKind, GeneratedContentSet, JobStatus, ProcessingJob, Upload};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy for the processing pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("record creation failed: {0}")]
    Record(String),

    #[error("processing service returned HTTP {0}")]
    Transport(u16),

    #[error("processing failed: {0}")]
    Server(String),

    #[error("cancelled by user")]
    Cancelled,
}

impl PipelineError {
    /// Whether an error chain bottoms out in a user-triggered cancellation
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Cancelled)
        )
    }
}
