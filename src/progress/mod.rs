use serde::{Deserialize, Serialize};

use crate::store::JobStatus;

/// Coarse phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Idle,
    Uploading,
    Transcribing,
    Generating,
    Complete,
    Error,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Idle => "idle",
            JobStage::Uploading => "uploading",
            JobStage::Transcribing => "transcribing",
            JobStage::Generating => "generating",
            JobStage::Complete => "complete",
            JobStage::Error => "error",
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobStage::Idle => JobStatus::Pending,
            JobStage::Uploading | JobStage::Transcribing | JobStage::Generating => {
                JobStatus::Running
            }
            JobStage::Complete => JobStatus::Completed,
            JobStage::Error => JobStatus::Failed,
        }
    }
}

/// Maps heterogeneous stage signals into one monotonic 0-100 value.
///
/// The mapping is user-visible behavior and is fixed: uploading occupies
/// [0,30], streaming begins at a 50 jump, fine-grained transcribe progress
/// advances within [50,80], generating forces at least 80, completion is
/// exactly 100. The value never decreases for the life of one job, and a
/// terminal error leaves it wherever it was.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    value: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Upload call issued: 10.
    pub fn upload_started(&mut self) -> u8 {
        self.advance_to(10)
    }

    /// Upload returned and a job record exists: 30.
    pub fn job_created(&mut self) -> u8 {
        self.advance_to(30)
    }

    /// Streaming began: fixed jump to 50.
    pub fn streaming_started(&mut self) -> u8 {
        self.advance_to(50)
    }

    /// A `progress` event carrying the stage's own 0-100 fraction.
    pub fn transcribe_progress(&mut self, fraction: f64) -> u8 {
        let scaled = 50.0 + fraction.clamp(0.0, 100.0) * 0.3;
        self.advance_to(scaled.min(80.0) as u8)
    }

    /// Stage changed to generating: at least 80.
    pub fn generating_started(&mut self) -> u8 {
        self.advance_to(80)
    }

    /// Terminal success: exactly 100.
    pub fn complete(&mut self) -> u8 {
        self.advance_to(100)
    }

    fn advance_to(&mut self, candidate: u8) -> u8 {
        if candidate > self.value {
            self.value = candidate;
        }
        self.value
    }
}
