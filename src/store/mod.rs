use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PipelineError;

/// Lifecycle status of a submitted media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
}

/// One submitted media file. Immutable after creation except status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub storage_key: String,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
}

/// Metadata describing a stored file, used to create an [`Upload`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub storage_key: String,
}

/// Status of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One run of the pipeline against an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: String,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied to a persisted job record
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind of a generated content artifact
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Summary,
    KeyPoints,
    ActionItems,
    Timestamps,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Summary => "summary",
            ContentKind::KeyPoints => "keyPoints",
            ContentKind::ActionItems => "actionItems",
            ContentKind::Timestamps => "timestamps",
        }
    }
}

/// Accumulating output of one job: transcript text plus per-kind artifacts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContentSet {
    pub transcript: String,
    pub content: BTreeMap<ContentKind, serde_json::Value>,
}

impl GeneratedContentSet {
    pub fn append_transcript(&mut self, text: &str) {
        self.transcript.push_str(text);
    }

    pub fn merge(&mut self, kind: ContentKind, value: serde_json::Value) {
        self.content.insert(kind, value);
    }

    pub fn get(&self, kind: ContentKind) -> Option<&serde_json::Value> {
        self.content.get(&kind)
    }
}

/// Durable storage of upload and job records.
///
/// The pipeline requires read-your-writes consistency for a single job's own
/// records; no cross-job transactions are needed.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn create_upload(&self, owner_id: &str, meta: &FileMeta) -> Result<Upload>;

    async fn create_job(&self, upload_id: Uuid, job_type: &str) -> Result<ProcessingJob>;

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<()>;

    async fn job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>>;
}

/// In-memory gateway backing the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryStore {
    uploads: Mutex<HashMap<Uuid, Upload>>,
    jobs: Mutex<HashMap<Uuid, ProcessingJob>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryStore {
    async fn create_upload(&self, owner_id: &str, meta: &FileMeta) -> Result<Upload> {
        let upload = Upload {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            file_name: meta.file_name.clone(),
            size_bytes: meta.size_bytes,
            mime_type: meta.mime_type.clone(),
            storage_key: meta.storage_key.clone(),
            status: UploadStatus::Uploaded,
            created_at: Utc::now(),
        };

        self.uploads
            .lock()
            .expect("upload table poisoned")
            .insert(upload.id, upload.clone());

        Ok(upload)
    }

    async fn create_job(&self, upload_id: Uuid, job_type: &str) -> Result<ProcessingJob> {
        let mut jobs = self.jobs.lock().expect("job table poisoned");

        // At most one running job per upload.
        if jobs
            .values()
            .any(|j| j.upload_id == upload_id && j.status == JobStatus::Running)
        {
            return Err(PipelineError::Record(format!(
                "upload {} already has a running job",
                upload_id
            ))
            .into());
        }

        let now = Utc::now();
        let job = ProcessingJob {
            id: Uuid::new_v4(),
            upload_id,
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            progress: 0,
            stage: "uploading".to_string(),
            retry_count: 0,
            error: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        };

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock().expect("job table poisoned");
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| PipelineError::Record(format!("job {} not found", job_id)))?;

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(stage) = update.stage {
            job.stage = stage;
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }

        Ok(())
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self
            .jobs
            .lock()
            .expect("job table poisoned")
            .get(&job_id)
            .cloned())
    }
}
