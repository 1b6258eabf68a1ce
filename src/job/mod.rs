use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::events::{EventStreamDecoder, StreamEvent};
use crate::notify::NotificationSink;
use crate::progress::{JobStage, ProgressTracker};
use crate::service::{GenerationOptions, ProcessingClient, ProcessingRequest};
use crate::storage::MediaStorage;
use crate::store::{GeneratedContentSet, JobStatus, JobUpdate, PersistenceGateway};
use crate::utils::format_file_size;
use crate::PipelineError;

pub mod cancel;

pub use cancel::CancelToken;

/// Yes/no processing entitlement check consumed at job start
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn allows(&self, owner_id: &str) -> Result<bool>;
}

/// Default gate: everyone may process
pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn allows(&self, _owner_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Observable state of the current (or last) job run
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub stage: JobStage,
    pub progress: u8,
    pub job_id: Option<Uuid>,
    pub upload_id: Option<Uuid>,
    pub error: Option<String>,
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self {
            stage: JobStage::Idle,
            progress: 0,
            job_id: None,
            upload_id: None,
            error: None,
        }
    }
}

/// Final result of one job run
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Option<Uuid>,
    pub upload_id: Option<Uuid>,
    pub status: JobStatus,
    pub progress: u8,
    pub content: GeneratedContentSet,
    pub error: Option<String>,
}

/// Mutable state for one run, owned by the orchestrator while driving it
struct JobRun {
    stage: JobStage,
    tracker: ProgressTracker,
    content: GeneratedContentSet,
    job_id: Option<Uuid>,
    upload_id: Option<Uuid>,
    error: Option<String>,
}

impl JobRun {
    fn new() -> Self {
        Self {
            stage: JobStage::Idle,
            tracker: ProgressTracker::new(),
            content: GeneratedContentSet::default(),
            job_id: None,
            upload_id: None,
            error: None,
        }
    }

    fn outcome(self, status: JobStatus) -> JobOutcome {
        JobOutcome {
            job_id: self.job_id,
            upload_id: self.upload_id,
            status,
            progress: self.tracker.value(),
            content: self.content,
            error: self.error,
        }
    }
}

/// Drives one media file end-to-end: store the file, create upload and job
/// records, open the processing stream, decode and apply events, and persist
/// the terminal result. Owns the job's in-memory state machine
/// (`idle → uploading → transcribing → generating → {complete | error}`).
pub struct JobOrchestrator {
    storage: Arc<dyn MediaStorage>,
    gateway: Arc<dyn PersistenceGateway>,
    client: Arc<dyn ProcessingClient>,
    notifier: Arc<dyn NotificationSink>,
    gate: Arc<dyn AccessGate>,
    owner_id: String,
    state: watch::Sender<JobSnapshot>,
    token: Mutex<Option<CancelToken>>,
    running: AtomicBool,
}

impl JobOrchestrator {
    pub fn new(
        storage: Arc<dyn MediaStorage>,
        gateway: Arc<dyn PersistenceGateway>,
        client: Arc<dyn ProcessingClient>,
        notifier: Arc<dyn NotificationSink>,
        owner_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(JobSnapshot::default());
        Self {
            storage,
            gateway,
            client,
            notifier,
            gate: Arc::new(AllowAll),
            owner_id: owner_id.into(),
            state,
            token: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Subscribe to live snapshots of the current run.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.borrow().clone()
    }

    /// Run one job to its terminal state.
    ///
    /// Runtime failures never escape: they are converted into a terminal
    /// outcome carrying the underlying message. Only precondition violations
    /// (already running, not authorized) are returned as errors.
    pub async fn start(&self, file: &Path, options: GenerationOptions) -> Result<JobOutcome> {
        if self.running.swap(true, Ordering::SeqCst) {
            anyhow::bail!("a job is already in progress");
        }

        let result = self.run_to_terminal(file, options).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Trigger the cancellation token for the in-flight run, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.token.lock().expect("token lock poisoned").as_ref() {
            tracing::info!("cancellation requested");
            token.trigger();
        }
    }

    /// Clear in-memory state back to idle. Persisted records are discarded
    /// from view, never deleted. Callers wanting a clean abort cancel first.
    pub fn reset(&self) {
        self.state.send_replace(JobSnapshot::default());
    }

    async fn run_to_terminal(
        &self,
        file: &Path,
        options: GenerationOptions,
    ) -> Result<JobOutcome> {
        if !self.gate.allows(&self.owner_id).await? {
            anyhow::bail!("owner {} is not entitled to processing", self.owner_id);
        }

        self.state.send_replace(JobSnapshot::default());
        let token = CancelToken::new();
        *self.token.lock().expect("token lock poisoned") = Some(token.clone());

        let mut run = JobRun::new();
        let driven = self.drive(&mut run, file, &options, &token).await;

        // The run is terminal from here on; a late cancel must be a no-op.
        token.seal();
        *self.token.lock().expect("token lock poisoned") = None;

        let outcome = match driven {
            Ok(()) => {
                self.notifier.success("Processing complete");
                run.outcome(JobStatus::Completed)
            }
            Err(err) if PipelineError::is_cancellation(&err) => {
                let message = err.to_string();
                run.stage = JobStage::Error;
                run.error = Some(message.clone());
                self.publish(&run);
                self.persist_terminal(&run, JobStatus::Cancelled, &message).await;
                // User-initiated, so informational rather than an error toast.
                self.notifier.info("Processing cancelled");
                run.outcome(JobStatus::Cancelled)
            }
            Err(err) => {
                let message = format!("{:#}", err);
                run.stage = JobStage::Error;
                run.error = Some(message.clone());
                self.publish(&run);
                self.persist_terminal(&run, JobStatus::Failed, &message).await;
                self.notifier.error(&format!("Processing failed: {}", message));
                run.outcome(JobStatus::Failed)
            }
        };

        Ok(outcome)
    }

    async fn drive(
        &self,
        run: &mut JobRun,
        file: &Path,
        options: &GenerationOptions,
        token: &CancelToken,
    ) -> Result<()> {
        // Persist the raw file. Failure here leaves no records behind.
        run.stage = JobStage::Uploading;
        run.tracker.upload_started();
        self.publish(run);

        let meta = self.storage.store(file).await?;
        tracing::info!(
            file = %meta.file_name,
            size = %format_file_size(meta.size_bytes),
            key = %meta.storage_key,
            "media file stored"
        );

        let upload = self
            .gateway
            .create_upload(&self.owner_id, &meta)
            .await
            .context("failed to create upload record")?;
        run.upload_id = Some(upload.id);

        let job = self
            .gateway
            .create_job(upload.id, "transcription")
            .await
            .context("failed to create job record")?;
        run.job_id = Some(job.id);
        run.tracker.job_created();
        self.publish(run);
        self.persist_stage(run).await;

        let request = ProcessingRequest {
            storage_key: meta.storage_key.clone(),
            job_id: job.id,
            options: *options,
            stream: true,
        };

        let mut stream = tokio::select! {
            _ = token.triggered() => return Err(PipelineError::Cancelled.into()),
            opened = self.client.open_stream(&request) => opened?,
        };

        run.stage = JobStage::Transcribing;
        run.tracker.streaming_started();
        self.publish(run);
        self.persist_stage(run).await;

        let mut decoder = EventStreamDecoder::new();
        let mut completed = false;

        'read: loop {
            let chunk = tokio::select! {
                _ = token.triggered() => return Err(PipelineError::Cancelled.into()),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.context("event stream read failed")?;

            for event in decoder.feed(&bytes) {
                if self.apply_event(run, event).await? {
                    // Terminal event seen; stop waiting even though the
                    // underlying stream may still be open.
                    completed = true;
                    break 'read;
                }
            }
        }
        decoder.finish();

        if !completed {
            return Err(PipelineError::Server(
                "stream ended before a terminal event".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Apply one decoded event. Returns `Ok(true)` once the job completed.
    async fn apply_event(&self, run: &mut JobRun, event: StreamEvent) -> Result<bool> {
        match event {
            StreamEvent::Progress { progress } => {
                run.tracker.transcribe_progress(progress);
                self.publish(run);
                Ok(false)
            }
            StreamEvent::TranscriptChunk { text } => {
                run.content.append_transcript(&text);
                Ok(false)
            }
            StreamEvent::StageChange { stage } => {
                if stage == "generating" {
                    run.stage = JobStage::Generating;
                    run.tracker.generating_started();
                    self.publish(run);
                    self.persist_stage(run).await;
                } else {
                    tracing::debug!(stage, "ignoring unmapped stage change");
                }
                Ok(false)
            }
            StreamEvent::ContentGenerated {
                content_type,
                content,
            } => {
                tracing::debug!(kind = content_type.as_str(), "content artifact received");
                run.content.merge(content_type, content);
                Ok(false)
            }
            StreamEvent::Complete => {
                run.stage = JobStage::Complete;
                run.tracker.complete();
                self.publish(run);

                if let Some(job_id) = run.job_id {
                    self.gateway
                        .update_job(
                            job_id,
                            JobUpdate {
                                status: Some(JobStatus::Completed),
                                progress: Some(run.tracker.value()),
                                stage: Some(JobStage::Complete.as_str().to_string()),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await
                        .context("failed to persist completed job")?;
                }
                Ok(true)
            }
            StreamEvent::Error { message } => Err(PipelineError::Server(message).into()),
        }
    }

    fn publish(&self, run: &JobRun) {
        self.state.send_replace(JobSnapshot {
            stage: run.stage,
            progress: run.tracker.value(),
            job_id: run.job_id,
            upload_id: run.upload_id,
            error: run.error.clone(),
        });
    }

    async fn persist_stage(&self, run: &JobRun) {
        let Some(job_id) = run.job_id else { return };
        let update = JobUpdate {
            progress: Some(run.tracker.value()),
            stage: Some(run.stage.as_str().to_string()),
            ..Default::default()
        };
        if let Err(err) = self.gateway.update_job(job_id, update).await {
            tracing::warn!(%err, "failed to persist stage transition");
        }
    }

    async fn persist_terminal(&self, run: &JobRun, status: JobStatus, message: &str) {
        let Some(job_id) = run.job_id else { return };
        let update = JobUpdate {
            status: Some(status),
            progress: Some(run.tracker.value()),
            stage: Some(run.stage.as_str().to_string()),
            error: Some(message.to_string()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(err) = self.gateway.update_job(job_id, update).await {
            tracing::error!(%err, "failed to persist terminal job state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::encode_event;
    use crate::notify::{MockNotificationSink, NullSink};
    use crate::service::EventByteStream;
    use crate::storage::LocalMediaStorage;
    use crate::store::{ContentKind, InMemoryStore};
    use serde_json::json;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Client replaying a fixed event script, split into small chunks to
    /// exercise the decoder's boundary handling on the real read path.
    struct ScriptedClient {
        events: Vec<StreamEvent>,
        chunk_size: usize,
    }

    #[async_trait]
    impl ProcessingClient for ScriptedClient {
        async fn open_stream(&self, _request: &ProcessingRequest) -> Result<EventByteStream> {
            let wire: String = self.events.iter().map(encode_event).collect();
            let chunks: Vec<Result<Vec<u8>>> = wire
                .as_bytes()
                .chunks(self.chunk_size.max(1))
                .map(|c| Ok(c.to_vec()))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    /// Client whose stream never yields, for cancellation tests.
    struct PendingClient;

    #[async_trait]
    impl ProcessingClient for PendingClient {
        async fn open_stream(&self, _request: &ProcessingRequest) -> Result<EventByteStream> {
            Ok(Box::pin(futures_util::stream::pending()))
        }
    }

    /// Client refusing the request with an HTTP status.
    struct RefusingClient(u16);

    #[async_trait]
    impl ProcessingClient for RefusingClient {
        async fn open_stream(&self, _request: &ProcessingRequest) -> Result<EventByteStream> {
            Err(PipelineError::Transport(self.0).into())
        }
    }

    struct Fixture {
        _source_dir: TempDir,
        file: PathBuf,
        gateway: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let source_dir = TempDir::new().unwrap();
        let file = source_dir.path().join("talk.mp4");
        let mut f = fs_err::File::create(&file).unwrap();
        f.write_all(b"not really a video").unwrap();

        Fixture {
            _source_dir: source_dir,
            file,
            gateway: Arc::new(InMemoryStore::new()),
        }
    }

    fn orchestrator(
        fixture: &Fixture,
        client: Arc<dyn ProcessingClient>,
        notifier: Arc<dyn NotificationSink>,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            Arc::new(LocalMediaStorage::new(None).unwrap()),
            fixture.gateway.clone(),
            client,
            notifier,
            "owner-1",
        )
    }

    fn summary_script() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Progress { progress: 10.0 },
            StreamEvent::TranscriptChunk {
                text: "hello ".to_string(),
            },
            StreamEvent::TranscriptChunk {
                text: "world".to_string(),
            },
            StreamEvent::StageChange {
                stage: "generating".to_string(),
            },
            StreamEvent::ContentGenerated {
                content_type: ContentKind::Summary,
                content: json!("x"),
            },
            StreamEvent::Complete,
        ]
    }

    #[tokio::test]
    async fn summary_job_runs_to_completion() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 7,
        });
        let orchestrator = orchestrator(&fx, client, Arc::new(NullSink));

        let options = GenerationOptions {
            generate_summary: true,
            ..Default::default()
        };
        let outcome = orchestrator.start(&fx.file, options).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.progress, 100);
        assert_eq!(outcome.content.transcript, "hello world");
        assert_eq!(outcome.content.get(ContentKind::Summary), Some(&json!("x")));

        let record = fx
            .gateway
            .job(outcome.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn completion_notifies_success_not_error() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 64,
        });

        let mut sink = MockNotificationSink::new();
        sink.expect_success().times(1).return_const(());
        sink.expect_error().times(0);
        sink.expect_info().times(0);

        let orchestrator = orchestrator(&fx, client, Arc::new(sink));
        orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_event_fails_the_job() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: vec![
                StreamEvent::Progress { progress: 40.0 },
                StreamEvent::Error {
                    message: "model unavailable".to_string(),
                },
            ],
            chunk_size: 16,
        });

        let mut sink = MockNotificationSink::new();
        sink.expect_error().times(1).return_const(());
        sink.expect_success().times(0);
        sink.expect_info().times(0);

        let orchestrator = orchestrator(&fx, client, Arc::new(sink));
        let outcome = orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.unwrap().contains("model unavailable"));
        // Progress is left at its last value, not reset.
        assert_eq!(outcome.progress, 62);

        let record = fx
            .gateway
            .job(outcome.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn silent_end_of_stream_is_a_synthetic_failure() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: vec![StreamEvent::Progress { progress: 20.0 }],
            chunk_size: 8,
        });
        let orchestrator = orchestrator(&fx, client, Arc::new(NullSink));

        let outcome = orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome
            .error
            .unwrap()
            .contains("stream ended before a terminal event"));
    }

    #[tokio::test]
    async fn transport_refusal_fails_with_status() {
        let fx = fixture();
        let orchestrator = orchestrator(&fx, Arc::new(RefusingClient(503)), Arc::new(NullSink));

        let outcome = orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn storage_failure_creates_no_records() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 8,
        });
        let orchestrator = orchestrator(&fx, client, Arc::new(NullSink));

        let outcome = orchestrator
            .start(Path::new("/no/such/input.mp4"), GenerationOptions::all())
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.job_id.is_none());
        assert!(outcome.upload_id.is_none());
    }

    #[tokio::test]
    async fn cancel_unblocks_a_hung_stream_and_reports_cancelled() {
        let fx = fixture();

        let mut sink = MockNotificationSink::new();
        sink.expect_info().times(1).return_const(());
        sink.expect_success().times(0);
        sink.expect_error().times(0);

        let orchestrator = Arc::new(orchestrator(&fx, Arc::new(PendingClient), Arc::new(sink)));

        let runner = orchestrator.clone();
        let file = fx.file.clone();
        let handle =
            tokio::spawn(async move { runner.start(&file, GenerationOptions::all()).await });

        // Let the run reach the pending stream read, then cancel.
        let mut snapshots = orchestrator.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if snapshots.borrow().stage == JobStage::Transcribing {
                    break;
                }
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .expect("job should reach the streaming stage");

        orchestrator.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancel must unblock the pending read")
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert!(outcome.error.unwrap().contains("cancelled by user"));

        let record = fx
            .gateway
            .job(outcome.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_with_no_job_running_is_a_no_op() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 32,
        });
        let orchestrator = orchestrator(&fx, client, Arc::new(NullSink));

        orchestrator.cancel();

        let outcome = orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn reset_returns_snapshot_to_idle() {
        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 32,
        });
        let orchestrator = orchestrator(&fx, client, Arc::new(NullSink));

        orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .unwrap();
        assert_eq!(orchestrator.snapshot().stage, JobStage::Complete);

        orchestrator.reset();
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.stage, JobStage::Idle);
        assert_eq!(snapshot.progress, 0);
        assert!(snapshot.job_id.is_none());
    }

    #[tokio::test]
    async fn denied_gate_is_a_precondition_error() {
        struct DenyAll;

        #[async_trait]
        impl AccessGate for DenyAll {
            async fn allows(&self, _owner_id: &str) -> Result<bool> {
                Ok(false)
            }
        }

        let fx = fixture();
        let client = Arc::new(ScriptedClient {
            events: summary_script(),
            chunk_size: 32,
        });
        let orchestrator =
            orchestrator(&fx, client, Arc::new(NullSink)).with_gate(Arc::new(DenyAll));

        assert!(orchestrator
            .start(&fx.file, GenerationOptions::all())
            .await
            .is_err());
    }
}
