use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notify::NotificationSink;

pub mod clips;

pub use clips::{ClipPipeline, ClipStudio, ContentProfile, GeneratedClip};

/// Status of one item inside a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One file within a multi-file run, carrying its own independent state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: Uuid,
    pub file_name: String,
    /// Transcript proxy the analyze phase runs against.
    pub transcript: String,
    pub status: BatchItemStatus,
    pub progress: u8,
    pub language: Option<String>,
    pub niche: Option<String>,
    pub clips: Vec<GeneratedClip>,
    pub error: Option<String>,
}

impl BatchItem {
    pub fn new(file_name: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            transcript: transcript.into(),
            status: BatchItemStatus::Pending,
            progress: 0,
            language: None,
            niche: None,
            clips: Vec::new(),
            error: None,
        }
    }
}

type CompletionCallback = Box<dyn Fn(&[BatchItem]) + Send + Sync>;

#[derive(Default)]
struct BatchState {
    items: Vec<BatchItem>,
    cursor: usize,
    aggregate: f64,
    callback_fired: bool,
}

/// Sequentially drives the per-item clip pipeline across an ordered queue.
///
/// Concurrency across items is exactly 1 by construction: the loop awaits
/// each item before touching the next. That bounds load on the external
/// service and keeps failure attribution unambiguous, so it must not be
/// parallelized. A failing item is marked `failed` and the batch continues.
/// Pause is cooperative and only takes effect at an item boundary.
pub struct BatchScheduler {
    pipeline: Arc<dyn ClipPipeline>,
    notifier: Arc<dyn NotificationSink>,
    clip_count: usize,
    state: Mutex<BatchState>,
    paused: AtomicBool,
    running: AtomicBool,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl BatchScheduler {
    pub fn new(
        pipeline: Arc<dyn ClipPipeline>,
        notifier: Arc<dyn NotificationSink>,
        clip_count: usize,
    ) -> Self {
        Self {
            pipeline,
            notifier,
            clip_count: clip_count.max(1),
            state: Mutex::new(BatchState::default()),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            on_complete: Mutex::new(None),
        }
    }

    /// Register the callback fired once when the cursor reaches the end.
    pub fn set_on_complete(&self, callback: CompletionCallback) {
        *self.on_complete.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Append pending items. Allowed before or between runs only.
    pub fn enqueue(&self, items: impl IntoIterator<Item = BatchItem>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            anyhow::bail!("cannot enqueue while the batch is running");
        }

        let mut state = self.state.lock().expect("batch state poisoned");
        state.items.extend(items);
        state.callback_fired = false;
        Ok(())
    }

    /// Process the queue strictly in order, one item at a time.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            anyhow::bail!("batch is already running");
        }
        if self.state.lock().expect("batch state poisoned").items.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            anyhow::bail!("batch has no items");
        }

        self.drive().await;
        Ok(())
    }

    /// Request a pause. Takes effect at the next item boundary; an item
    /// already in flight runs to completion or failure.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clear the pause flag and restart the drive loop if items remain.
    pub async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);

        if self.running.swap(true, Ordering::SeqCst) {
            // An in-flight loop will simply keep going.
            return Ok(());
        }

        let has_work = {
            let state = self.state.lock().expect("batch state poisoned");
            state.cursor < state.items.len()
        };
        if has_work {
            self.drive().await;
        } else {
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Reset queue, cursor, and aggregate progress. Only permitted when idle.
    pub fn clear(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            anyhow::bail!("cannot clear while the batch is running");
        }

        *self.state.lock().expect("batch state poisoned") = BatchState::default();
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn items(&self) -> Vec<BatchItem> {
        self.state.lock().expect("batch state poisoned").items.clone()
    }

    /// Aggregate progress: terminal items over total, as a percentage.
    pub fn aggregate_progress(&self) -> f64 {
        self.state.lock().expect("batch state poisoned").aggregate
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn drive(&self) {
        loop {
            if self.paused.load(Ordering::SeqCst) {
                tracing::info!("batch paused at item boundary");
                break;
            }

            let next = {
                let state = self.state.lock().expect("batch state poisoned");
                if state.cursor >= state.items.len() {
                    None
                } else {
                    Some((state.cursor, state.items[state.cursor].clone()))
                }
            };
            let Some((index, mut item)) = next else { break };

            tracing::info!(item = %item.file_name, index, "processing batch item");

            if let Err(err) = self.process_item(index, &mut item).await {
                // Contained to this item; the batch keeps going.
                let message = format!("{:#}", err);
                tracing::warn!(item = %item.file_name, %message, "batch item failed");
                item.status = BatchItemStatus::Failed;
                item.error = Some(message.clone());
                self.notifier
                    .error(&format!("{} failed: {}", item.file_name, message));
            }

            let mut state = self.state.lock().expect("batch state poisoned");
            state.items[index] = item;
            state.cursor += 1;
            state.aggregate = (state.cursor as f64 / state.items.len() as f64) * 100.0;
        }

        self.running.store(false, Ordering::SeqCst);

        let finished_items = {
            let mut state = self.state.lock().expect("batch state poisoned");
            let finished = !state.items.is_empty()
                && state.cursor >= state.items.len()
                && !state.callback_fired;
            if finished {
                state.callback_fired = true;
                Some(state.items.clone())
            } else {
                None
            }
        };

        if let Some(items) = finished_items {
            let completed = items
                .iter()
                .filter(|i| i.status == BatchItemStatus::Completed)
                .count();
            self.notifier.success(&format!(
                "Batch complete: {}/{} items succeeded",
                completed,
                items.len()
            ));

            if let Some(callback) = self.on_complete.lock().expect("callback lock poisoned").as_ref()
            {
                callback(&items);
            }
        }
    }

    /// Four phases: analyze, N clip generations, finalize. Progress follows
    /// `25 + (i+1) * (70/N)` across the clip phase.
    async fn process_item(&self, index: usize, item: &mut BatchItem) -> Result<()> {
        item.status = BatchItemStatus::Processing;
        item.progress = 10;
        self.store_item(index, item);

        let profile = self.pipeline.analyze(&item.transcript).await?;
        item.language = Some(profile.language.clone());
        item.niche = Some(profile.niche.clone());
        item.progress = 25;
        self.store_item(index, item);

        for i in 0..self.clip_count {
            let clip = self.pipeline.generate_clip(&profile, i).await?;
            item.clips.push(clip);
            item.progress =
                (25.0 + (i + 1) as f64 * (70.0 / self.clip_count as f64)).round() as u8;
            self.store_item(index, item);
        }

        item.status = BatchItemStatus::Completed;
        item.progress = 100;
        self.store_item(index, item);
        Ok(())
    }

    fn store_item(&self, index: usize, item: &BatchItem) {
        let mut state = self.state.lock().expect("batch state poisoned");
        state.items[index] = item.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn scheduler(pipeline: Arc<dyn ClipPipeline>, clips: usize) -> Arc<BatchScheduler> {
        Arc::new(BatchScheduler::new(pipeline, Arc::new(NullSink), clips))
    }

    fn capture_completion(scheduler: &BatchScheduler) -> Arc<Mutex<Vec<Vec<BatchItem>>>> {
        let calls: Arc<Mutex<Vec<Vec<BatchItem>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        scheduler.set_on_complete(Box::new(move |items| {
            sink.lock().unwrap().push(items.to_vec());
        }));
        calls
    }

    /// Fails any item whose transcript contains the word "poison".
    struct PoisonPipeline;

    #[async_trait]
    impl ClipPipeline for PoisonPipeline {
        async fn analyze(&self, transcript: &str) -> Result<ContentProfile> {
            if transcript.contains("poison-analyze") {
                anyhow::bail!("analyze blew up");
            }
            Ok(ContentProfile {
                language: "en".to_string(),
                niche: "tech".to_string(),
            })
        }

        async fn generate_clip(
            &self,
            _profile: &ContentProfile,
            index: usize,
        ) -> Result<GeneratedClip> {
            Ok(GeneratedClip {
                title: format!("clip {}", index + 1),
                duration_secs: 42.0,
                hook: "hook".to_string(),
                engagement_score: 80.0,
            })
        }
    }

    /// Fails clip generation for poisoned transcripts instead.
    struct PoisonClipPipeline;

    #[async_trait]
    impl ClipPipeline for PoisonClipPipeline {
        async fn analyze(&self, transcript: &str) -> Result<ContentProfile> {
            Ok(ContentProfile {
                language: "en".to_string(),
                niche: if transcript.contains("poison") {
                    "poison".to_string()
                } else {
                    "tech".to_string()
                },
            })
        }

        async fn generate_clip(
            &self,
            profile: &ContentProfile,
            index: usize,
        ) -> Result<GeneratedClip> {
            if profile.niche == "poison" {
                anyhow::bail!("generation blew up");
            }
            Ok(GeneratedClip {
                title: format!("clip {}", index + 1),
                duration_secs: 35.0,
                hook: "hook".to_string(),
                engagement_score: 70.0,
            })
        }
    }

    /// Blocks once inside `analyze` until released, for pause-boundary tests.
    struct GatedPipeline {
        armed: AtomicBool,
        started: Notify,
        release: Notify,
    }

    impl GatedPipeline {
        fn new() -> Self {
            Self {
                armed: AtomicBool::new(true),
                started: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl ClipPipeline for GatedPipeline {
        async fn analyze(&self, _transcript: &str) -> Result<ContentProfile> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(ContentProfile {
                language: "en".to_string(),
                niche: "tech".to_string(),
            })
        }

        async fn generate_clip(
            &self,
            _profile: &ContentProfile,
            index: usize,
        ) -> Result<GeneratedClip> {
            Ok(GeneratedClip {
                title: format!("clip {}", index + 1),
                duration_secs: 31.0,
                hook: "hook".to_string(),
                engagement_score: 60.0,
            })
        }
    }

    #[tokio::test]
    async fn batch_of_three_generates_two_clips_each() {
        let scheduler = scheduler(Arc::new(ClipStudio::new()), 2);
        let calls = capture_completion(&scheduler);

        scheduler
            .enqueue(vec![
                BatchItem::new("a.mp4", "software and startup talk"),
                BatchItem::new("b.mp4", "protein and workout tips"),
                BatchItem::new("c.mp4", "a walk in the park"),
            ])
            .unwrap();
        scheduler.start().await.unwrap();

        let items = scheduler.items();
        assert_eq!(items.len(), 3);
        for item in &items {
            assert_eq!(item.status, BatchItemStatus::Completed);
            assert_eq!(item.progress, 100);
            assert_eq!(item.clips.len(), 2);
            for clip in &item.clips {
                assert!((30.0..60.0).contains(&clip.duration_secs));
            }
        }
        assert_eq!(scheduler.aggregate_progress(), 100.0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_failing_item_never_halts_the_batch() {
        let scheduler = scheduler(Arc::new(PoisonClipPipeline), 2);
        let calls = capture_completion(&scheduler);

        scheduler
            .enqueue(vec![
                BatchItem::new("ok1.mp4", "fine"),
                BatchItem::new("bad.mp4", "poison"),
                BatchItem::new("ok2.mp4", "fine"),
            ])
            .unwrap();
        scheduler.start().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let items = &calls[0];
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].status, BatchItemStatus::Completed);
        assert_eq!(items[1].status, BatchItemStatus::Failed);
        assert!(items[1].error.as_deref().unwrap().contains("generation blew up"));
        assert_eq!(items[2].status, BatchItemStatus::Completed);
        assert_eq!(scheduler.aggregate_progress(), 100.0);
    }

    #[tokio::test]
    async fn analyze_failure_is_contained_the_same_way() {
        let scheduler = scheduler(Arc::new(PoisonPipeline), 1);

        scheduler
            .enqueue(vec![
                BatchItem::new("bad.mp4", "poison-analyze"),
                BatchItem::new("ok.mp4", "fine"),
            ])
            .unwrap();
        scheduler.start().await.unwrap();

        let items = scheduler.items();
        assert_eq!(items[0].status, BatchItemStatus::Failed);
        assert_eq!(items[1].status, BatchItemStatus::Completed);
    }

    #[tokio::test]
    async fn pause_lets_the_inflight_item_finish_and_holds_the_cursor() {
        let pipeline = Arc::new(GatedPipeline::new());
        let scheduler = scheduler(pipeline.clone(), 1);
        let calls = capture_completion(&scheduler);

        scheduler
            .enqueue(vec![
                BatchItem::new("first.mp4", "one"),
                BatchItem::new("second.mp4", "two"),
            ])
            .unwrap();

        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        // Item 0 is now inside analyze; pause mid-flight.
        tokio::time::timeout(Duration::from_secs(2), pipeline.started.notified())
            .await
            .expect("first item should start");
        scheduler.pause();
        pipeline.release.notify_one();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should stop at the boundary")
            .unwrap()
            .unwrap();

        let items = scheduler.items();
        assert_eq!(items[0].status, BatchItemStatus::Completed);
        assert_eq!(items[1].status, BatchItemStatus::Pending);
        assert_eq!(scheduler.aggregate_progress(), 50.0);
        assert!(calls.lock().unwrap().is_empty());

        scheduler.resume().await.unwrap();

        let items = scheduler.items();
        assert_eq!(items[1].status, BatchItemStatus::Completed);
        assert_eq!(scheduler.aggregate_progress(), 100.0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_requires_items() {
        let scheduler = scheduler(Arc::new(ClipStudio::new()), 1);
        assert!(scheduler.start().await.is_err());
    }

    #[tokio::test]
    async fn clear_resets_queue_and_progress() {
        let scheduler = scheduler(Arc::new(PoisonPipeline), 1);
        scheduler
            .enqueue(vec![BatchItem::new("a.mp4", "fine")])
            .unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.aggregate_progress(), 100.0);

        scheduler.clear().unwrap();
        assert!(scheduler.items().is_empty());
        assert_eq!(scheduler.aggregate_progress(), 0.0);
    }

    #[tokio::test]
    async fn enqueue_between_runs_allows_a_second_run() {
        let scheduler = scheduler(Arc::new(PoisonPipeline), 1);
        let calls = capture_completion(&scheduler);

        scheduler
            .enqueue(vec![BatchItem::new("a.mp4", "fine")])
            .unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);

        scheduler
            .enqueue(vec![BatchItem::new("b.mp4", "fine")])
            .unwrap();
        scheduler.start().await.unwrap();

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(scheduler.items().len(), 2);
    }

    #[tokio::test]
    async fn item_progress_follows_the_clip_formula() {
        /// Records the clip index each generation call was made with.
        struct Recording {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl ClipPipeline for Recording {
            async fn analyze(&self, _transcript: &str) -> Result<ContentProfile> {
                Ok(ContentProfile {
                    language: "en".to_string(),
                    niche: "tech".to_string(),
                })
            }

            async fn generate_clip(
                &self,
                _profile: &ContentProfile,
                index: usize,
            ) -> Result<GeneratedClip> {
                assert_eq!(index, self.calls.fetch_add(1, Ordering::SeqCst));
                Ok(GeneratedClip {
                    title: format!("clip {}", index + 1),
                    duration_secs: 33.0,
                    hook: "hook".to_string(),
                    engagement_score: 65.0,
                })
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler(Arc::new(Recording { calls: calls.clone() }), 4);
        scheduler
            .enqueue(vec![BatchItem::new("a.mp4", "fine")])
            .unwrap();
        scheduler.start().await.unwrap();

        let item = &scheduler.items()[0];
        assert_eq!(item.progress, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let titles: Vec<_> = item.clips.iter().map(|c| c.title.clone()).collect();
        assert_eq!(titles, vec!["clip 1", "clip 2", "clip 3", "clip 4"]);
    }
}
