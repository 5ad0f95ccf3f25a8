use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, Outcome, Stage};
use super::scheduler::{PeriodicRunner, RunnerStats};
use crate::db::RequestStore;
use crate::error::PipelineError;
use crate::models::request::{Request, RequestStatus};
use crate::services::{
    generation::ImageGenerator,
    notification::{Notification, Notifier},
    storage::{BlobKey, BlobStore},
};

pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// What happened to the records selected by one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub superseded: usize,
    /// Left `ready` after a transient error; picked up again next cycle.
    pub retried: usize,
}

enum RecordResult {
    Completed,
    Failed,
    Superseded,
    Retry,
}

/// Polls for `ready` requests and turns their captions into images.
pub struct GenerationStage {
    store: Arc<dyn RequestStore>,
    blobs: Arc<dyn BlobStore>,
    generator: Arc<dyn ImageGenerator>,
    notifier: Arc<dyn Notifier>,
    events: EventSink,
    batch_size: i64,
    concurrency: usize,
}

impl GenerationStage {
    pub fn new(
        store: Arc<dyn RequestStore>,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn ImageGenerator>,
        notifier: Arc<dyn Notifier>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            blobs,
            generator,
            notifier,
            events,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Process up to `concurrency` records of a batch at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run cycles on `runner` until `cancel` fires.
    pub async fn run(self: Arc<Self>, runner: PeriodicRunner, cancel: CancellationToken) -> RunnerStats {
        runner
            .with_events(Stage::Generation, self.events.clone())
            .run(cancel, || {
                let stage = self.clone();
                async move { stage.run_cycle().await.map(|_| ()) }
            })
            .await
    }

    /// One scan: fetch a batch of ready requests and process each independently.
    pub async fn run_cycle(&self) -> Result<CycleSummary, PipelineError> {
        let ready = self.store.list_ready(self.batch_size).await?;
        let mut summary = CycleSummary {
            selected: ready.len(),
            ..CycleSummary::default()
        };
        if ready.is_empty() {
            return Ok(summary);
        }

        let results: Vec<RecordResult> = stream::iter(ready)
            .map(|request| self.process(request))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                RecordResult::Completed => summary.completed += 1,
                RecordResult::Failed => summary.failed += 1,
                RecordResult::Superseded => summary.superseded += 1,
                RecordResult::Retry => summary.retried += 1,
            }
        }

        tracing::info!(
            selected = summary.selected,
            completed = summary.completed,
            failed = summary.failed,
            superseded = summary.superseded,
            retried = summary.retried,
            "generation cycle finished"
        );
        Ok(summary)
    }

    async fn process(&self, request: Request) -> RecordResult {
        let started = Instant::now();
        let result = self.generate_and_store(&request).await;
        metrics::histogram!("generation_processing_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn generate_and_store(&self, request: &Request) -> RecordResult {
        let id = request.id;

        let image = match self.generator.generate(&request.caption).await {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(request_id = id, error = %e, "image generation failed");
                self.emit(id, Outcome::Failed(e.into()));
                return match self.store.mark_failed(id).await {
                    Ok(()) => {
                        self.emit(id, Outcome::Advanced(RequestStatus::Failed));
                        RecordResult::Failed
                    }
                    Err(PipelineError::InvalidTransition { .. }) => {
                        self.emit(id, Outcome::Superseded);
                        RecordResult::Superseded
                    }
                    Err(e) => {
                        self.emit(id, Outcome::Failed(e));
                        RecordResult::Retry
                    }
                };
            }
        };

        let key = BlobKey::result(id, Utc::now());
        if let Err(e) = self.blobs.put(&key, &image, content_type_of(&image)).await {
            self.emit(id, Outcome::Failed(e.into()));
            return RecordResult::Retry;
        }

        let result_url = self.blobs.url_for(&key);
        match self.store.mark_completed(id, &result_url).await {
            Ok(()) => {}
            Err(PipelineError::InvalidTransition { from, .. }) => {
                tracing::info!(request_id = id, status = %from, "request finished elsewhere, discarding result");
                if let Err(e) = self.blobs.delete(&key).await {
                    self.emit(id, Outcome::Failed(e.into()));
                }
                self.emit(id, Outcome::Superseded);
                return RecordResult::Superseded;
            }
            Err(e) => {
                // The update may still have landed, so the blob stays.
                self.emit(id, Outcome::Failed(e));
                return RecordResult::Retry;
            }
        }

        let notification = Notification::image_generated(&request.email, &result_url);
        if let Err(e) = self.notifier.notify(&notification).await {
            self.emit(id, Outcome::NotificationFailed(e.into()));
        }

        tracing::info!(request_id = id, result_url = %result_url, "request completed");
        self.emit(id, Outcome::Advanced(RequestStatus::Completed));
        RecordResult::Completed
    }

    fn emit(&self, id: i64, outcome: Outcome) {
        self.events.emit(Stage::Generation, Some(id), outcome);
    }
}

fn content_type_of(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::events::StageEvent;
    use crate::testing::{
        MemoryBlobStore, MemoryRequestStore, RecordingNotifier, ScriptedGenerator,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n....";

    struct Harness {
        store: Arc<MemoryRequestStore>,
        blobs: Arc<MemoryBlobStore>,
        notifier: Arc<RecordingNotifier>,
        rx: UnboundedReceiver<StageEvent>,
        stage: GenerationStage,
    }

    fn harness(generator: ScriptedGenerator) -> Harness {
        let store = Arc::new(MemoryRequestStore::new());
        let blobs = Arc::new(MemoryBlobStore::new("https://store/bucket"));
        let notifier = Arc::new(RecordingNotifier::new());
        let (events, rx) = EventSink::channel();
        let stage = GenerationStage::new(
            store.clone(),
            blobs.clone(),
            Arc::new(generator),
            notifier.clone(),
            events,
        )
        .with_concurrency(4);
        Harness {
            store,
            blobs,
            notifier,
            rx,
            stage,
        }
    }

    async fn ready(h: &Harness, email: &str, caption: &str) -> i64 {
        let id = h.store.create(email).await.unwrap();
        h.store.mark_ready(id, caption).await.unwrap();
        id
    }

    fn drain(rx: &mut UnboundedReceiver<StageEvent>) -> Vec<StageEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn success_stores_image_completes_and_notifies() {
        let mut h = harness(ScriptedGenerator::always(PNG_MAGIC));
        let id = ready(&h, "a@x.com", "a dog on a beach").await;

        let summary = h.stage.run_cycle().await.unwrap();
        assert_eq!(summary, CycleSummary { selected: 1, completed: 1, ..Default::default() });

        let request = h.store.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.result_url.starts_with(&format!("https://store/bucket/result/{id}/")));

        let keys = h.blobs.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(h.blobs.content_type(&keys[0]).as_deref(), Some("image/png"));
        assert_eq!(request.result_url, h.blobs.url_for(&keys[0]));

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert!(sent[0].text.contains(&request.result_url));

        let events = drain(&mut h.rx);
        assert!(matches!(
            events.last().map(|e| &e.outcome),
            Some(Outcome::Advanced(RequestStatus::Completed))
        ));
    }

    #[tokio::test]
    async fn generation_error_marks_failed_without_notifying() {
        let mut h = harness(ScriptedGenerator::failing_on("forbidden", PNG_MAGIC));
        let ok = ready(&h, "a@x.com", "a dog").await;
        let bad = ready(&h, "b@x.com", "forbidden").await;

        let summary = h.stage.run_cycle().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);

        let failed = h.store.get(bad).await.unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert_eq!(failed.result_url, "");
        assert_eq!(h.store.get(ok).await.unwrap().status, RequestStatus::Completed);
        assert_eq!(h.notifier.sent().len(), 1);

        let kinds: Vec<_> = drain(&mut h.rx)
            .into_iter()
            .filter(|e| e.request_id == Some(bad))
            .map(|e| e.outcome.label())
            .collect();
        assert_eq!(kinds, vec!["error", "failed"]);
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_completion() {
        let mut h = harness(ScriptedGenerator::always(PNG_MAGIC));
        h.notifier.fail(true);
        let id = ready(&h, "a@x.com", "a dog").await;

        let summary = h.stage.run_cycle().await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(h.store.get(id).await.unwrap().status, RequestStatus::Completed);
        assert!(drain(&mut h.rx)
            .iter()
            .any(|e| matches!(e.outcome, Outcome::NotificationFailed(_))));
    }

    #[tokio::test]
    async fn upload_failure_leaves_request_ready_for_next_cycle() {
        let h = harness(ScriptedGenerator::always(PNG_MAGIC));
        let id = ready(&h, "a@x.com", "a dog").await;
        h.blobs.fail_puts(true);

        let summary = h.stage.run_cycle().await.unwrap();
        assert_eq!(summary.retried, 1);
        assert_eq!(h.store.get(id).await.unwrap().status, RequestStatus::Ready);

        h.blobs.fail_puts(false);
        let summary = h.stage.run_cycle().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(h.store.get(id).await.unwrap().status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn store_outage_fails_the_whole_cycle() {
        let h = harness(ScriptedGenerator::always(PNG_MAGIC));
        ready(&h, "a@x.com", "a dog").await;
        h.store.set_unavailable(true);

        let err = h.stage.run_cycle().await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn losing_a_race_discards_the_uploaded_result() {
        let h = harness(ScriptedGenerator::always(PNG_MAGIC));
        let id = ready(&h, "a@x.com", "a dog").await;
        let request = h.store.get(id).await.unwrap();
        // Another generator finishes the request between selection and completion.
        h.store.mark_completed(id, "https://store/bucket/elsewhere").await.unwrap();

        let result = h.stage.generate_and_store(&request).await;

        assert!(matches!(result, RecordResult::Superseded));
        assert_eq!(h.blobs.len(), 0);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(
            h.store.get(id).await.unwrap().result_url,
            "https://store/bucket/elsewhere"
        );
    }

    #[tokio::test]
    async fn batch_size_bounds_each_cycle() {
        let h = harness(ScriptedGenerator::always(PNG_MAGIC));
        for i in 0..5 {
            ready(&h, &format!("{i}@x.com"), "a dog").await;
        }
        let stage = h.stage.with_batch_size(2);

        assert_eq!(stage.run_cycle().await.unwrap().completed, 2);
        assert_eq!(stage.run_cycle().await.unwrap().completed, 2);
        assert_eq!(stage.run_cycle().await.unwrap().completed, 1);
        assert_eq!(stage.run_cycle().await.unwrap().selected, 0);
    }

    #[test]
    fn content_type_follows_image_magic() {
        assert_eq!(content_type_of(PNG_MAGIC), "image/png");
        assert_eq!(content_type_of(b"\xff\xd8\xff\xe0rest"), "image/jpeg");
        assert_eq!(content_type_of(b"plain"), "application/octet-stream");
    }
}
