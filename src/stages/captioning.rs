use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, Outcome, Stage};
use crate::db::RequestStore;
use crate::error::PipelineError;
use crate::models::message::CaptionMessage;
use crate::models::request::RequestStatus;
use crate::services::{
    captioning::Captioner,
    queue::{CaptionQueue, Delivery},
    storage::{BlobKey, BlobStore},
};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Drains the caption queue and moves requests from `pending` to `ready`.
///
/// Every delivery is acknowledged exactly once, whether or not captioning
/// worked. A failed request stays `pending`; the failure is reported on the
/// event channel.
pub struct CaptioningStage {
    store: Arc<dyn RequestStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn CaptionQueue>,
    captioner: Arc<dyn Captioner>,
    events: EventSink,
    workers: usize,
    poll: Duration,
}

impl CaptioningStage {
    pub fn new(
        store: Arc<dyn RequestStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn CaptionQueue>,
        captioner: Arc<dyn Captioner>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            captioner,
            events,
            workers: 1,
            poll: Duration::from_secs(5),
        }
    }

    /// Handle up to `workers` deliveries at once (1 keeps it sequential).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// How long a single receive waits for a message before re-checking shutdown.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Consume until `cancel` fires, then wait for in-flight deliveries.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        match self.queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(recovered, "requeued unacknowledged deliveries from a previous run")
            }
            Err(e) => self
                .events
                .emit(Stage::Captioning, None, Outcome::Failed(e.into())),
        }

        tracing::info!(workers = self.workers, "caption consumer started");

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                log_join_error(finished);
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(self.poll) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let stage = self.clone();
                    in_flight.spawn(async move {
                        stage.handle(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => tracing::trace!("no caption requests waiting"),
                Err(e) => {
                    self.events
                        .emit(Stage::Captioning, None, Outcome::Failed(e.into()));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "caption consumer stopping");
        while let Some(finished) = in_flight.join_next().await {
            log_join_error(finished);
        }
    }

    /// Process one delivery end to end and acknowledge it.
    pub async fn handle(&self, delivery: Delivery) {
        let started = Instant::now();

        let (request_id, outcome) = match CaptionMessage::decode(&delivery.payload) {
            Ok(message) => (
                Some(message.request_id),
                self.caption_request(&message)
                    .await
                    .unwrap_or_else(Outcome::Failed),
            ),
            Err(e) => (None, Outcome::Failed(e)),
        };

        if let Err(e) = self.queue.ack(&delivery).await {
            self.events
                .emit(Stage::Captioning, request_id, Outcome::Failed(e.into()));
        }

        metrics::histogram!("caption_processing_seconds").record(started.elapsed().as_secs_f64());
        self.events.emit(Stage::Captioning, request_id, outcome);
    }

    async fn caption_request(&self, message: &CaptionMessage) -> Result<Outcome, PipelineError> {
        let id = message.request_id;

        let request = self.store.get(id).await?;
        if request.status != RequestStatus::Pending {
            tracing::debug!(request_id = id, status = %request.status, "already captioned, skipping");
            return Ok(Outcome::Superseded);
        }

        let photo = match message.photo_bytes()? {
            Some(photo) => photo,
            None => self.blobs.get(&BlobKey::photo(id)).await?,
        };

        let caption = self.captioner.caption(&photo).await?;
        tracing::debug!(request_id = id, caption = %caption, "caption generated");

        self.store.mark_ready(id, &caption).await?;
        Ok(Outcome::Advanced(RequestStatus::Ready))
    }
}

fn log_join_error(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "caption handler task aborted");
    }
}
