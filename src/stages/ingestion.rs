use std::sync::Arc;

use super::events::{EventSink, Outcome, Stage};
use crate::db::RequestStore;
use crate::error::PipelineError;
use crate::models::message::CaptionMessage;
use crate::models::request::RequestStatus;
use crate::services::{
    queue::CaptionQueue,
    storage::{BlobKey, BlobStore},
};

/// A photo handed over by the upload intake.
#[derive(Debug, Clone)]
pub struct Upload {
    pub email: String,
    pub photo: Vec<u8>,
    pub content_type: String,
}

/// Accepts uploads: record, photo blob, queue message.
///
/// The three writes span three systems, so they run as a saga: when a later
/// step fails, the earlier ones are undone before the error is returned. A
/// caller that gets an error therefore never leaves a `pending` record behind.
/// Errors go back to the caller; only acceptances and failed rollbacks are
/// emitted as events.
pub struct IngestionStage {
    store: Arc<dyn RequestStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn CaptionQueue>,
    events: EventSink,
    embed_photo: bool,
}

impl IngestionStage {
    pub fn new(
        store: Arc<dyn RequestStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn CaptionQueue>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            events,
            embed_photo: false,
        }
    }

    /// Carry the photo bytes inside the queue message as well as in the store.
    pub fn with_embedded_photo(mut self, embed: bool) -> Self {
        self.embed_photo = embed;
        self
    }

    /// Register an upload and return its request id.
    pub async fn register(&self, upload: &Upload) -> Result<i64, PipelineError> {
        let id = self.store.create(&upload.email).await?;
        let photo_key = BlobKey::photo(id);

        if let Err(e) = self
            .blobs
            .put(&photo_key, &upload.photo, &upload.content_type)
            .await
        {
            tracing::warn!(request_id = id, error = %e, "photo upload failed, rolling back");
            self.compensate(id, None).await;
            return Err(e.into());
        }

        let message = CaptionMessage::new(id, self.embed_photo.then_some(upload.photo.as_slice()));
        if let Err(e) = self.queue.publish(&message).await {
            tracing::warn!(request_id = id, error = %e, "queue publish failed, rolling back");
            self.compensate(id, Some(&photo_key)).await;
            return Err(e.into());
        }

        tracing::info!(request_id = id, photo_bytes = upload.photo.len(), "request accepted");
        self.events.emit(
            Stage::Ingestion,
            Some(id),
            Outcome::Advanced(RequestStatus::Pending),
        );
        Ok(id)
    }

    /// Undo the steps that already succeeded, newest first.
    async fn compensate(&self, id: i64, photo_key: Option<&BlobKey>) {
        if let Some(key) = photo_key {
            if let Err(e) = self.blobs.delete(key).await {
                self.events
                    .emit(Stage::Ingestion, Some(id), Outcome::Failed(e.into()));
            }
        }

        if let Err(e) = self.store.discard(id).await {
            self.events.emit(Stage::Ingestion, Some(id), Outcome::Failed(e));
        }
    }
}
