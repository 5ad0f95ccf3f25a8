use std::sync::Arc;

use crate::db::RequestStore;
use crate::services::queue::CaptionQueue;
use crate::stages::ingestion::IngestionStage;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RequestStore>,
    pub queue: Arc<dyn CaptionQueue>,
    pub ingestion: Arc<IngestionStage>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RequestStore>,
        queue: Arc<dyn CaptionQueue>,
        ingestion: IngestionStage,
    ) -> Self {
        Self {
            store,
            queue,
            ingestion: Arc::new(ingestion),
        }
    }
}
