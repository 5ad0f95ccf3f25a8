use crate::models::request::RequestStatus;
use crate::services::{http::ExternalError, queue::QueueError, storage::StorageError};

/// Everything that can go wrong while moving a request through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("request {0} not found")]
    NotFound(i64),

    #[error("request store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("request {0} cannot be marked ready without a caption")]
    EmptyCaption(i64),

    #[error("object store unavailable: {0}")]
    BlobUnavailable(#[from] StorageError),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),

    #[error("external call failed: {0}")]
    ExternalCallFailed(#[from] ExternalError),

    #[error("malformed queue message: {0}")]
    MalformedMessage(String),
}

impl PipelineError {
    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::EmptyCaption(_) => "empty_caption",
            Self::BlobUnavailable(_) => "blob_unavailable",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::ExternalCallFailed(_) => "external_call_failed",
            Self::MalformedMessage(_) => "malformed_message",
        }
    }
}
