use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::request::{Request, RequestStatus};

pub mod queries;

pub use queries::PgRequestStore;

/// Source of truth for pipeline state: one row per request.
///
/// Transitions only move forward. `mark_completed` and `mark_failed` only
/// succeed from `ready`, so two workers racing on the same record can never
/// both land it in a terminal state; the loser gets
/// [`PipelineError::InvalidTransition`]. Repeating a terminal transition with
/// identical arguments is a successful no-op.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, email: &str) -> Result<i64, PipelineError>;

    async fn get(&self, id: i64) -> Result<Request, PipelineError>;

    /// Fails with [`PipelineError::EmptyCaption`] for a blank caption.
    async fn mark_ready(&self, id: i64, caption: &str) -> Result<(), PipelineError>;

    async fn mark_completed(&self, id: i64, result_url: &str) -> Result<(), PipelineError>;

    async fn mark_failed(&self, id: i64) -> Result<(), PipelineError>;

    /// Up to `limit` ready records, oldest first.
    async fn list_ready(&self, limit: i64) -> Result<Vec<Request>, PipelineError>;

    /// Remove a record that never left `pending`. Only ingestion calls this,
    /// to roll back a request the caller was told had failed.
    async fn discard(&self, id: i64) -> Result<(), PipelineError>;

    async fn ping(&self) -> Result<(), PipelineError>;
}

/// Outcome of a transition that did not apply: either the record is already
/// where the caller wants it, or the move is illegal from its current state.
pub(crate) fn rejected_transition(
    current: &Request,
    target: RequestStatus,
    result_url: &str,
) -> Result<(), PipelineError> {
    if current.already_in(target, result_url) {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition {
            id: current.id,
            from: current.status,
            to: target,
        })
    }
}

/// A record only becomes `ready` with something for the generator to draw.
pub(crate) fn require_caption(id: i64, caption: &str) -> Result<(), PipelineError> {
    if caption.trim().is_empty() {
        Err(PipelineError::EmptyCaption(id))
    } else {
        Ok(())
    }
}

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
