use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use super::{rejected_transition, require_caption, RequestStore};
use crate::error::PipelineError;
use crate::models::request::{Request, RequestStatus};

const REQUEST_COLUMNS: &str = "id, email, status, caption, result_url, created_at, updated_at";

/// [`RequestStore`] backed by the `requests` table.
#[derive(Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve an update that matched no row into `NotFound`, a no-op, or an
    /// illegal transition.
    async fn resolve_rejected(
        &self,
        id: i64,
        target: RequestStatus,
        result_url: &str,
    ) -> Result<(), PipelineError> {
        let current = self.get(id).await?;
        rejected_transition(&current, target, result_url)
    }
}

fn request_from_row(row: &PgRow) -> Result<Request, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = RequestStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(Request {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        status,
        caption: row.try_get("caption")?,
        result_url: row.try_get("result_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn create(&self, email: &str) -> Result<i64, PipelineError> {
        let row = sqlx::query(
            r#"
            INSERT INTO requests (email, status, caption, result_url)
            VALUES ($1, 'pending', '', '')
            RETURNING id
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn get(&self, id: i64) -> Result<Request, PipelineError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(request_from_row(&row)?),
            None => Err(PipelineError::NotFound(id)),
        }
    }

    async fn mark_ready(&self, id: i64, caption: &str) -> Result<(), PipelineError> {
        require_caption(id, caption)?;

        let updated = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'ready', caption = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'ready')
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(caption)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => Ok(()),
            None => self.resolve_rejected(id, RequestStatus::Ready, "").await,
        }
    }

    async fn mark_completed(&self, id: i64, result_url: &str) -> Result<(), PipelineError> {
        let updated = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'completed', result_url = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'ready'
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(result_url)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => Ok(()),
            None => {
                self.resolve_rejected(id, RequestStatus::Completed, result_url)
                    .await
            }
        }
    }

    async fn mark_failed(&self, id: i64) -> Result<(), PipelineError> {
        let updated = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'failed', result_url = '', updated_at = NOW()
            WHERE id = $1 AND status = 'ready'
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => Ok(()),
            None => self.resolve_rejected(id, RequestStatus::Failed, "").await,
        }
    }

    async fn list_ready(&self, limit: i64) -> Result<Vec<Request>, PipelineError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = 'ready' ORDER BY id ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| request_from_row(row).map_err(PipelineError::from))
            .collect()
    }

    async fn discard(&self, id: i64) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM requests WHERE id = $1 AND status = 'pending' AND caption = ''")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
