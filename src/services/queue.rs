use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::message::CaptionMessage;

const QUEUE_KEY: &str = "caption_pipeline:captions";
const PROCESSING_KEY: &str = "caption_pipeline:processing";

/// A payload taken off the queue but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
}

/// Point-to-point channel carrying "photo ready to caption" messages.
#[async_trait]
pub trait CaptionQueue: Send + Sync {
    async fn publish(&self, message: &CaptionMessage) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next delivery.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Drop a delivery for good, whatever its outcome.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return unacknowledged deliveries from a previous run to the queue.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Redis-list-backed queue with a processing list for in-flight messages.
pub struct RedisCaptionQueue {
    client: redis::Client,
}

impl RedisCaptionQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl CaptionQueue for RedisCaptionQueue {
    async fn publish(&self, message: &CaptionMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // Blocking commands hold the connection, so each receive gets its own.
        let mut conn = self.connection().await?;
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(PROCESSING_KEY, QUEUE_KEY)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                return Ok(recovered);
            }
            recovered += 1;
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue closed")]
    Closed,
}
