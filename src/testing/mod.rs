//! In-memory stand-ins for the store, object store, queue and external
//! capabilities. They follow the same contracts as the real clients so stage
//! logic can be exercised without PostgreSQL, Redis, S3 or HTTP.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::db::{rejected_transition, require_caption, RequestStore};
use crate::error::PipelineError;
use crate::models::message::CaptionMessage;
use crate::models::request::{Request, RequestStatus};
use crate::services::{
    captioning::Captioner,
    generation::ImageGenerator,
    http::ExternalError,
    notification::{Notification, Notifier},
    queue::{CaptionQueue, Delivery, QueueError},
    storage::{BlobKey, BlobStore, StorageError},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Rows {
    next_id: i64,
    rows: BTreeMap<i64, Request>,
}

/// [`RequestStore`] over a map, with a switch to simulate an outage.
pub struct MemoryRequestStore {
    rows: Mutex<Rows>,
    unavailable: AtomicBool,
}

impl Default for MemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Rows {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.rows).rows.is_empty()
    }

    pub fn count_with_status(&self, status: RequestStatus) -> usize {
        lock(&self.rows)
            .rows
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    fn check_available(&self) -> Result<(), PipelineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PipelineError::StoreUnavailable(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn transition(
        &self,
        id: i64,
        target: RequestStatus,
        apply: impl FnOnce(&mut Request),
        result_url: &str,
    ) -> Result<(), PipelineError> {
        self.check_available()?;
        let mut rows = lock(&self.rows);
        let request = rows.rows.get_mut(&id).ok_or(PipelineError::NotFound(id))?;

        if request.status.accepts(target) {
            request.status = target;
            request.updated_at = chrono::Utc::now();
            apply(request);
            Ok(())
        } else {
            rejected_transition(request, target, result_url)
        }
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, email: &str) -> Result<i64, PipelineError> {
        self.check_available()?;
        let mut rows = lock(&self.rows);
        let id = rows.next_id;
        rows.next_id += 1;

        let now = chrono::Utc::now();
        rows.rows.insert(
            id,
            Request {
                id,
                email: email.to_string(),
                status: RequestStatus::Pending,
                caption: String::new(),
                result_url: String::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Request, PipelineError> {
        self.check_available()?;
        lock(&self.rows)
            .rows
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }

    async fn mark_ready(&self, id: i64, caption: &str) -> Result<(), PipelineError> {
        require_caption(id, caption)?;
        self.transition(
            id,
            RequestStatus::Ready,
            |r| r.caption = caption.to_string(),
            "",
        )
    }

    async fn mark_completed(&self, id: i64, result_url: &str) -> Result<(), PipelineError> {
        self.transition(
            id,
            RequestStatus::Completed,
            |r| r.result_url = result_url.to_string(),
            result_url,
        )
    }

    async fn mark_failed(&self, id: i64) -> Result<(), PipelineError> {
        self.transition(id, RequestStatus::Failed, |r| r.result_url.clear(), "")
    }

    async fn list_ready(&self, limit: i64) -> Result<Vec<Request>, PipelineError> {
        self.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(lock(&self.rows)
            .rows
            .values()
            .filter(|r| r.status == RequestStatus::Ready)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn discard(&self, id: i64) -> Result<(), PipelineError> {
        self.check_available()?;
        let mut rows = lock(&self.rows);
        if rows
            .rows
            .get(&id)
            .is_some_and(|r| r.status == RequestStatus::Pending && r.caption.is_empty())
        {
            rows.rows.remove(&id);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        self.check_available()
    }
}

/// [`BlobStore`] over a map; URLs are `{base}/{key}`.
pub struct MemoryBlobStore {
    base: String,
    objects: Mutex<HashMap<BlobKey, (Vec<u8>, String)>>,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn object(&self, key: &BlobKey) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).map(|(data, _)| data.clone())
    }

    pub fn content_type(&self, key: &BlobKey) -> Option<String> {
        lock(&self.objects).get(key).map(|(_, ct)| ct.clone())
    }

    pub fn keys(&self) -> Vec<BlobKey> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        lock(&self.objects).insert(key.clone(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, StorageError> {
        self.object(key)
            .ok_or_else(|| StorageError::Missing(key.to_string()))
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), StorageError> {
        lock(&self.objects).remove(key);
        Ok(())
    }

    fn url_for(&self, key: &BlobKey) -> String {
        format!("{}/{}", self.base, key)
    }
}

/// FIFO [`CaptionQueue`] with an in-flight list, mirroring the Redis layout.
pub struct MemoryQueue {
    ready: Mutex<VecDeque<String>>,
    in_flight: Mutex<Vec<String>>,
    arrived: Notify,
    fail_publish: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
            arrived: Notify::new(),
            fail_publish: AtomicBool::new(false),
        }
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Enqueue a payload as-is, bypassing encoding.
    pub fn push_raw(&self, payload: &str) {
        lock(&self.ready).push_back(payload.to_string());
        self.arrived.notify_one();
    }

    /// Messages waiting to be received, oldest first.
    pub fn pending_messages(&self) -> Vec<CaptionMessage> {
        lock(&self.ready)
            .iter()
            .filter_map(|payload| CaptionMessage::decode(payload).ok())
            .collect()
    }

    pub fn in_flight_len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn take(&self) -> Option<Delivery> {
        let payload = lock(&self.ready).pop_front()?;
        lock(&self.in_flight).push(payload.clone());
        Some(Delivery { payload })
    }
}

#[async_trait]
impl CaptionQueue for MemoryQueue {
    async fn publish(&self, message: &CaptionMessage) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let payload = serde_json::to_string(message)?;
        self.push_raw(&payload);
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.take() {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified())
                .await
                .is_err()
            {
                return Ok(self.take());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut in_flight = lock(&self.in_flight);
        if let Some(pos) = in_flight.iter().position(|p| *p == delivery.payload) {
            in_flight.remove(pos);
        }
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let recovered: Vec<String> = lock(&self.in_flight).drain(..).collect();
        let count = recovered.len() as u64;
        for payload in recovered {
            self.push_raw(&payload);
        }
        Ok(count)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(lock(&self.ready).len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Captioner that returns a fixed caption (or fails when given none) and
/// records every photo it saw.
pub struct StaticCaptioner {
    caption: Option<String>,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl StaticCaptioner {
    pub fn new(caption: Option<&str>) -> Self {
        Self {
            caption: caption.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Vec<u8>> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl Captioner for StaticCaptioner {
    async fn caption(&self, photo: &[u8]) -> Result<String, ExternalError> {
        lock(&self.seen).push(photo.to_vec());
        self.caption.clone().ok_or(ExternalError::Empty("captioning"))
    }
}

/// Generator returning a fixed image, failing for one chosen caption, with an
/// optional artificial latency.
pub struct ScriptedGenerator {
    image: Vec<u8>,
    fail_on: Option<String>,
    latency: Duration,
}

impl ScriptedGenerator {
    pub fn always(image: &[u8]) -> Self {
        Self {
            image: image.to_vec(),
            fail_on: None,
            latency: Duration::ZERO,
        }
    }

    pub fn failing_on(caption: &str, image: &[u8]) -> Self {
        Self {
            fail_on: Some(caption.to_string()),
            ..Self::always(image)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, caption: &str) -> Result<Vec<u8>, ExternalError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_on.as_deref() == Some(caption) {
            return Err(ExternalError::Status {
                capability: "generation",
                status: 400,
                body: "rejected".to_string(),
            });
        }
        Ok(self.image.clone())
    }
}

/// Notifier that keeps every notification it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ExternalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExternalError::Status {
                capability: "notification",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}
