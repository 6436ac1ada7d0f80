use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::durable::DurableQueue;
use super::error::QueueError;

/// Number of queued requests stored per segment file.
pub const REQUESTS_PER_PERSISTED_FILE: usize = 2000;

/// Serializable form of an incoming HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl IncomingRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Envelope stored in the request queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub payload: IncomingRequest,
    /// Number of earlier processing attempts.
    pub retry_count: u32,
    /// When the envelope last entered the queue.
    pub dequeue_time: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn new(payload: IncomingRequest) -> Self {
        Self {
            payload,
            retry_count: 0,
            dequeue_time: Utc::now(),
        }
    }

    /// Consumes the envelope and returns it with the retry count bumped, ready for
    /// [`PersistentQueue::retry`].
    pub fn next_attempt(mut self) -> Self {
        self.retry_count = self.retry_count.saturating_add(1);
        self
    }
}

/// Disk-backed queue of HTTP requests awaiting processing.
pub struct PersistentQueue {
    queue: DurableQueue<QueuedRequest>,
}

impl PersistentQueue {
    pub fn open(queue_name: &str, fallback_dir: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::open_with_capacity(queue_name, fallback_dir, REQUESTS_PER_PERSISTED_FILE)
    }

    pub fn open_with_capacity(
        queue_name: &str,
        fallback_dir: impl AsRef<Path>,
        segment_capacity: usize,
    ) -> Result<Self, QueueError> {
        let queue = DurableQueue::open(queue_name, fallback_dir, segment_capacity).map_err(
            |err| match err {
                QueueError::Init { path, reason } => QueueError::Init {
                    path,
                    reason: format!("HTTP requests queue [{queue_name}]: {reason}"),
                },
                other => other,
            },
        )?;
        Ok(Self { queue })
    }

    /// Wraps `payload` in a fresh envelope and appends it.
    pub fn add(&self, payload: IncomingRequest) -> Result<(), QueueError> {
        self.queue.enqueue(&QueuedRequest::new(payload))
    }

    /// Re-appends an envelope whose retry count the caller has already incremented.
    pub fn retry(&self, mut request: QueuedRequest) -> Result<(), QueueError> {
        request.dequeue_time = Utc::now();
        self.queue.enqueue(&request)
    }

    /// Appends an envelope exactly as it was dequeued, keeping its retry count and timestamp.
    ///
    /// Used to hand back work that was taken but never attempted.
    pub fn restore(&self, request: &QueuedRequest) -> Result<(), QueueError> {
        self.queue.enqueue(request)
    }

    /// Blocks the calling thread until a request is available or the queue is closed.
    pub fn dequeue_block(&self) -> Result<QueuedRequest, QueueError> {
        self.queue.dequeue_block()
    }

    /// Wakes blocked workers with [`QueueError::Closed`]; `retry` and `restore` keep working.
    pub fn stop_consumers(&self) {
        self.queue.stop_consumers()
    }

    pub fn close(&self) -> Result<(), QueueError> {
        self.queue.close()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.queue.segment_count()
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
