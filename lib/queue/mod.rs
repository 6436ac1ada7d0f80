//! Disk-backed FIFO queues.
//!
//! [`DurableQueue`] is generic over the envelope it stores and knows nothing about requests;
//! [`PersistentQueue`] is the HTTP request queue built on top of it.

mod durable;
mod error;
mod request;
mod segment;

pub use durable::{DurableQueue, DEFAULT_SEGMENT_CAPACITY};
pub use error::QueueError;
pub use request::{IncomingRequest, PersistentQueue, QueuedRequest, REQUESTS_PER_PERSISTED_FILE};
