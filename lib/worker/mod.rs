//! Consumers of the request queue.
//!
//! Each worker blocks on [`PersistentQueue::dequeue_block`](crate::queue::PersistentQueue)
//! from the blocking thread pool, waits out the backoff of retried requests, and hands the
//! payload to a [`RequestHandler`]. Failed requests go back on the queue with a bumped retry
//! count until the [`RetryPolicy`] gives up on them.

mod error;
mod handler;
mod pool;
mod retry;
#[allow(clippy::module_inception)]
mod worker;

#[cfg(test)]
mod test_support;

pub use error::{ShutdownError, WorkerError};
pub use handler::{HandlerError, JsonLinesHandler, RequestHandler};
pub use pool::WorkerPool;
pub use retry::{compute_backoff_delay, remaining_backoff, RetryPolicy};
