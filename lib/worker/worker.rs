use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use super::error::WorkerError;
use super::handler::RequestHandler;
use super::retry::{remaining_backoff, RetryPolicy};
use crate::queue::{PersistentQueue, QueueError, QueuedRequest};
use crate::server::monitoring::QUEUE_METRICS;

/// Runs a queue operation on the blocking thread pool.
pub(super) async fn run_blocking<T, F>(
    queue: &Arc<PersistentQueue>,
    op: F,
) -> Result<T, WorkerError>
where
    T: Send + 'static,
    F: FnOnce(&PersistentQueue) -> Result<T, QueueError> + Send + 'static,
{
    let queue = Arc::clone(queue);
    tokio::task::spawn_blocking(move || op(&queue))
        .await
        .map_err(|err| WorkerError::JoinError(err.to_string()))?
        .map_err(WorkerError::from)
}

/// Consumes requests until the queue stops handing them out or shutdown is requested.
///
/// A request taken before shutdown is still handled, retried, or handed back; the pool only
/// closes the queue after every worker has returned.
pub(super) async fn worker(
    worker_idx: usize,
    queue: Arc<PersistentQueue>,
    handler: Arc<dyn RequestHandler>,
    retry_policy: RetryPolicy,
    cancel_token: CancellationToken,
) -> Result<(), WorkerError> {
    loop {
        if cancel_token.is_cancelled() {
            info!("Worker {} stopping: shutdown requested", worker_idx);
            return Ok(());
        }

        let request = match run_blocking(&queue, |q| q.dequeue_block()).await {
            Ok(request) => request,
            Err(WorkerError::Queue(QueueError::Closed)) => {
                info!("Worker {} stopping: queue [{}] closed", worker_idx, queue.name());
                return Ok(());
            }
            Err(WorkerError::Queue(err @ QueueError::Deserialization { .. })) => {
                error!("Worker {} skipped unreadable queue record: {}", worker_idx, err);
                if let Some(metrics) = QUEUE_METRICS.get() {
                    metrics.corrupt_records.inc();
                }
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(metrics) = QUEUE_METRICS.get() {
            metrics.queue_depth.set(queue.len() as i64);
        }

        let wait = remaining_backoff(
            &retry_policy,
            request.retry_count,
            request.dequeue_time,
            Utc::now(),
        );
        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_token.cancelled() => {
                    info!(
                        "Worker {} handing back {} {} before shutdown",
                        worker_idx, request.payload.method, request.payload.uri
                    );
                    run_blocking(&queue, move |q| q.restore(&request)).await?;
                    return Ok(());
                }
            }
        }

        process(worker_idx, &queue, handler.as_ref(), &retry_policy, request).await?;
    }
}

async fn process(
    worker_idx: usize,
    queue: &Arc<PersistentQueue>,
    handler: &dyn RequestHandler,
    retry_policy: &RetryPolicy,
    request: QueuedRequest,
) -> Result<(), WorkerError> {
    let err = match handler.handle(&request.payload).await {
        Ok(()) => {
            if let Some(metrics) = QUEUE_METRICS.get() {
                metrics.processed.inc();
            }
            return Ok(());
        }
        Err(err) => err,
    };

    if let Some(metrics) = QUEUE_METRICS.get() {
        metrics.failed.inc();
    }
    let attempts = request.retry_count.saturating_add(1);
    if !retry_policy.allows_retry(request.retry_count) {
        error!(
            "Worker {} dropping {} {} after {} attempts: {}",
            worker_idx, request.payload.method, request.payload.uri, attempts, err
        );
        record_dead_letter();
        return Ok(());
    }

    warn!(
        "Worker {} attempt {} of {} {} failed, re-enqueueing: {}",
        worker_idx, attempts, request.payload.method, request.payload.uri, err
    );
    let method = request.payload.method.clone();
    let uri = request.payload.uri.clone();
    match run_blocking(queue, move |q| q.retry(request.next_attempt())).await {
        Ok(()) => {
            if let Some(metrics) = QUEUE_METRICS.get() {
                metrics.retried.inc();
            }
            Ok(())
        }
        Err(WorkerError::Queue(QueueError::Closed)) => {
            error!(
                "Worker {} dropping {} {}: queue closed before it could be retried",
                worker_idx, method, uri
            );
            record_dead_letter();
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn record_dead_letter() {
    if let Some(metrics) = QUEUE_METRICS.get() {
        metrics.dead_lettered.inc();
    }
}
