use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{ShutdownError, WorkerError};
use super::handler::RequestHandler;
use super::retry::RetryPolicy;
use super::worker::{run_blocking, worker};
use crate::queue::{PersistentQueue, QueueError};
use crate::server::monitoring::QUEUE_METRICS;

pub struct WorkerPool {
    queue: Arc<PersistentQueue>,
    workers: Vec<JoinHandle<Result<(), WorkerError>>>,
    supervisor: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `num_workers` consumers of `queue`.
    ///
    /// Cancelling `cancellation_token` stops the queue from handing out requests while still
    /// accepting retries. `wait_for_completion` closes it once every worker has returned.
    pub fn new(
        num_workers: usize,
        queue: Arc<PersistentQueue>,
        handler: Arc<dyn RequestHandler>,
        retry_policy: RetryPolicy,
        cancellation_token: CancellationToken,
    ) -> Self {
        let workers = (0..num_workers)
            .map(|worker_idx| {
                tokio::spawn(worker(
                    worker_idx,
                    Arc::clone(&queue),
                    Arc::clone(&handler),
                    retry_policy,
                    cancellation_token.clone(),
                ))
            })
            .collect();
        let supervisor = tokio::spawn(stop_on_cancel(
            Arc::clone(&queue),
            cancellation_token.clone(),
        ));

        if let Some(metrics) = QUEUE_METRICS.get() {
            metrics.workers_alive.set(num_workers as i64);
        }
        Self {
            queue,
            workers,
            supervisor,
            cancellation_token,
        }
    }

    pub async fn wait_for_completion(self) -> Result<(), ShutdownError> {
        let mut errors = vec![];
        for handle in self.workers {
            match handle.await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(WorkerError::JoinError(e.to_string())),
            }
        }
        self.supervisor.abort();

        if let Some(metrics) = QUEUE_METRICS.get() {
            metrics.workers_alive.set(0);
        }

        if self.cancellation_token.is_cancelled() {
            info!("Workers finished, closing queue [{}]", self.queue.name());
            match run_blocking(&self.queue, |q| q.close()).await {
                Ok(()) | Err(WorkerError::Queue(QueueError::Closed)) => {}
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { errors })
        }
    }
}

async fn stop_on_cancel(queue: Arc<PersistentQueue>, cancellation_token: CancellationToken) {
    cancellation_token.cancelled().await;
    info!("Shutdown requested, stopping consumers of queue [{}]", queue.name());
    queue.stop_consumers();
}
