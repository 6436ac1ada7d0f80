use crate::{
    cli::DrainArgs,
    config::Config,
    logging::format_error_report,
    queue::{IncomingRequest, PersistentQueue, QueueError},
    server::{monitoring::QUEUE_METRICS, setup_server_with_addr},
    state::AppState,
    worker::{JsonLinesHandler, RetryPolicy, WorkerPool},
};
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("line {line}: not a valid request: {source}")]
    InvalidRequest {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts reported by `stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub segments: usize,
}

pub fn open_queue(config: &Config) -> Result<PersistentQueue, QueueError> {
    PersistentQueue::open(&config.queue_name, &config.queue_dir)
}

/// Adds one request per non-blank input line and returns how many were added.
///
/// Stops at the first malformed line; everything before it stays queued.
pub fn enqueue_lines(queue: &PersistentQueue, input: impl BufRead) -> Result<usize, CommandError> {
    let mut added = 0usize;
    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: IncomingRequest = serde_json::from_str(&line)
            .map_err(|source| CommandError::InvalidRequest {
                line: idx + 1,
                source,
            })?;
        queue.add(request)?;
        added += 1;
    }
    Ok(added)
}

pub fn queue_stats(queue: &PersistentQueue) -> QueueStats {
    QueueStats {
        len: queue.len(),
        segments: queue.segment_count(),
    }
}

pub fn validate_drain_args(args: &DrainArgs) -> Result<(), String> {
    if args.workers == Some(0) {
        return Err("--workers must be > 0".to_string());
    }
    if args.retry_attempts == Some(0) {
        return Err("--retry-attempts must be > 0".to_string());
    }
    if args.retry_max_ms < args.retry_initial_ms {
        return Err(format!(
            "--retry-max-ms ({}) must be >= --retry-initial-ms ({})",
            args.retry_max_ms, args.retry_initial_ms
        ));
    }
    if let Some(bind) = &args.metrics_bind {
        bind.parse::<SocketAddr>()
            .map_err(|err| format!("invalid --metrics-bind address `{bind}`: {err}"))?;
    }
    Ok(())
}

fn resolve_retry_policy(args: &DrainArgs, config: &Config) -> RetryPolicy {
    RetryPolicy {
        max_attempts: args.retry_attempts.unwrap_or(config.max_attempts),
        initial_backoff: Duration::from_millis(args.retry_initial_ms),
        max_backoff: Duration::from_millis(args.retry_max_ms),
        jitter: Duration::from_millis(args.retry_jitter_ms),
    }
}

fn resolve_metrics_addr(args: &DrainArgs, config: &Config) -> SocketAddr {
    args.metrics_bind
        .as_deref()
        .and_then(|bind| bind.parse().ok())
        .unwrap_or(config.metrics_addr)
}

/// Cancels `token` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down."),
        _ = sigint.recv() => info!("SIGINT received, shutting down."),
        _ = token.cancelled() => return Ok(()),
    }

    token.cancel();
    Ok(())
}

/// Runs the worker pool until a shutdown signal and returns the process exit code.
pub async fn run_drain(config: Config, args: DrainArgs) -> i32 {
    if let Err(err) = validate_drain_args(&args) {
        eprintln!("{err}");
        return 2;
    }

    let queue = match open_queue(&config) {
        Ok(queue) => Arc::new(queue),
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(event = "queue_open_failed", error = %err, error_report = %error_report, "failed to open queue");
            eprintln!("{error_report}");
            return 1;
        }
    };

    let metrics_addr = resolve_metrics_addr(&args, &config);
    let state = Arc::new(AppState::new(CancellationToken::new()));
    let server_handle = match setup_server_with_addr(Arc::clone(&state), metrics_addr).await {
        Ok(handle) => handle,
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "metrics_server_start_failed",
                bind = %metrics_addr,
                error = %err,
                error_report = %error_report,
                "failed to start metrics endpoint"
            );
            eprintln!("failed to start metrics endpoint on {metrics_addr}: {err}");
            return 1;
        }
    };
    if let Some(metrics) = QUEUE_METRICS.get() {
        metrics.queue_depth.set(queue.len() as i64);
    }

    let shutdown_token = state.shutdown_token.clone();
    let signal_handle = tokio::spawn({
        let token = shutdown_token.clone();
        async move {
            if let Err(err) = cancel_on_signal(token.clone()).await {
                error!(error = %err, "failed to register signal handlers");
                token.cancel();
            }
        }
    });

    let num_workers = args.workers.unwrap_or(config.n_workers);
    let retry_policy = resolve_retry_policy(&args, &config);
    info!(
        event = "drain_starting",
        queue = %queue.name(),
        queued = queue.len(),
        workers = num_workers,
        max_attempts = retry_policy.max_attempts,
        "draining queue"
    );
    let pool = WorkerPool::new(
        num_workers,
        Arc::clone(&queue),
        Arc::new(JsonLinesHandler::new(std::io::stdout())),
        retry_policy,
        shutdown_token.clone(),
    );

    let result = pool.wait_for_completion().await;
    shutdown_token.cancel();
    let _ = signal_handle.await;
    let _ = server_handle.await;

    if let Err(err) = result {
        let error_report = format_error_report(&err);
        error!(event = "drain_failed", error = %err, error_report = %error_report, "worker pool failed");
        eprintln!("{error_report}");
        return 1;
    }

    info!(event = "drain_complete", remaining = queue.len(), "queue drained and closed");
    0
}
