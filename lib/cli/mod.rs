use crate::build_info;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Durable request queue and delivery relay",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    /// Default tracing filter when RUST_LOG is not set.
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read JSON-encoded requests from stdin, one per line, and add them to the queue.
    Enqueue,
    /// Run the worker pool, writing each dequeued request to stdout until SIGINT/SIGTERM.
    Drain(DrainArgs),
    /// Print the number of queued requests and segment files.
    Stats,
}

#[derive(Debug, Args, Clone)]
pub struct DrainArgs {
    /// Worker count. Overrides N_WORKERS.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempts per request including the first. Overrides MAX_ATTEMPTS.
    #[arg(long = "retry-attempts")]
    pub retry_attempts: Option<u32>,

    #[arg(long = "retry-initial-ms", default_value_t = 500)]
    pub retry_initial_ms: u64,

    #[arg(long = "retry-max-ms", default_value_t = 30_000)]
    pub retry_max_ms: u64,

    #[arg(long = "retry-jitter-ms", default_value_t = 100)]
    pub retry_jitter_ms: u64,

    /// Bind address for /health and /metrics. Overrides METRICS_ADDR.
    #[arg(long = "metrics-bind")]
    pub metrics_bind: Option<String>,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
