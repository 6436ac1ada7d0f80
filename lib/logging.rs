//! Process-wide `tracing` setup for the relay commands.
//!
//! Everything is written to stderr: `drain` prints handled requests on stdout. The queue and
//! worker modules log through `log`, which is forwarded into the same subscriber.

use crate::build_info;
use std::error::Error as StdError;
use std::iter;

use chrono::Utc;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One flattened JSON object per line.
    Json,
    /// Human-readable lines for a terminal.
    Text,
}

impl LogFormat {
    /// Reads a `LOG_FORMAT` value. Only `text` selects [`LogFormat::Text`].
    fn from_setting(setting: Option<&str>) -> Self {
        match setting {
            Some(value) if value.trim().eq_ignore_ascii_case("text") => Self::Text,
            _ => Self::Json,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Identifies one invocation of the binary in every log line it emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub service: String,
    pub mode: String,
    pub environment: String,
    pub run_id: String,
    pub build_version: String,
    pub build_commit: String,
    pub format: LogFormat,
}

impl RunContext {
    fn new(service: &str, mode: &str, format: LogFormat) -> Self {
        Self {
            service: service.to_string(),
            mode: mode.to_string(),
            environment: std::env::var("RELAY_ENV").unwrap_or_else(|_| "dev".to_string()),
            run_id: run_id(service, mode),
            build_version: build_info::VERSION.to_string(),
            build_commit: build_info::short_commit_hash().to_string(),
            format,
        }
    }
}

/// Sets up logging for `mode` and announces the run.
///
/// `RUST_LOG` wins over `default_level`. Only the first call installs a subscriber.
pub fn init_logging(service: &str, mode: &str, default_level: &str) -> RunContext {
    let format = LogFormat::from_setting(std::env::var("LOG_FORMAT").ok().as_deref());
    let run = RunContext::new(service, mode, format);

    let _ = LogTracer::init();
    let (json, text) = match format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Text => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };
    let _ = tracing_subscriber::registry()
        .with(level_filter(default_level))
        .with(json)
        .with(text)
        .try_init();

    tracing::info!(
        event = "relay_started",
        service = %run.service,
        mode = %run.mode,
        environment = %run.environment,
        run_id = %run.run_id,
        version = %run.build_version,
        commit = %run.build_commit,
        log_format = format.as_str(),
        "logging ready"
    );
    run
}

fn level_filter(default_level: &str) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_level),
    }
}

fn run_id(service: &str, mode: &str) -> String {
    format!(
        "{service}.{mode}.{}.{}",
        Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
        std::process::id()
    )
}

/// One line for `err`, then one line per nested cause.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![format!("error: {err}")];
    let causes = iter::successors(err.source(), |&cause| cause.source());
    for (depth, cause) in causes.enumerate() {
        lines.push(format!("caused by ({}): {cause}", depth + 1));
    }
    lines.join("\n")
}
