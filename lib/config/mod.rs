use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_QUEUE_NAME: &str = "http_requests";
pub const DEFAULT_N_WORKERS: usize = 8;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:3000";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {name} `{value}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue_name: String,
    /// Parent directory of the queue's own directory. Required.
    pub queue_dir: PathBuf,
    pub n_workers: usize,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let queue_name = lookup("QUEUE_NAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        let queue_dir = lookup("QUEUE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("QUEUE_DIR"))?;

        let n_workers = parse_or(&lookup, "N_WORKERS", DEFAULT_N_WORKERS)?;
        if n_workers == 0 {
            return Err(invalid("N_WORKERS", "0", "must be > 0"));
        }
        let max_attempts = parse_or(&lookup, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(invalid("MAX_ATTEMPTS", "0", "must be > 0"));
        }
        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(raw) => parse_value("METRICS_ADDR", &raw)?,
            None => parse_value("METRICS_ADDR", DEFAULT_METRICS_ADDR)?,
        };

        Ok(Self {
            queue_name,
            queue_dir,
            n_workers,
            max_attempts,
            metrics_addr,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| invalid(name, raw, &err.to_string()))
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
