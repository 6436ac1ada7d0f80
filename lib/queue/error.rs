use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue directory or its files are unusable at open time.
    #[error("Error opening queue in dir [{}]: {reason}", path.display())]
    Init { path: PathBuf, reason: String },

    /// Returned by every operation once the queue has been closed.
    #[error("queue is closed")]
    Closed,

    /// A stored record could not be reconstructed into the envelope type.
    ///
    /// The record has already been consumed when this is returned; `raw` keeps the
    /// original line so the caller can log or park it.
    #[error("record {position} of segment {segment} could not be deserialized: {source}")]
    Deserialization {
        segment: u64,
        position: usize,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize envelope: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl QueueError {
    pub(crate) fn init(path: &Path, reason: impl Into<String>) -> Self {
        Self::Init {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// True for the shutdown sentinel, which callers treat as an expected condition.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
