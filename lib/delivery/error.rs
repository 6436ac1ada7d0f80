use thiserror::Error;

use super::identity::IdentityError;
use super::storage::{MetaStorageError, StorageError};

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// A record lacks a declared key field. Not retryable without fixing the input.
    #[error("[{identifier}] Table [{table}] is malformed: {source}")]
    StreamMalformed {
        identifier: String,
        table: String,
        #[source]
        source: IdentityError,
    },

    /// A destination rejected a batch; the delivery was aborted at that point.
    #[error(
        "[{identifier}] Error storing {rows} source objects of table [{table}] in [{destination}] destination: {source}"
    )]
    DestinationWrite {
        identifier: String,
        table: String,
        destination: String,
        rows: usize,
        #[source]
        source: StorageError,
    },

    /// Every destination succeeded but the checkpoint was not advanced.
    #[error("Unable to save source [{source_id}] tap [{tap}] signature [{state}]: {source}")]
    CheckpointWrite {
        source_id: String,
        tap: String,
        state: String,
        #[source]
        source: MetaStorageError,
    },

    #[error("Unable to encode sync state: {0}")]
    StateEncoding(#[source] serde_json::Error),
}

impl DeliveryError {
    /// Name of the destination that failed, if the failure came from one.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::DestinationWrite { destination, .. } => Some(destination),
            _ => None,
        }
    }
}
