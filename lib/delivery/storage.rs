use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use super::types::{BatchHeader, Record, SyncMode};

/// Failure reported by a destination, with the number of rows it attempted to write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StorageError {
    pub rows_attempted: usize,
    pub message: String,
}

impl StorageError {
    pub fn new(rows_attempted: usize, message: impl Into<String>) -> Self {
        Self {
            rows_attempted,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MetaStorageError(pub String);

/// A destination that receives delivered batches.
///
/// `sync_store` returns the number of rows written. Implementations must be safe to call
/// concurrently from independent deliveries.
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    fn sync_store<'a>(
        &'a self,
        header: &'a BatchHeader,
        objects: &'a [Record],
        mode: SyncMode,
    ) -> BoxFuture<'a, Result<usize, StorageError>>;
}

impl<T> Storage for Arc<T>
where
    T: Storage + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sync_store<'a>(
        &'a self,
        header: &'a BatchHeader,
        objects: &'a [Record],
        mode: SyncMode,
    ) -> BoxFuture<'a, Result<usize, StorageError>> {
        (**self).sync_store(header, objects, mode)
    }
}

/// Persists sync checkpoints ("signatures") so extraction can resume.
pub trait MetaStorage: Send + Sync {
    fn save_signature<'a>(
        &'a self,
        source_id: &'a str,
        tap_id: &'a str,
        mode: SyncMode,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), MetaStorageError>>;
}

impl<T> MetaStorage for Arc<T>
where
    T: MetaStorage + ?Sized,
{
    fn save_signature<'a>(
        &'a self,
        source_id: &'a str,
        tap_id: &'a str,
        mode: SyncMode,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), MetaStorageError>> {
        (**self).save_signature(source_id, tap_id, mode, state)
    }
}
