//! Delivery of extracted record streams to storage destinations.
//!
//! One [`ResultSaver::consume`] call runs every stream through
//! enrich -> identify -> fan-out, then writes the sync checkpoint. The first destination
//! failure aborts the whole call and the checkpoint is only written when every stream reached
//! every destination. Streams delivered before a failure are not rolled back.

pub mod error;
pub mod identity;
pub mod metrics;
pub mod storage;
pub mod types;

#[cfg(test)]
mod saver_tests;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{error, info};

pub use error::DeliveryError;
pub use identity::{enrich_with_event_id, identify, IdentityError, EVENT_ID_FIELD, TIMESTAMP_FIELD};
pub use metrics::{DeliveryMetrics, NoopDeliveryMetrics};
pub use storage::{MetaStorage, MetaStorageError, Storage, StorageError};
pub use types::{BatchHeader, FieldType, OutputRepresentation, Record, Stream, SyncMode};

/// Field marking where a record came from.
pub const SOURCE_TAG_FIELD: &str = "src";
pub const SOURCE_TAG_VALUE: &str = "source";

/// Delivers the output of one source's extraction runs.
///
/// Holds no per-run state, so one instance may serve concurrent `consume` calls.
pub struct ResultSaver {
    /// Prefix for log lines and error messages, usually `<source>_<tap>`.
    identifier: String,
    source_id: String,
    tap: String,
    destinations: Vec<Arc<dyn Storage>>,
    meta_storage: Arc<dyn MetaStorage>,
    metrics: Arc<dyn DeliveryMetrics>,
}

impl ResultSaver {
    pub fn new(
        identifier: impl Into<String>,
        source_id: impl Into<String>,
        tap: impl Into<String>,
        destinations: Vec<Arc<dyn Storage>>,
        meta_storage: Arc<dyn MetaStorage>,
        metrics: Arc<dyn DeliveryMetrics>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            source_id: source_id.into(),
            tap: tap.into(),
            destinations,
            meta_storage,
            metrics,
        }
    }

    /// Enriches, identifies, and delivers every stream, then checkpoints `representation.state`.
    ///
    /// Records are modified in place, so the caller sees the system fields and identities that
    /// were delivered.
    pub async fn consume(
        &self,
        representation: &mut OutputRepresentation,
    ) -> Result<(), DeliveryError> {
        for (table_name, stream) in representation.streams.iter_mut() {
            let key_fields = stream.key_fields.join(",");
            info!(
                identifier = %self.identifier,
                table = %table_name,
                key_fields = %key_fields,
                objects = stream.objects.len(),
                "syncing table"
            );

            prepare_stream(stream).map_err(|source| DeliveryError::StreamMalformed {
                identifier: self.identifier.clone(),
                table: table_name.clone(),
                source,
            })?;

            self.fan_out(table_name, stream).await?;

            info!(
                identifier = %self.identifier,
                table = %table_name,
                key_fields = %key_fields,
                objects = stream.objects.len(),
                "synchronized table successfully"
            );
        }

        self.checkpoint(representation.state.as_ref()).await
    }

    async fn fan_out(&self, table_name: &str, stream: &Stream) -> Result<(), DeliveryError> {
        for storage in &self.destinations {
            let destination = storage.name();
            match storage
                .sync_store(&stream.batch_header, &stream.objects, SyncMode::Full)
                .await
            {
                Ok(rows) => {
                    self.metrics
                        .success_source_events(&self.source_id, destination, rows);
                    self.metrics.success_objects(&self.source_id, rows);
                }
                Err(source) => {
                    let rows = source.rows_attempted;
                    self.metrics
                        .error_source_events(&self.source_id, destination, rows);
                    self.metrics.error_objects(&self.source_id, rows);
                    return Err(DeliveryError::DestinationWrite {
                        identifier: self.identifier.clone(),
                        table: table_name.to_string(),
                        destination: destination.to_string(),
                        rows,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    async fn checkpoint(&self, state: Option<&Value>) -> Result<(), DeliveryError> {
        let state = serde_json::to_string(&state).map_err(DeliveryError::StateEncoding)?;

        if let Err(source) = self
            .meta_storage
            .save_signature(&self.source_id, &self.tap, SyncMode::Full, &state)
            .await
        {
            let err = DeliveryError::CheckpointWrite {
                source_id: self.source_id.clone(),
                tap: self.tap.clone(),
                state,
                source,
            };
            error!(identifier = %self.identifier, error = %err, "checkpoint write failed");
            return Err(err);
        }
        Ok(())
    }
}

/// Stamps system fields and identity on every record of `stream`.
///
/// Fails on the first record missing a key field, before anything is sent to a destination.
fn prepare_stream(stream: &mut Stream) -> Result<(), IdentityError> {
    for object in stream.objects.iter_mut() {
        object.insert(
            SOURCE_TAG_FIELD.to_string(),
            Value::String(SOURCE_TAG_VALUE.to_string()),
        );
        object.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );

        let event_id = identify(object, &stream.key_fields)?;
        enrich_with_event_id(object, event_id);
    }
    Ok(())
}
