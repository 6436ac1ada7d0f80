use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use super::identity::EVENT_ID_FIELD;
use super::metrics::DeliveryMetrics;
use super::storage::{MetaStorage, MetaStorageError, Storage, StorageError};
use super::types::{BatchHeader, Record, Stream, SyncMode};
use super::ResultSaver;

pub(super) fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture must be a JSON object, got {other}"),
    }
}

pub(super) fn stream(table: &str, key_fields: &[&str], objects: Vec<Value>) -> Stream {
    Stream {
        key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
        batch_header: BatchHeader::new(table),
        objects: objects.into_iter().map(record).collect(),
    }
}

pub(super) fn saver(
    destinations: Vec<Arc<dyn Storage>>,
    meta: Arc<RecordingMetaStorage>,
    metrics: Arc<RecordingMetrics>,
) -> ResultSaver {
    ResultSaver::new("src-1_tap-github", "src-1", "tap-github", destinations, meta, metrics)
}

/// One `sync_store` call seen by a [`RecordingStorage`].
#[derive(Debug, Clone, PartialEq)]
pub(super) struct SyncCall {
    pub table: String,
    pub rows: usize,
    pub event_ids: Vec<String>,
    pub mode: SyncMode,
}

/// Destination double that replays scripted outcomes, succeeding once the script runs out.
pub(super) struct RecordingStorage {
    name: String,
    outcomes: Mutex<VecDeque<Result<usize, StorageError>>>,
    calls: Mutex<Vec<SyncCall>>,
}

impl RecordingStorage {
    pub(super) fn succeeding(name: &str) -> Arc<Self> {
        Self::with_outcomes(name, Vec::new())
    }

    pub(super) fn failing(name: &str, rows_attempted: usize, message: &str) -> Arc<Self> {
        Self::with_outcomes(name, vec![Err(StorageError::new(rows_attempted, message))])
    }

    pub(super) fn with_outcomes(
        name: &str,
        outcomes: Vec<Result<usize, StorageError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn calls(&self) -> Vec<SyncCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

impl Storage for RecordingStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync_store<'a>(
        &'a self,
        header: &'a BatchHeader,
        objects: &'a [Record],
        mode: SyncMode,
    ) -> BoxFuture<'a, Result<usize, StorageError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(SyncCall {
                    table: header.table_name.clone(),
                    rows: objects.len(),
                    event_ids: objects
                        .iter()
                        .filter_map(|o| o.get(EVENT_ID_FIELD))
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    mode,
                });

            self.outcomes
                .lock()
                .expect("outcomes mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(objects.len()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SavedSignature {
    pub source_id: String,
    pub tap_id: String,
    pub mode: SyncMode,
    pub state: String,
}

#[derive(Default)]
pub(super) struct RecordingMetaStorage {
    failure: Option<String>,
    saved: Mutex<Vec<SavedSignature>>,
}

impl RecordingMetaStorage {
    pub(super) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            saved: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn saved(&self) -> Vec<SavedSignature> {
        self.saved.lock().expect("saved mutex poisoned").clone()
    }
}

impl MetaStorage for RecordingMetaStorage {
    fn save_signature<'a>(
        &'a self,
        source_id: &'a str,
        tap_id: &'a str,
        mode: SyncMode,
        state: &'a str,
    ) -> BoxFuture<'a, Result<(), MetaStorageError>> {
        Box::pin(async move {
            if let Some(message) = &self.failure {
                return Err(MetaStorageError(message.clone()));
            }
            self.saved
                .lock()
                .expect("saved mutex poisoned")
                .push(SavedSignature {
                    source_id: source_id.to_string(),
                    tap_id: tap_id.to_string(),
                    mode,
                    state: state.to_string(),
                });
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum MetricEvent {
    SuccessSourceEvents {
        destination: String,
        count: usize,
    },
    ErrorSourceEvents {
        destination: String,
        count: usize,
    },
    SuccessObjects {
        count: usize,
    },
    ErrorObjects {
        count: usize,
    },
}

#[derive(Default)]
pub(super) struct RecordingMetrics {
    events: Mutex<Vec<(String, MetricEvent)>>,
}

impl RecordingMetrics {
    /// Recorded events, dropping the source id (always the saver's own).
    pub(super) fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub(super) fn sources(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .iter()
            .map(|(source, _)| source.clone())
            .collect()
    }

    fn push(&self, source_id: &str, event: MetricEvent) {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .push((source_id.to_string(), event));
    }
}

impl DeliveryMetrics for RecordingMetrics {
    fn success_source_events(&self, source_id: &str, destination: &str, count: usize) {
        self.push(
            source_id,
            MetricEvent::SuccessSourceEvents {
                destination: destination.to_string(),
                count,
            },
        );
    }

    fn error_source_events(&self, source_id: &str, destination: &str, count: usize) {
        self.push(
            source_id,
            MetricEvent::ErrorSourceEvents {
                destination: destination.to_string(),
                count,
            },
        );
    }

    fn success_objects(&self, source_id: &str, count: usize) {
        self.push(source_id, MetricEvent::SuccessObjects { count });
    }

    fn error_objects(&self, source_id: &str, count: usize) {
        self.push(source_id, MetricEvent::ErrorObjects { count });
    }
}
