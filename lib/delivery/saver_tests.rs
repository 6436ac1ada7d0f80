use std::sync::Arc;

use serde_json::json;

use super::error::DeliveryError;
use super::identity::{identify, IdentityError, EVENT_ID_FIELD, TIMESTAMP_FIELD};
use super::storage::{Storage, StorageError};
use super::test_support::{
    record, saver, stream, MetricEvent, RecordingMetaStorage, RecordingMetrics, RecordingStorage,
};
use super::types::{OutputRepresentation, SyncMode};
use super::{SOURCE_TAG_FIELD, SOURCE_TAG_VALUE};

fn representation(streams: Vec<(&str, super::types::Stream)>) -> OutputRepresentation {
    OutputRepresentation {
        state: Some(json!({"bookmarks": {"issues": "2024-03-01"}})),
        streams: streams
            .into_iter()
            .map(|(table, s)| (table.to_string(), s))
            .collect(),
    }
}

#[tokio::test]
async fn delivers_enriched_batch_to_every_destination_then_checkpoints() {
    let warehouse = RecordingStorage::succeeding("warehouse");
    let search = RecordingStorage::succeeding("search");
    let meta = Arc::new(RecordingMetaStorage::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let saver = saver(
        vec![warehouse.clone() as Arc<dyn Storage>, search.clone()],
        meta.clone(),
        metrics.clone(),
    );

    let mut output = representation(vec![(
        "issues",
        stream(
            "issues",
            &["id"],
            vec![json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b"})],
        ),
    )]);
    saver.consume(&mut output).await.expect("delivery should succeed");

    let objects = &output.streams["issues"].objects;
    for object in objects {
        assert_eq!(object[SOURCE_TAG_FIELD], json!(SOURCE_TAG_VALUE));
        assert!(object[TIMESTAMP_FIELD].is_string());
    }
    let expected_id = identify(&record(json!({"id": 1})), &["id".to_string()]).unwrap();
    assert_eq!(objects[0][EVENT_ID_FIELD], json!(expected_id));

    for destination in [&warehouse, &search] {
        let calls = destination.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].table, "issues");
        assert_eq!(calls[0].rows, 2);
        assert_eq!(calls[0].event_ids.len(), 2);
        assert_eq!(calls[0].mode, SyncMode::Full);
    }

    assert_eq!(
        metrics.events(),
        vec![
            MetricEvent::SuccessSourceEvents {
                destination: "warehouse".to_string(),
                count: 2
            },
            MetricEvent::SuccessObjects { count: 2 },
            MetricEvent::SuccessSourceEvents {
                destination: "search".to_string(),
                count: 2
            },
            MetricEvent::SuccessObjects { count: 2 },
        ]
    );
    assert!(metrics.sources().iter().all(|s| s == "src-1"));

    let saved = meta.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].source_id, "src-1");
    assert_eq!(saved[0].tap_id, "tap-github");
    assert_eq!(saved[0].mode, SyncMode::Full);
    assert_eq!(saved[0].state, r#"{"bookmarks":{"issues":"2024-03-01"}}"#);
}

#[tokio::test]
async fn first_destination_failure_aborts_fan_out() {
    let d1 = RecordingStorage::succeeding("d1");
    let d2 = RecordingStorage::failing("d2", 3, "connection refused");
    let d3 = RecordingStorage::succeeding("d3");
    let meta = Arc::new(RecordingMetaStorage::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let saver = saver(
        vec![d1.clone() as Arc<dyn Storage>, d2.clone(), d3.clone()],
        meta.clone(),
        metrics.clone(),
    );

    let mut output = representation(vec![(
        "events",
        stream(
            "events",
            &[],
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})],
        ),
    )]);
    let err = saver
        .consume(&mut output)
        .await
        .expect_err("d2 failure should abort delivery");

    assert_eq!(err.destination(), Some("d2"));
    match &err {
        DeliveryError::DestinationWrite {
            table,
            destination,
            rows,
            ..
        } => {
            assert_eq!(table, "events");
            assert_eq!(destination, "d2");
            assert_eq!(*rows, 3);
        }
        other => panic!("expected destination write error, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("[d2]"), "message was: {message}");
    assert!(message.contains("connection refused"), "message was: {message}");

    assert_eq!(d1.calls().len(), 1);
    assert_eq!(d2.calls().len(), 1);
    assert!(d3.calls().is_empty(), "no attempt after the failing destination");
    assert!(meta.saved().is_empty(), "no checkpoint after a failure");

    assert_eq!(
        metrics.events(),
        vec![
            MetricEvent::SuccessSourceEvents {
                destination: "d1".to_string(),
                count: 3
            },
            MetricEvent::SuccessObjects { count: 3 },
            MetricEvent::ErrorSourceEvents {
                destination: "d2".to_string(),
                count: 3
            },
            MetricEvent::ErrorObjects { count: 3 },
        ]
    );
}

#[tokio::test]
async fn failed_second_stream_blocks_checkpoint() {
    let destination = RecordingStorage::with_outcomes(
        "warehouse",
        vec![Ok(1), Err(StorageError::new(1, "disk full"))],
    );
    let meta = Arc::new(RecordingMetaStorage::default());
    let saver = saver(
        vec![destination.clone() as Arc<dyn Storage>],
        meta.clone(),
        Arc::new(RecordingMetrics::default()),
    );

    let mut output = representation(vec![
        ("a_orders", stream("a_orders", &["id"], vec![json!({"id": 1})])),
        ("b_users", stream("b_users", &["id"], vec![json!({"id": 7})])),
    ]);
    let err = saver.consume(&mut output).await.unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::DestinationWrite { ref table, .. } if table == "b_users"
    ));
    let tables: Vec<String> = destination.calls().into_iter().map(|c| c.table).collect();
    assert_eq!(tables, vec!["a_orders", "b_users"]);
    assert!(meta.saved().is_empty());
}

#[tokio::test]
async fn successful_run_over_two_streams_checkpoints_once() {
    let destination = RecordingStorage::succeeding("warehouse");
    let meta = Arc::new(RecordingMetaStorage::default());
    let saver = saver(
        vec![destination.clone() as Arc<dyn Storage>],
        meta.clone(),
        Arc::new(RecordingMetrics::default()),
    );

    let mut output = representation(vec![
        ("a_orders", stream("a_orders", &["id"], vec![json!({"id": 1})])),
        ("b_users", stream("b_users", &["id"], vec![json!({"id": 7})])),
    ]);
    output.state = Some(json!({"cursor": 42}));
    saver.consume(&mut output).await.unwrap();

    assert_eq!(destination.calls().len(), 2);
    let saved = meta.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].state, r#"{"cursor":42}"#);
}

#[tokio::test]
async fn missing_key_field_fails_before_any_write() {
    let destination = RecordingStorage::succeeding("warehouse");
    let meta = Arc::new(RecordingMetaStorage::default());
    let saver = saver(
        vec![destination.clone() as Arc<dyn Storage>],
        meta.clone(),
        Arc::new(RecordingMetrics::default()),
    );

    let mut output = representation(vec![(
        "users",
        stream(
            "users",
            &["id"],
            vec![json!({"id": 1}), json!({"email": "no-id@example.com"})],
        ),
    )]);
    let err = saver.consume(&mut output).await.unwrap_err();

    match err {
        DeliveryError::StreamMalformed { table, source, .. } => {
            assert_eq!(table, "users");
            assert!(matches!(source, IdentityError::MissingKeyField { ref field } if field == "id"));
        }
        other => panic!("expected malformed stream, got {other:?}"),
    }
    assert!(destination.calls().is_empty());
    assert!(meta.saved().is_empty());
}

#[tokio::test]
async fn checkpoint_failure_is_reported_after_delivery() {
    let destination = RecordingStorage::succeeding("warehouse");
    let meta = RecordingMetaStorage::failing("meta store unavailable");
    let saver = saver(
        vec![destination.clone() as Arc<dyn Storage>],
        meta,
        Arc::new(RecordingMetrics::default()),
    );

    let mut output = representation(vec![(
        "issues",
        stream("issues", &["id"], vec![json!({"id": 1})]),
    )]);
    let err = saver.consume(&mut output).await.unwrap_err();

    assert_eq!(destination.calls().len(), 1);
    match err {
        DeliveryError::CheckpointWrite {
            source_id, tap, state, ..
        } => {
            assert_eq!(source_id, "src-1");
            assert_eq!(tap, "tap-github");
            assert!(state.contains("bookmarks"));
        }
        other => panic!("expected checkpoint error, got {other:?}"),
    }
}

#[tokio::test]
async fn absent_state_checkpoints_null() {
    let meta = Arc::new(RecordingMetaStorage::default());
    let saver = saver(
        vec![RecordingStorage::succeeding("warehouse") as Arc<dyn Storage>],
        meta.clone(),
        Arc::new(RecordingMetrics::default()),
    );

    let mut output = OutputRepresentation::default();
    saver.consume(&mut output).await.unwrap();

    assert_eq!(meta.saved()[0].state, "null");
}
