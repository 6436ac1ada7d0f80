//! Deterministic event identity.
//!
//! Hash inputs are canonical JSON: key-field values are encoded as a JSON array in declared
//! field order, whole records as an object with sorted keys. The identity is the lowercase hex
//! SHA-256 of that text, so it is stable across restarts and implementations.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::Record;

/// Field the computed identity is written to.
pub const EVENT_ID_FIELD: &str = "eventn_ctx_event_id";
/// Ingestion timestamp stamped on every record.
pub const TIMESTAMP_FIELD: &str = "_timestamp";

/// System fields that vary between ingestions of the same content.
const UNHASHED_FIELDS: [&str; 2] = [EVENT_ID_FIELD, TIMESTAMP_FIELD];

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("key field [{field}] is missing from record")]
    MissingKeyField { field: String },

    #[error("failed to encode identity input: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Computes the identity of `record` from `key_fields`, or from its whole content when no key
/// fields are declared.
pub fn identify(record: &Record, key_fields: &[String]) -> Result<String, IdentityError> {
    if key_fields.is_empty() {
        return hash_record(record);
    }

    let values = key_fields
        .iter()
        .map(|field| {
            record
                .get(field)
                .ok_or_else(|| IdentityError::MissingKeyField {
                    field: field.clone(),
                })
        })
        .collect::<Result<Vec<&Value>, _>>()?;

    Ok(sha256_hex(&serde_json::to_string(&values)?))
}

fn hash_record(record: &Record) -> Result<String, IdentityError> {
    let canonical: BTreeMap<&str, &Value> = record
        .iter()
        .filter(|(name, _)| !UNHASHED_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| (name.as_str(), value))
        .collect();

    Ok(sha256_hex(&serde_json::to_string(&canonical)?))
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn enrich_with_event_id(record: &mut Record, event_id: String) {
    record.insert(EVENT_ID_FIELD.to_string(), Value::String(event_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    fn keys(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn key_identity_ignores_non_key_fields() {
        let a = record(json!({"id": 17, "status": "open"}));
        let b = record(json!({"id": 17, "status": "closed", "extra": [1, 2]}));

        assert_eq!(
            identify(&a, &keys(&["id"])).unwrap(),
            identify(&b, &keys(&["id"])).unwrap()
        );
    }

    #[test]
    fn key_identity_changes_with_key_value() {
        let a = record(json!({"id": 17}));
        let b = record(json!({"id": 18}));

        assert_ne!(
            identify(&a, &keys(&["id"])).unwrap(),
            identify(&b, &keys(&["id"])).unwrap()
        );
    }

    #[test]
    fn key_order_is_significant() {
        let r = record(json!({"a": "x", "b": "y"}));
        assert_ne!(
            identify(&r, &keys(&["a", "b"])).unwrap(),
            identify(&r, &keys(&["b", "a"])).unwrap()
        );
    }

    #[test]
    fn composite_keys_do_not_collide_on_concatenation() {
        let a = record(json!({"a": "ab", "b": "c"}));
        let b = record(json!({"a": "a", "b": "bc"}));
        assert_ne!(
            identify(&a, &keys(&["a", "b"])).unwrap(),
            identify(&b, &keys(&["a", "b"])).unwrap()
        );
    }

    #[test]
    fn missing_key_field_fails() {
        let r = record(json!({"name": "no id here"}));
        match identify(&r, &keys(&["id"])) {
            Err(IdentityError::MissingKeyField { field }) => assert_eq!(field, "id"),
            other => panic!("expected missing key error, got {other:?}"),
        }
    }

    #[test]
    fn whole_record_identity_tracks_content() {
        let a = record(json!({"x": 1, "y": {"b": 2, "a": 1}}));
        let same = record(json!({"y": {"a": 1, "b": 2}, "x": 1}));
        let different = record(json!({"x": 2, "y": {"a": 1, "b": 2}}));

        assert_eq!(identify(&a, &[]).unwrap(), identify(&same, &[]).unwrap());
        assert_ne!(identify(&a, &[]).unwrap(), identify(&different, &[]).unwrap());
    }

    #[test]
    fn whole_record_identity_skips_system_fields() {
        let mut a = record(json!({"x": 1}));
        let before = identify(&a, &[]).unwrap();

        a.insert(TIMESTAMP_FIELD.to_string(), json!("2024-01-01T00:00:00Z"));
        enrich_with_event_id(&mut a, before.clone());

        assert_eq!(identify(&a, &[]).unwrap(), before);
    }

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn key_hash_input_is_json_array_of_values() {
        let r = record(json!({"id": 1, "region": "eu"}));
        assert_eq!(
            identify(&r, &keys(&["id", "region"])).unwrap(),
            sha256_hex(r#"[1,"eu"]"#)
        );
    }
}
