use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One extracted object: field name to value.
pub type Record = Map<String, Value>;

/// Column type declared by the extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

/// Schema descriptor sent alongside every batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchHeader {
    pub table_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
}

impl BatchHeader {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }
}

/// Records of one table produced by a single extraction run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stream {
    /// Fields forming the natural identity of a record, in hashing order. May be empty.
    #[serde(default)]
    pub key_fields: Vec<String>,
    pub batch_header: BatchHeader,
    #[serde(default)]
    pub objects: Vec<Record>,
}

/// Output of one extraction run: streams keyed by table name plus the opaque incremental
/// state to checkpoint once everything is delivered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputRepresentation {
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub streams: BTreeMap<String, Stream>,
}

/// Synchronization mode passed to destinations and recorded with checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    Full,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
