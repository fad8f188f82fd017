//! Feed record model
//!
//! A [`Record`] is one `CVE_Items` entry kept as the raw JSON document it was
//! decoded from, paired with the identifier found at `cve.CVE_data_meta.ID`.
//! Records are never mutated after decoding; the pipeline only filters and
//! re-serializes them.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// JSON pointer to the identifier inside a `CVE_Items` entry
pub const RECORD_ID_POINTER: &str = "/cve/CVE_data_meta/ID";

/// Identifiers already loaded into the warehouse, as of one query
pub type KnownIds = HashSet<String>;

/// One vulnerability entry
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    document: Value,
}

impl Record {
    /// Wrap a decoded `CVE_Items` entry, or `None` if it carries no identifier
    pub fn from_document(document: Value) -> Option<Self> {
        let id = document.pointer(RECORD_ID_POINTER)?.as_str()?.to_string();
        Some(Self { id, document })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

/// Ordered records decoded from a single feed archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    /// Archive file name the records came from, e.g. `nvdcve-1.1-2019.json.gz`
    source: String,
    records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(source: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            source: source.into(),
            records,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(Record::id)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
