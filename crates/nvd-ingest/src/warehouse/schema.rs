//! Warehouse table schema
//!
//! The schema file is a JSON array of field definitions in the BigQuery
//! table-schema layout:
//!
//! ```json
//! [
//!   { "name": "cve", "type": "RECORD", "fields": [
//!       { "name": "CVE_data_meta", "type": "RECORD", "fields": [
//!           { "name": "ID" }, { "name": "ASSIGNER" }
//!       ]}
//!   ]},
//!   { "name": "publishedDate", "type": "TIMESTAMP", "mode": "REQUIRED" }
//! ]
//! ```
//!
//! `type` defaults to `STRING` and `mode` to `NULLABLE`.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_FIELD_TYPE: &str = "STRING";
pub const DEFAULT_FIELD_MODE: &str = "NULLABLE";

const FIELD_MODES: &[&str] = &["NULLABLE", "REQUIRED", "REPEATED"];
const NESTED_TYPES: &[&str] = &["RECORD", "STRUCT"];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot read schema file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema file {path} is not valid JSON")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid schema at {location}: {reason}")]
    Invalid { location: String, reason: String },
}

/// One column definition, possibly with nested children
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let raw = std::fs::read(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_slice(&raw).map_err(|source| SchemaError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let definitions = value.as_array().ok_or_else(|| SchemaError::Invalid {
            location: "$".to_string(),
            reason: "expected an array of field definitions".to_string(),
        })?;
        Ok(Self {
            fields: build_fields(definitions, "$")?,
        })
    }

    /// Number of columns including nested ones
    pub fn column_count(&self) -> usize {
        fn count(fields: &[FieldSchema]) -> usize {
            fields.iter().map(|f| 1 + count(&f.fields)).sum()
        }
        count(&self.fields)
    }
}

fn build_fields(definitions: &[Value], parent: &str) -> Result<Vec<FieldSchema>, SchemaError> {
    definitions
        .iter()
        .enumerate()
        .map(|(index, definition)| build_field(definition, &format!("{parent}[{index}]")))
        .collect()
}

fn build_field(definition: &Value, location: &str) -> Result<FieldSchema, SchemaError> {
    let invalid = |reason: &str| SchemaError::Invalid {
        location: location.to_string(),
        reason: reason.to_string(),
    };

    let object = definition
        .as_object()
        .ok_or_else(|| invalid("field definition must be an object"))?;

    let name = match object.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => return Err(invalid("field needs a non-empty \"name\"")),
    };

    let field_type = optional_str(object.get("type"), DEFAULT_FIELD_TYPE)
        .ok_or_else(|| invalid("\"type\" must be a string"))?
        .to_uppercase();

    let mode = optional_str(object.get("mode"), DEFAULT_FIELD_MODE)
        .ok_or_else(|| invalid("\"mode\" must be a string"))?
        .to_uppercase();
    if !FIELD_MODES.contains(&mode.as_str()) {
        return Err(invalid(&format!("unknown mode {mode}")));
    }

    let children = match object.get("fields") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(children)) => children.as_slice(),
        Some(_) => return Err(invalid("\"fields\" must be an array")),
    };

    let location = format!("{location}.{name}");
    let fields = build_fields(children, &location)?;

    let nested = NESTED_TYPES.contains(&field_type.as_str());
    if nested && fields.is_empty() {
        return Err(invalid(&format!("{field_type} field {name} has no child fields")));
    }
    if !nested && !fields.is_empty() {
        return Err(invalid(&format!("{field_type} field {name} cannot have child fields")));
    }

    Ok(FieldSchema {
        name,
        field_type,
        mode,
        fields,
    })
}

fn optional_str<'a>(value: Option<&'a Value>, default: &'a str) -> Option<&'a str> {
    match value {
        None | Some(Value::Null) => Some(default),
        Some(value) => value.as_str(),
    }
}
