//! Feed archive decoding
//!
//! Feed archives are gzip-compressed JSON documents:
//!
//! ```json
//! {
//!   "CVE_data_type": "CVE",
//!   "CVE_data_numberOfCVEs": "1520",
//!   "CVE_Items": [ { "cve": { "CVE_data_meta": { "ID": "CVE-2019-0001" } } } ]
//! }
//! ```
//!
//! Only `CVE_Items` is kept. Decompression failures and JSON failures are
//! reported as different [`DecodeError`] variants so an operator can tell a
//! truncated download from a feed format change.

use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::record::{Record, RecordBatch, RECORD_ID_POINTER};

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The file could not be opened or is not a complete gzip stream
    #[error("corrupt or unreadable archive {path}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The decompressed bytes are not a feed document
    #[error("invalid feed document in {path}")]
    Content {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry {index} in {path} has no string identifier at {pointer}")]
    MissingId {
        path: PathBuf,
        index: usize,
        pointer: &'static str,
    },
}

impl DecodeError {
    pub fn is_archive_level(&self) -> bool {
        matches!(self, DecodeError::Archive { .. })
    }

    pub fn is_content_level(&self) -> bool {
        !self.is_archive_level()
    }
}

#[derive(Deserialize)]
struct FeedDocument {
    #[serde(rename = "CVE_Items")]
    items: Vec<Value>,
}

/// Decompress and parse one feed archive
#[instrument(skip_all, fields(path = %path.display()))]
pub fn decode(path: &Path) -> Result<RecordBatch, DecodeError> {
    let archive_error = |source| DecodeError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(archive_error)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(archive_error)?;

    let document: FeedDocument =
        serde_json::from_slice(&json).map_err(|source| DecodeError::Content {
            path: path.to_path_buf(),
            source,
        })?;

    let records = document
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            Record::from_document(item).ok_or_else(|| DecodeError::MissingId {
                path: path.to_path_buf(),
                index,
                pointer: RECORD_ID_POINTER,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        decompressed_bytes = json.len(),
        records = records.len(),
        "Decoded feed archive"
    );

    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(RecordBatch::new(source, records))
}
