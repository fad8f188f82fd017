//! Newline-delimited JSON staging files
//!
//! The warehouse bulk-loads newline-delimited JSON, so each surviving record
//! becomes one compact line. Lines are appended one `write` at a time to an
//! unbuffered file: an interrupted run leaves a file that is valid up to its
//! last newline.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::record::Record;

/// Suffix appended to the archive name to form the staging file name
pub const DELTA_FILE_SUFFIX: &str = "_newline.json";

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("failed to write delta file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record {id}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Staging path for the delta of `archive`, e.g.
/// `<staging>/nvdcve-1.1-2019.json.gz_newline.json`
pub fn delta_output_path(staging_dir: &Path, archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    staging_dir.join(format!("{name}{DELTA_FILE_SUFFIX}"))
}

/// Write `records` to `output_path`, one JSON document per line.
///
/// Returns `Ok(None)` without touching the filesystem when there is nothing
/// to write. Any file already at `output_path` is replaced.
#[instrument(skip(records), fields(records = records.len(), path = %output_path.display()))]
pub fn serialize(
    records: &[Record],
    output_path: &Path,
) -> Result<Option<PathBuf>, SerializationError> {
    if records.is_empty() {
        debug!("No records to serialize");
        return Ok(None);
    }

    let io_error = |source| SerializationError::Io {
        path: output_path.to_path_buf(),
        source,
    };

    match fs::remove_file(output_path) {
        Ok(()) => info!("Removed stale delta file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => return Err(io_error(e)),
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_path)
        .map_err(io_error)?;

    let mut bytes = 0usize;
    for record in records {
        let mut line = serde_json::to_vec(record).map_err(|source| SerializationError::Encode {
            id: record.id().to_string(),
            source,
        })?;
        line.push(b'\n');
        file.write_all(&line).map_err(io_error)?;
        bytes += line.len();
    }
    file.sync_all().map_err(io_error)?;

    debug!(bytes, "Delta file written");
    Ok(Some(output_path.to_path_buf()))
}
