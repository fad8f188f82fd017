//! Upload a staged delta file and start the warehouse load from it

use nvd_common::checksum::{digest_file, FileDigest};
use nvd_common::CommonError;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::storage::{ObjectStorage, StorageError};
use crate::warehouse::{LoadJob, Warehouse, WarehouseError};

/// Upload attempts per file, the first one included
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("cannot prepare bucket {bucket}")]
    Bucket {
        bucket: String,
        #[source]
        source: StorageError,
    },

    #[error("upload of {object} failed after {attempts} attempts")]
    UploadExhausted {
        object: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("upload of {object} rejected")]
    UploadRejected {
        object: String,
        #[source]
        source: StorageError,
    },

    #[error("cannot start load from {uri}")]
    LoadTrigger {
        uri: String,
        #[source]
        source: WarehouseError,
    },

    #[error("cannot checksum {object}")]
    Checksum {
        object: String,
        #[source]
        source: CommonError,
    },

    #[error("{0} has no file name")]
    InvalidPath(String),
}

/// What was published and where
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub uri: String,
    pub attempts: u32,
    pub digest: FileDigest,
    pub job: LoadJob,
}

pub struct Publisher {
    storage: Arc<dyn ObjectStorage>,
    warehouse: Arc<dyn Warehouse>,
}

impl Publisher {
    pub fn new(storage: Arc<dyn ObjectStorage>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { storage, warehouse }
    }

    /// Upload `local_path` to `bucket` under its file name, then start loading
    /// it into `dataset`.
    ///
    /// Only transient storage failures are retried, immediately and at most
    /// [`MAX_UPLOAD_ATTEMPTS`] times in total. The load job is not awaited.
    #[instrument(skip(self, local_path), fields(file = %local_path.display()))]
    pub async fn publish(
        &self,
        local_path: &Path,
        dataset: &str,
        bucket: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let object = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PublishError::InvalidPath(local_path.display().to_string()))?;

        let digest = digest_file(local_path).map_err(|source| {
            PublishError::Checksum {
                object: object.clone(),
                source,
            }
        })?;

        let handle = self
            .storage
            .ensure_bucket(bucket)
            .await
            .map_err(|source| PublishError::Bucket {
                bucket: bucket.to_string(),
                source,
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.storage.upload(&handle, local_path, &object).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < MAX_UPLOAD_ATTEMPTS => {
                    warn!(attempt, max = MAX_UPLOAD_ATTEMPTS, error = %e, "Upload failed, retrying");
                },
                Err(source) if source.is_transient() => {
                    return Err(PublishError::UploadExhausted {
                        object,
                        attempts: attempt,
                        source,
                    });
                },
                Err(source) => return Err(PublishError::UploadRejected { object, source }),
            }
        }

        let uri = handle.object_uri(&object);
        let job = self
            .warehouse
            .load_from_storage(dataset, &uri)
            .await
            .map_err(|source| PublishError::LoadTrigger {
                uri: uri.clone(),
                source,
            })?;

        info!(%uri, attempts = attempt, %digest, bytes = digest.size, job_id = %job.job_id, "Published delta");
        Ok(PublishReceipt {
            uri,
            attempts: attempt,
            digest,
            job,
        })
    }
}
