//! Object storage used as the staging area for warehouse bulk loads

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod s3;

pub use s3::{S3Storage, StorageConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage failure, tagged by whether repeating the call may succeed
#[derive(Error, Debug)]
pub enum StorageError {
    /// Timeouts, dropped connections, 5xx and throttling responses
    #[error("transient storage failure: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Authorization, validation and other client-side rejections
    #[error("storage request rejected: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("cannot read local file {path}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
}

impl StorageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }
}

/// A bucket known to exist, plus the URI scheme the warehouse uses to read it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHandle {
    name: String,
    scheme: String,
}

impl BucketHandle {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `gs://bucket/object`
    pub fn object_uri(&self, object: &str) -> String {
        format!("{}://{}/{}", self.scheme, self.name, object)
    }
}

impl fmt::Display for BucketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.name)
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create the bucket, treating "already exists" as success
    async fn ensure_bucket(&self, name: &str) -> Result<BucketHandle, StorageError>;

    /// Upload `local_path` as `remote_name`, replacing any existing object
    async fn upload(
        &self,
        bucket: &BucketHandle,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_uri() {
        let bucket = BucketHandle::new("nvd-staging", "gs");
        assert_eq!(
            bucket.object_uri("nvdcve-1.1-recent.json.gz_newline.json"),
            "gs://nvd-staging/nvdcve-1.1-recent.json.gz_newline.json"
        );
        assert_eq!(bucket.to_string(), "gs://nvd-staging");
    }

    #[test]
    fn test_error_tags() {
        assert!(StorageError::transient("503 Slow Down").is_transient());
        assert!(!StorageError::fatal("403 AccessDenied").is_transient());
    }
}
