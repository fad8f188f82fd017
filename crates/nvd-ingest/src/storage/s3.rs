//! S3-compatible object storage client
//!
//! Talks to any S3 API: AWS S3, MinIO, or Google Cloud Storage through its
//! interoperability endpoint (`https://storage.googleapis.com` with HMAC
//! keys). Errors are classified into transient and fatal so the publisher
//! can decide whether an upload is worth repeating.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{BucketHandle, ObjectStorage, StorageError};
use crate::config::Secret;

/// Content type of staged delta files
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Service error codes that signal a retryable condition regardless of status
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
];

/// Regions in which S3 rejects an explicit location constraint
const UNCONSTRAINED_REGIONS: &[&str] = &["us-east-1", "auto"];

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Custom endpoint; `None` uses the AWS default for `region`
    pub endpoint: Option<String>,
    pub region: String,
    /// Static HMAC credentials; `None` falls back to the AWS provider chain
    pub access_key: Option<Secret>,
    pub secret_key: Option<Secret>,
    pub path_style: bool,
    /// Scheme of the URIs handed to the warehouse, e.g. `gs` or `s3`
    pub uri_scheme: String,
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
    uri_scheme: String,
}

impl S3Storage {
    pub async fn new(config: StorageConfig) -> Self {
        debug!(?config, "Initializing object storage client");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(
                    access_key.expose(),
                    secret_key.expose(),
                    None,
                    None,
                    "nvd-ingest",
                );
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            },
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            region = %config.region,
            "Object storage client initialized"
        );

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region,
            uri_scheme: config.uri_scheme,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    #[instrument(skip(self))]
    async fn ensure_bucket(&self, name: &str) -> Result<BucketHandle, StorageError> {
        let mut request = self.client.create_bucket().bucket(name);
        if !UNCONSTRAINED_REGIONS.contains(&self.region.as_str()) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => info!(bucket = name, "Created bucket"),
            Err(SdkError::ServiceError(context))
                if context.err().is_bucket_already_owned_by_you()
                    || context.err().is_bucket_already_exists() =>
            {
                debug!(bucket = name, "Bucket already exists");
            },
            Err(e) => return Err(classify("CreateBucket", e)),
        }

        Ok(BucketHandle::new(name, &self.uri_scheme))
    }

    #[instrument(skip(self, bucket), fields(bucket = bucket.name()))]
    async fn upload(
        &self,
        bucket: &BucketHandle,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::LocalFile {
                path: local_path.to_path_buf(),
                source: Box::new(e),
            })?;

        self.client
            .put_object()
            .bucket(bucket.name())
            .key(remote_name)
            .content_type(NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| classify("PutObject", e))?;

        info!(uri = %bucket.object_uri(remote_name), "Uploaded object");
        Ok(())
    }
}

fn is_transient_response(status: u16, code: Option<&str>) -> bool {
    status >= 500 || status == 429 || code.is_some_and(|c| TRANSIENT_ERROR_CODES.contains(&c))
}

fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{operation} failed: {}", DisplayErrorContext(&err));
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        },
        SdkError::ServiceError(context) => {
            is_transient_response(context.raw().status().as_u16(), err.code())
        },
        _ => false,
    };

    let source = Some(Box::new(err) as Box<dyn std::error::Error + Send + Sync>);
    if transient {
        StorageError::Transient { message, source }
    } else {
        StorageError::Fatal { message, source }
    }
}
