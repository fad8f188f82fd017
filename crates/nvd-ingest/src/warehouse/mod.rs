//! Analytics warehouse holding the loaded vulnerability records

use async_trait::async_trait;
use thiserror::Error;

use crate::record::KnownIds;

pub mod bigquery;
pub mod schema;

pub use bigquery::{BigQueryClient, BigQueryConfig};
pub use schema::{FieldSchema, SchemaError, TableSchema};

#[derive(Error, Debug)]
pub enum WarehouseError {
    /// The dataset or table does not exist yet
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{operation} request failed")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed with HTTP {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("unexpected {operation} response: {reason}")]
    UnexpectedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("cannot build warehouse HTTP client")]
    Client(#[source] reqwest::Error),
}

impl WarehouseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound { .. })
    }
}

/// A submitted bulk-load job; completion is not awaited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    pub source_uri: String,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Number of records in the dataset's table, or [`WarehouseError::NotFound`]
    async fn count_rows(&self, dataset: &str) -> Result<u64, WarehouseError>;

    /// Create the dataset and its table; existing ones are left untouched
    async fn create_dataset(&self, dataset: &str, schema: &TableSchema) -> Result<(), WarehouseError>;

    /// Every record identifier currently in the table
    async fn list_ids(&self, dataset: &str) -> Result<KnownIds, WarehouseError>;

    /// Start appending the newline-delimited JSON object at `uri` to the table
    async fn load_from_storage(&self, dataset: &str, uri: &str) -> Result<LoadJob, WarehouseError>;
}
