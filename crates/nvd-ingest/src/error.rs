//! Error types for the ETL pipeline

use thiserror::Error;

use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::feed::FetchError;
use crate::publish::PublishError;
use crate::serializer::SerializationError;
use crate::warehouse::WarehouseError;

/// Any failure a pipeline stage can end with
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

pub type Result<T> = std::result::Result<T, EtlError>;
