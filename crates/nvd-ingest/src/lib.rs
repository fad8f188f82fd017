//! NVD Ingest Library
//!
//! Loads the NVD vulnerability feed into an analytics warehouse.
//!
//! # Pipeline
//!
//! Each unit of work (one yearly archive, or the recent-changes archive) runs
//! through the same stages:
//!
//! - **Fetch**: download the gzip archive ([`feed`])
//! - **Decode**: extract the `CVE_Items` records ([`decoder`])
//! - **Filter**: drop records the warehouse already holds ([`delta`])
//! - **Serialize**: write a newline-delimited JSON delta file ([`serializer`])
//! - **Publish**: upload to object storage and start a bulk load ([`publish`])
//!
//! [`controller::RunController`] decides between a full bootstrap and an
//! incremental update and drives the stages.
//!
//! # Example
//!
//! ```no_run
//! use nvd_ingest::config::EtlConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load(None)?;
//!     let schema = config.load_schema()?;
//!     println!("{} columns, staging in {}", schema.column_count(), config.local_path.display());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod decoder;
pub mod delta;
pub mod error;
pub mod feed;
pub mod publish;
pub mod record;
pub mod serializer;
pub mod storage;
pub mod warehouse;

pub use controller::{RunController, RunError, RunReport};
pub use error::EtlError;
