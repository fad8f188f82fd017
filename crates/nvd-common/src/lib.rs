//! NVD ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the NVD ETL workspace.
//!
//! # Overview
//!
//! - **Logging**: `tracing` subscriber setup driven by `NVD_LOG_*` variables
//! - **Checksums**: digests of staged delta files before they are published
//! - **Errors**: the common error type used by the utilities above
//!
//! # Example
//!
//! ```no_run
//! use nvd_common::checksum::digest_file;
//!
//! fn digest(path: &str) -> nvd_common::Result<()> {
//!     let digest = digest_file(path)?;
//!     tracing::info!(%digest, bytes = digest.size, "staged file digest");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
