//! Feed archive retrieval

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod http;

pub use http::HttpFeedFetcher;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The body ended before the advertised length, or the stream broke off
    #[error("incomplete transfer of {url}: received {received} of {} bytes", expected_len(.expected))]
    TransferIncomplete {
        url: String,
        expected: Option<u64>,
        received: u64,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("request for {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("cannot write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build HTTP client")]
    Client(#[source] reqwest::Error),
}

fn expected_len(expected: &Option<u64>) -> String {
    expected.map_or_else(|| "unknown".to_string(), |n| n.to_string())
}

/// Where archives are published and how they are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Directory URL, ending with `/`
    pub url_base: String,
    pub file_prefix: String,
    pub file_suffix: String,
}

impl FeedConfig {
    /// `nvdcve-1.1-2019.json.gz` for `"2019"`, `nvdcve-1.1-recent.json.gz` for `"recent"`
    pub fn file_name(&self, feed: &str) -> String {
        format!("{}{}{}", self.file_prefix, feed, self.file_suffix)
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}{}", self.url_base, file_name)
    }
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Download archive `name` into `local_dir` and return its path.
    ///
    /// A file of the same name is replaced only once the transfer completed.
    async fn fetch(&self, name: &str, local_dir: &Path) -> Result<PathBuf, FetchError>;
}
