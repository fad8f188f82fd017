//! HTTP feed downloads
//!
//! The body is streamed to `<name>.part` and renamed into place only after
//! the received byte count matches the advertised `Content-Length`, so a
//! half-written archive never sits under its final name.

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::{FeedConfig, FeedFetcher, FetchError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PARTIAL_SUFFIX: &str = ".part";

pub struct HttpFeedFetcher {
    client: reqwest::Client,
    config: FeedConfig,
    show_progress: bool,
}

impl HttpFeedFetcher {
    pub fn new(config: FeedConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("nvd-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            config,
            show_progress: true,
        })
    }

    /// Disable the terminal progress bar
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    fn progress_bar(&self, total: Option<u64>, name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total.unwrap_or(0));
        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(format!("Downloading {name}"));
        pb
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    #[instrument(skip(self, local_dir), fields(dir = %local_dir.display()))]
    async fn fetch(&self, name: &str, local_dir: &Path) -> Result<PathBuf, FetchError> {
        let url = self.config.url_for(name);
        let destination = local_dir.join(name);
        let partial = local_dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| FetchError::Io { path, source }
        };

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(io_error(local_dir))?;

        debug!(%url, "Requesting feed archive");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let expected = response.content_length();
        let pb = self.progress_bar(expected, name);

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(io_error(&partial))?;
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => {
                    pb.abandon();
                    warn!(%url, received, "Feed transfer interrupted");
                    discard(&partial).await;
                    return Err(FetchError::TransferIncomplete {
                        url,
                        expected,
                        received,
                        source: Some(source),
                    });
                },
            };
            file.write_all(&chunk).await.map_err(io_error(&partial))?;
            received += chunk.len() as u64;
            pb.set_position(received);
        }

        file.flush().await.map_err(io_error(&partial))?;
        file.sync_all().await.map_err(io_error(&partial))?;
        drop(file);

        if !is_complete(expected, received) {
            pb.abandon();
            warn!(%url, ?expected, received, "Feed transfer incomplete");
            discard(&partial).await;
            return Err(FetchError::TransferIncomplete {
                url,
                expected,
                received,
                source: None,
            });
        }

        tokio::fs::rename(&partial, &destination)
            .await
            .map_err(io_error(&destination))?;
        pb.finish_with_message(format!("Downloaded {name}"));

        info!(%url, bytes = received, path = %destination.display(), "Fetched feed archive");
        Ok(destination)
    }
}

/// A transfer without a length is complete once the stream ends cleanly
fn is_complete(expected: Option<u64>, received: u64) -> bool {
    expected.is_none_or(|expected| expected == received)
}

async fn discard(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        debug!(path = %partial.display(), error = %e, "Could not remove partial download");
    }
}
