//! Remote file retrieval.
use std::io::Write;

use reqwest::{StatusCode, blocking::Client};
use tracing::{debug, info};

use crate::error::StackError;

/// Copies the body behind a URL into a sink.
pub trait Fetch {
    /// Streams `url` into `sink` and returns the number of bytes written.
    ///
    /// Only a `200 OK` response counts as success.
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, StackError>;
}

/// Blocking HTTP(S) fetcher.
///
/// Downloads run without a timeout; distributions are several hundred megabytes.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with its own connection pool.
    pub fn new() -> Result<Self, StackError> {
        let client = Client::builder()
            .timeout(None::<std::time::Duration>)
            .user_agent(concat!("stackrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| StackError::DownloadFailed {
                url: String::new(),
                reason: format!("could not build HTTP client: {err}"),
            })?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, StackError> {
        let failed = |reason: String| StackError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        info!("Downloading {url}");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| failed(err.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(failed(format!("bad status: {status}")));
        }

        let written = response
            .copy_to(sink)
            .map_err(|err| failed(err.to_string()))?;
        sink.flush().map_err(|err| failed(err.to_string()))?;

        debug!("Downloaded {written} bytes from {url}");
        Ok(written)
    }
}
