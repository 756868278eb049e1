//! Updates pulled by the device from a URL.
use crate::feed::{stream_into, StreamError};
use anyhow::Context as _;
use otaflash_core::{UpdateFeed, UpdateResult};
use std::{io::Read, time::Duration};
use tracing::{event, Level};

pub const DOWNLOAD_CHUNK_LEN: usize = 4096 / 2;
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// An HTTP response body that is ready to be read.
pub struct Download {
    pub content_length: Option<usize>,
    pub body: Box<dyn Read + Send>,
}

impl core::fmt::Debug for Download {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Starts an HTTP GET. Fails if the server can't be reached or doesn't answer with success.
pub trait HttpFetch {
    fn get(&self, url: &str) -> anyhow::Result<Download>;
}

pub struct UreqFetch {
    agent: ureq::Agent,
}

impl UreqFetch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for UreqFetch {
    fn default() -> Self {
        Self::new(DOWNLOAD_TIMEOUT)
    }
}

impl HttpFetch for UreqFetch {
    fn get(&self, url: &str) -> anyhow::Result<Download> {
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse().ok());
        Ok(Download {
            content_length,
            body: Box::new(response.into_reader()),
        })
    }
}

/// Download the update at `url` into `session`.
///
/// A request that can't be started ends the session with `FileNotReachable`. A body that breaks
/// off or ends before the session is done ends it with `HttpGetError`.
pub fn download_update<F, H>(session: &mut F, fetch: &H, url: &str, chunk_len: usize) -> UpdateResult
where
    F: UpdateFeed + ?Sized,
    H: HttpFetch + ?Sized,
{
    event!(Level::INFO, url, "downloading update");
    let download = match fetch.get(url) {
        Ok(download) => download,
        Err(e) => {
            event!(Level::ERROR, error = ?e, "update not reachable");
            session.fail(UpdateResult::FileNotReachable);
            return session.result();
        }
    };

    // without a length the envelope's own lengths decide when the update is complete
    let total_len = download.content_length.unwrap_or(usize::MAX);
    match stream_into(session, download.body, total_len, chunk_len) {
        Ok(received) => event!(Level::DEBUG, received, "download consumed"),
        Err(StreamError::Closed(closed)) => {
            event!(Level::WARN, result = %closed.result, "download fed to a finished session")
        }
        Err(e) => {
            event!(Level::ERROR, error = %e, "download broke off");
            session.fail(UpdateResult::HttpGetError);
        }
    }
    session.result()
}
