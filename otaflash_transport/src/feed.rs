use otaflash_core::{SessionClosed, UpdateFeed, UpdateResult};
use std::io::{ErrorKind, Read};
use tracing::{event, Level};

#[derive(Debug)]
pub enum StreamError {
    Read(std::io::Error),
    /// The stream ended before the session finished.
    Truncated { received: usize },
    Closed(SessionClosed),
}

impl core::fmt::Display for StreamError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StreamError::Read(e) => write!(f, "reading the update stream failed: {e}"),
            StreamError::Truncated { received } => {
                write!(f, "update stream ended after {received} bytes")
            }
            StreamError::Closed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Read(e) => Some(e),
            StreamError::Closed(e) => Some(e),
            StreamError::Truncated { .. } => None,
        }
    }
}

/// Read `reader` in pieces of at most `chunk_len` and feed them until the session is done.
/// Returns the number of bytes fed. Anything after the point where the session finished is left
/// unread.
pub fn stream_into<F, R>(
    feed: &mut F,
    mut reader: R,
    total_len: usize,
    chunk_len: usize,
) -> Result<usize, StreamError>
where
    F: UpdateFeed + ?Sized,
    R: Read,
{
    let mut buf = vec![0u8; chunk_len.max(1)];
    let mut received = 0usize;
    while !feed.is_done() {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Err(StreamError::Truncated { received }),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Read(e)),
        };
        received += n;
        feed.feed(&buf[..n], total_len)
            .map_err(StreamError::Closed)?;
        event!(Level::TRACE, received, total_len, "fed update chunk");
    }
    Ok(received)
}

/// Drive a session from bytes that are already in memory.
pub fn feed_bytes<F>(feed: &mut F, bytes: &[u8], chunk_len: usize) -> Result<UpdateResult, SessionClosed>
where
    F: UpdateFeed + ?Sized,
{
    for chunk in bytes.chunks(chunk_len.max(1)) {
        if feed.is_done() {
            break;
        }
        feed.feed(chunk, bytes.len())?;
    }
    if !feed.is_done() {
        event!(Level::ERROR, len = bytes.len(), "update ended before the images were complete");
        feed.fail(UpdateResult::UpdateFileCorrupted);
    }
    Ok(feed.result())
}
