//! Updates pushed to the device as a multipart HTTP upload.
use crate::feed::{stream_into, StreamError};
use otaflash_core::{UpdateConfig, UpdateFeed, UpdateResult};
use std::io::Read;
use tracing::{event, Level};

/// Size of the pieces the request body is read in.
pub const UPLOAD_CHUNK_LEN: usize = 1024;

/// What goes back to whoever uploaded the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub result: UpdateResult,
    pub body: String,
}

/// Session configuration for uploads. The body is a multipart form so the part header in front
/// of the envelope has to be skipped.
pub fn upload_config(module_identity: impl Into<String>) -> UpdateConfig {
    UpdateConfig::for_module(module_identity).with_multipart()
}

/// Feed a whole request body into `session` and report the outcome as plain text.
///
/// The body is always answered with `200 OK`. Whether the update worked is in the text.
pub fn handle_upload<F, R>(session: &mut F, body: R, content_length: usize) -> UploadResponse
where
    F: UpdateFeed + ?Sized,
    R: Read,
{
    event!(Level::INFO, content_length, "receiving update upload");
    match stream_into(session, body, content_length, UPLOAD_CHUNK_LEN) {
        Ok(received) => event!(Level::DEBUG, received, "upload consumed"),
        Err(StreamError::Closed(closed)) => {
            event!(Level::WARN, result = %closed.result, "upload sent to a finished session")
        }
        Err(e) => {
            event!(Level::ERROR, error = %e, "upload body incomplete");
            session.fail(UpdateResult::UpdateFileCorrupted);
        }
    }

    let result = session.result();
    event!(Level::INFO, code = result.code(), "upload done: {}", result);
    UploadResponse {
        status: 200,
        content_type: "text/plain",
        result,
        body: result.message().to_string(),
    }
}
