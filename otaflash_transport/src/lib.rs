//! Getting update files into an [`UpdateSession`](otaflash_core::UpdateSession): pushed as an
//! HTTP upload, pulled from a URL, or built and checked on the host.
pub mod builder;
pub mod download;
pub mod feed;
pub mod host;
pub mod profile;
pub mod upload;

pub use builder::{build_update_file, inspect_update_file, write_update_file, UpdateSummary};
pub use download::{download_update, Download, HttpFetch, UreqFetch};
pub use feed::{feed_bytes, stream_into, StreamError};
pub use host::HostMounter;
pub use profile::DeviceProfile;
pub use upload::{handle_upload, upload_config, UploadResponse};
