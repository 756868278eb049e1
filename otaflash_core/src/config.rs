use alloc::string::{String, ToString};

/// Module identity baked in at build time. Update images built for any other identity are
/// rejected before anything is written.
pub const MODULE_IDENTITY: &str = match option_env!("OTAFLASH_MODULE_TYPE") {
    Some(identity) => identity,
    None => "OTAFLASH-DEV",
};

/// Envelope plus an optional multipart preamble has to fit in this many bytes.
pub const DEFAULT_MAX_HEADER_LEN: usize = 2048;
/// Read window used while hashing the written filesystem region.
pub const DEFAULT_HASH_WINDOW: usize = 1024;
/// Subtree of the running filesystem that survives an update.
pub const PRESERVED_SUBTREE: &str = "_internal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub module_identity: String,
    pub max_header_len: usize,
    pub hash_window: usize,
    pub preserved_subtree: String,
    /// Skip a leading `multipart/form-data` part header. Only the upload adapter sets this.
    pub strip_multipart: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            module_identity: MODULE_IDENTITY.to_string(),
            max_header_len: DEFAULT_MAX_HEADER_LEN,
            hash_window: DEFAULT_HASH_WINDOW,
            preserved_subtree: PRESERVED_SUBTREE.to_string(),
            strip_multipart: false,
        }
    }
}

impl UpdateConfig {
    pub fn for_module(module_identity: impl Into<String>) -> Self {
        Self {
            module_identity: module_identity.into(),
            ..Default::default()
        }
    }

    pub fn with_multipart(mut self) -> Self {
        self.strip_multipart = true;
        self
    }
}
