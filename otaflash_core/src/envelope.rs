//! The plaintext envelope at the start of every update image.
//!
//! ```text
//! [multipart part header ... \r\n\r\n]
//! TYPE:<module>\nAPP:<exec len>\nDATA:<fs len><fs sha256 hex>\nSTART:\n
//! <exec image bytes><fs image bytes>
//! ```
//!
//! Only the bracketed fields matter. Whatever sits between them (`TYPE:`, newlines) is ignored.
use crate::Sha256Digest;
use alloc::{string::String, vec::Vec};

pub const ENVELOPE_TERMINATOR: &[u8] = b"START:\n";
/// A multipart part header ends in an empty line.
pub const MULTIPART_HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEnvelope {
    pub module_identity: String,
    pub executable_len: u32,
    pub filesystem_len: u32,
    pub filesystem_hash: Sha256Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeField {
    ModuleIdentity,
    ExecutableLength,
    FilesystemLength,
    FilesystemHash,
}

impl core::fmt::Display for EnvelopeField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EnvelopeField::ModuleIdentity => write!(f, "module identity"),
            EnvelopeField::ExecutableLength => write!(f, "executable length"),
            EnvelopeField::FilesystemLength => write!(f, "filesystem length"),
            EnvelopeField::FilesystemHash => write!(f, "filesystem hash"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The terminator hasn't shown up yet. More bytes may complete the envelope.
    Incomplete,
    MissingField(EnvelopeField),
    InvalidField(EnvelopeField),
    WrongModule { found: String },
}

impl core::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EnvelopeError::Incomplete => write!(f, "envelope terminator not found"),
            EnvelopeError::MissingField(field) => write!(f, "envelope is missing the {field}"),
            EnvelopeError::InvalidField(field) => write!(f, "envelope has an invalid {field}"),
            EnvelopeError::WrongModule { found } => {
                write!(f, "update is for module {found:?}, not for this device")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EnvelopeError {}

/// A successfully parsed envelope and where the image bytes begin in the buffer it was parsed
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEnvelope {
    pub envelope: UpdateEnvelope,
    pub payload_offset: usize,
}

impl UpdateEnvelope {
    /// Describe the two images the way the update-file builder does.
    pub fn for_images(
        module_identity: &str,
        executable: &[u8],
        filesystem: &[u8],
    ) -> Result<Self, EnvelopeError> {
        if module_identity.is_empty() || module_identity.contains(['<', '>']) {
            return Err(EnvelopeError::InvalidField(EnvelopeField::ModuleIdentity));
        }
        let executable_len = u32::try_from(executable.len())
            .map_err(|_| EnvelopeError::InvalidField(EnvelopeField::ExecutableLength))?;
        let filesystem_len = u32::try_from(filesystem.len())
            .map_err(|_| EnvelopeError::InvalidField(EnvelopeField::FilesystemLength))?;
        Ok(Self {
            module_identity: module_identity.into(),
            executable_len,
            filesystem_len,
            filesystem_hash: Sha256Digest::hash(filesystem),
        })
    }

    /// Number of image bytes that follow the envelope.
    pub fn image_len(&self) -> u64 {
        self.executable_len as u64 + self.filesystem_len as u64
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        format!(
            "TYPE:<{}>\nAPP:<{}>\nDATA:<{}><{}>\nSTART:\n",
            self.module_identity, self.executable_len, self.filesystem_len, self.filesystem_hash
        )
        .into_bytes()
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse the envelope at the front of `buf`.
///
/// With `strip_multipart` a part header that ends before the envelope terminator is skipped.
/// The module identity is checked before anything else so a foreign image is reported as such
/// even if the rest of its envelope is unreadable.
pub fn parse_envelope(
    buf: &[u8],
    expected_identity: &str,
    strip_multipart: bool,
) -> Result<ParsedEnvelope, EnvelopeError> {
    parse(buf, Some(expected_identity), strip_multipart)
}

/// Parse the envelope without caring which module it is for.
pub fn inspect_envelope(buf: &[u8], strip_multipart: bool) -> Result<ParsedEnvelope, EnvelopeError> {
    parse(buf, None, strip_multipart)
}

fn parse(
    buf: &[u8],
    expected_identity: Option<&str>,
    strip_multipart: bool,
) -> Result<ParsedEnvelope, EnvelopeError> {
    let mut start = 0;
    if strip_multipart {
        let first_terminator = find(buf, ENVELOPE_TERMINATOR);
        if let Some(end) = find(buf, MULTIPART_HEADER_END) {
            if first_terminator.map_or(true, |terminator| end < terminator) {
                start = end + MULTIPART_HEADER_END.len();
            }
        }
    }

    let terminator = find(&buf[start..], ENVELOPE_TERMINATOR).ok_or(EnvelopeError::Incomplete)?;
    let mut fields = BracketFields {
        rest: &buf[start..start + terminator],
    };

    let module_identity = fields.next_str(EnvelopeField::ModuleIdentity)?;
    if expected_identity.is_some_and(|expected| expected != module_identity) {
        return Err(EnvelopeError::WrongModule {
            found: module_identity.into(),
        });
    }
    let executable_len = fields.next_len(EnvelopeField::ExecutableLength)?;
    let filesystem_len = fields.next_len(EnvelopeField::FilesystemLength)?;
    let filesystem_hash = fields
        .next_str(EnvelopeField::FilesystemHash)?
        .parse::<Sha256Digest>()
        .map_err(|_| EnvelopeError::InvalidField(EnvelopeField::FilesystemHash))?;

    Ok(ParsedEnvelope {
        envelope: UpdateEnvelope {
            module_identity: module_identity.into(),
            executable_len,
            filesystem_len,
            filesystem_hash,
        },
        payload_offset: start + terminator + ENVELOPE_TERMINATOR.len(),
    })
}

struct BracketFields<'a> {
    rest: &'a [u8],
}

impl<'a> BracketFields<'a> {
    fn next_raw(&mut self) -> Option<&'a [u8]> {
        let open = self.rest.iter().position(|byte| *byte == b'<')?;
        let after_open = &self.rest[open + 1..];
        let close = after_open.iter().position(|byte| *byte == b'>')?;
        self.rest = &after_open[close + 1..];
        Some(&after_open[..close])
    }

    fn next_str(&mut self, field: EnvelopeField) -> Result<&'a str, EnvelopeError> {
        let raw = self
            .next_raw()
            .filter(|raw| !raw.is_empty())
            .ok_or(EnvelopeError::MissingField(field))?;
        core::str::from_utf8(raw).map_err(|_| EnvelopeError::InvalidField(field))
    }

    fn next_len(&mut self, field: EnvelopeField) -> Result<u32, EnvelopeError> {
        let text = self.next_str(field)?;
        if !text.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(EnvelopeError::InvalidField(field));
        }
        text.parse().map_err(|_| EnvelopeError::InvalidField(field))
    }
}
