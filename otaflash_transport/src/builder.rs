//! Building and checking combined update files.
use anyhow::{anyhow, Context as _};
use otaflash_core::{
    envelope::{inspect_envelope, parse_envelope},
    Sha256Digest, UpdateEnvelope,
};
use std::path::Path;
use tracing::{event, Level};

/// Envelope followed by the executable image and the filesystem image.
pub fn build_update_file(
    module_identity: &str,
    executable: &[u8],
    filesystem: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let envelope = UpdateEnvelope::for_images(module_identity, executable, filesystem)
        .map_err(|e| anyhow!("can't describe the update: {e}"))?;
    let mut file = envelope.header_bytes();
    file.reserve(executable.len() + filesystem.len());
    file.extend_from_slice(executable);
    file.extend_from_slice(filesystem);
    Ok(file)
}

pub fn write_update_file(
    module_identity: &str,
    executable: &Path,
    filesystem: &Path,
    out: &Path,
) -> anyhow::Result<UpdateSummary> {
    let executable = std::fs::read(executable)
        .with_context(|| format!("reading executable image {}", executable.display()))?;
    let filesystem = std::fs::read(filesystem)
        .with_context(|| format!("reading filesystem image {}", filesystem.display()))?;
    let file = build_update_file(module_identity, &executable, &filesystem)?;
    std::fs::write(out, &file).with_context(|| format!("writing {}", out.display()))?;
    let summary = inspect_update_file(&file, None)?;
    event!(
        Level::INFO,
        out = %out.display(),
        len = file.len(),
        filesystem_hash = %summary.envelope.filesystem_hash,
        "update file written"
    );
    Ok(summary)
}

/// What an update file claims and whether its contents live up to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub envelope: UpdateEnvelope,
    pub payload_offset: usize,
    /// Bytes present after the two images.
    pub trailing: usize,
    /// The image bytes that are actually there.
    pub available: usize,
    pub actual_filesystem_hash: Option<Sha256Digest>,
}

impl UpdateSummary {
    pub fn is_complete(&self) -> bool {
        self.available as u64 >= self.envelope.image_len()
    }

    pub fn filesystem_hash_matches(&self) -> bool {
        self.actual_filesystem_hash == Some(self.envelope.filesystem_hash)
    }
}

impl core::fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let envelope = &self.envelope;
        writeln!(f, "module:          {}", envelope.module_identity)?;
        writeln!(f, "header length:   {}", self.payload_offset)?;
        writeln!(f, "executable:      {} bytes", envelope.executable_len)?;
        writeln!(f, "filesystem:      {} bytes", envelope.filesystem_len)?;
        writeln!(f, "filesystem hash: {}", envelope.filesystem_hash)?;
        match self.actual_filesystem_hash {
            Some(_) if self.filesystem_hash_matches() => writeln!(f, "hash check:      ok")?,
            Some(actual) => writeln!(f, "hash check:      MISMATCH (content hashes to {actual})")?,
            None => writeln!(
                f,
                "hash check:      incomplete file ({} of {} image bytes)",
                self.available,
                envelope.image_len()
            )?,
        }
        write!(f, "trailing bytes:  {}", self.trailing)
    }
}

/// Parse the envelope of an update file and hash the filesystem image it carries. With
/// `module_identity` the file must be meant for that module.
pub fn inspect_update_file(
    file: &[u8],
    module_identity: Option<&str>,
) -> anyhow::Result<UpdateSummary> {
    let parsed = match module_identity {
        Some(module_identity) => parse_envelope(file, module_identity, false),
        None => inspect_envelope(file, false),
    }
    .map_err(|e| anyhow!("not a valid update file: {e}"))?;

    let envelope = parsed.envelope;
    let payload = &file[parsed.payload_offset..];
    let executable_len = envelope.executable_len as usize;
    let filesystem_len = envelope.filesystem_len as usize;
    let image_len = executable_len + filesystem_len;
    let actual_filesystem_hash = payload
        .get(executable_len..image_len)
        .map(Sha256Digest::hash);

    Ok(UpdateSummary {
        payload_offset: parsed.payload_offset,
        trailing: payload.len().saturating_sub(image_len),
        available: payload.len().min(image_len),
        actual_filesystem_hash,
        envelope,
    })
}
