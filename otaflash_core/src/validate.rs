use crate::{target::FilesystemTarget, Sha256Digest};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateError<E> {
    Read(E),
    Mismatch {
        expected: Sha256Digest,
        actual: Sha256Digest,
    },
}

impl<E: core::fmt::Debug> core::fmt::Display for ValidateError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ValidateError::Read(e) => write!(f, "reading back the filesystem failed: {e:?}"),
            ValidateError::Mismatch { expected, actual } => {
                write!(f, "filesystem hash mismatch, expected {expected} got {actual}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug> std::error::Error for ValidateError<E> {}

/// Hash `[0, len)` of the region by reading it back in `window` sized pieces.
pub fn region_digest<F: FilesystemTarget>(
    region: &mut F,
    len: u32,
    window: usize,
) -> Result<Sha256Digest, F::Error> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; window.max(1)];
    let mut offset = 0u32;
    while offset < len {
        let n = buf.len().min((len - offset) as usize);
        region.read_at(offset, &mut buf[..n])?;
        hasher.update(&buf[..n]);
        offset += n as u32;
    }
    Ok(Sha256Digest(hasher.finalize().into()))
}

/// Check the written filesystem image against the hash declared in the envelope.
pub fn validate_filesystem<F: FilesystemTarget>(
    region: &mut F,
    len: u32,
    expected: &Sha256Digest,
    window: usize,
) -> Result<(), ValidateError<F::Error>> {
    let actual = region_digest(region, len, window).map_err(ValidateError::Read)?;
    if actual != *expected {
        return Err(ValidateError::Mismatch {
            expected: *expected,
            actual,
        });
    }
    Ok(())
}
