//! The storage an update session writes to.
use crate::aligned::BlockSink;

/// The update-target executable region. It is only ever written through an
/// [`AlignedWriter`](crate::AlignedWriter), in order, starting at offset 0.
pub trait ExecutableTarget: BlockSink {
    /// Prepare the region for a fresh sequential write from offset 0. Must not modify the region:
    /// erasing happens as blocks are written.
    fn begin(&mut self) -> Result<(), Self::Error>;

    fn block_size(&self) -> usize;

    /// Size of the region in bytes.
    fn size(&self) -> u32;
}

/// The update-target filesystem region. Unlike the executable region it takes writes of any
/// length at any offset.
pub trait FilesystemTarget {
    type Error: core::fmt::Debug;

    fn size(&self) -> u32;

    fn erase_all(&mut self) -> Result<(), Self::Error>;

    fn write_at(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error>;

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Selects which executable region is booted next.
pub trait BootSwitch {
    type Error: core::fmt::Debug;

    /// Whether the first `len` bytes of the update-target executable region are the same as
    /// those of the running one.
    fn target_matches_running(&mut self, len: u32) -> Result<bool, Self::Error>;

    /// Persist the update-target executable region as the next boot target. This has to be a
    /// single atomic update: if it is interrupted the old selection must still stand.
    fn select_target(&mut self) -> Result<(), Self::Error>;
}
