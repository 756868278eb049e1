use core::cell::RefCell;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use otaflash_core::Sha256Digest;
use sha2::{Digest, Sha256};

pub struct FlashPartition<'a, S> {
    pub tag: &'static str,
    offset_sector: u32,
    n_sectors: u32,
    flash: &'a RefCell<S>,
}

impl<S> core::fmt::Debug for FlashPartition<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashPartition")
            .field("tag", &self.tag)
            .field("offset_sector", &self.offset_sector)
            .field("n_sectors", &self.n_sectors)
            .finish()
    }
}

// Clone won't derive for some reason
impl<S> Clone for FlashPartition<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for FlashPartition<'_, S> {}
pub const SECTOR_SIZE: usize = 4096;

impl<'a, S: NorFlash> FlashPartition<'a, S> {
    pub fn new(
        flash: &'a RefCell<S>,
        offset_sector: u32,
        n_sectors: u32,
        tag: &'static str,
    ) -> Self {
        Self {
            tag,
            offset_sector,
            n_sectors,
            flash,
        }
    }

    /// A partition from a partition table row. Offset and size have to be whole sectors and the
    /// partition has to lie within the flash.
    pub fn from_row(
        flash: &'a RefCell<S>,
        offset: u32,
        size: u32,
        tag: &'static str,
    ) -> Result<Self, NorFlashErrorKind> {
        if offset % SECTOR_SIZE as u32 != 0 || size % SECTOR_SIZE as u32 != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if offset as usize + size as usize > flash.borrow().capacity() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(Self::new(
            flash,
            offset / SECTOR_SIZE as u32,
            size / SECTOR_SIZE as u32,
            tag,
        ))
    }

    pub fn nor_write(&self, offset: u32, bytes: &[u8]) -> Result<(), NorFlashErrorKind> {
        if offset.saturating_add(bytes.len() as u32) > self.size() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }

        let abs_offset = offset + self.offset_sector * SECTOR_SIZE as u32;

        NorFlash::write(&mut *self.flash.borrow_mut(), abs_offset, bytes).map_err(|e| e.kind())?;

        Ok(())
    }

    /// Write at any offset and length. The unaligned ends are padded with `0xff` which leaves the
    /// neighbouring bytes as they are.
    pub fn write_bytes(&self, offset: u32, bytes: &[u8]) -> Result<(), NorFlashErrorKind> {
        let word = S::WRITE_SIZE as u32;
        let lead = offset % word;
        let start = offset - lead;
        let len = (lead as usize + bytes.len()).div_ceil(S::WRITE_SIZE) * S::WRITE_SIZE;
        if lead == 0 && len == bytes.len() {
            return self.nor_write(offset, bytes);
        }
        let mut padded = vec![0xffu8; len];
        padded[lead as usize..lead as usize + bytes.len()].copy_from_slice(bytes);
        self.nor_write(start, &padded)
    }

    pub fn read(&self, offset: u32, bytes: &mut [u8]) -> Result<(), NorFlashErrorKind> {
        if offset.saturating_add(bytes.len() as u32) > self.size() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let abs_offset = offset + self.offset_sector * SECTOR_SIZE as u32;

        ReadNorFlash::read(&mut *self.flash.borrow_mut(), abs_offset, bytes)
            .map_err(|e| e.kind())?;
        Ok(())
    }

    /// Shrink this partition by `n_sectors` and return the cut-off tail as its own partition.
    pub fn split_off_end(&mut self, n_sectors: u32) -> FlashPartition<'a, S> {
        assert!(n_sectors <= self.n_sectors);
        self.n_sectors -= n_sectors;
        let new_offset_sector = self.offset_sector + self.n_sectors;

        FlashPartition {
            tag: self.tag,
            offset_sector: new_offset_sector,
            n_sectors,
            flash: self.flash,
        }
    }

    pub fn erase_sector(&self, sector: u32) -> Result<(), NorFlashErrorKind> {
        if sector >= self.n_sectors {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let sector = self.offset_sector + sector;

        NorFlash::erase(
            &mut *self.flash.borrow_mut(),
            sector * SECTOR_SIZE as u32,
            (sector + 1) * SECTOR_SIZE as u32,
        )
        .map_err(|e| e.kind())
    }

    pub fn erase_all(&self) -> Result<(), NorFlashErrorKind> {
        let start = self.offset_sector * SECTOR_SIZE as u32;
        NorFlash::erase(
            &mut *self.flash.borrow_mut(),
            start,
            start + self.n_sectors * SECTOR_SIZE as u32,
        )
        .map_err(|e| e.kind())
    }

    /// SHA-256 over the first `len` bytes of the partition.
    pub fn sha256_digest(&self, len: u32) -> Result<Sha256Digest, NorFlashErrorKind> {
        if len > self.size() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let mut hasher = Sha256::new();
        let mut buf = [0u8; SECTOR_SIZE];
        let mut offset = 0;
        while offset < len {
            let n = SECTOR_SIZE.min((len - offset) as usize);
            self.read(offset, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            offset += n as u32;
        }
        Ok(Sha256Digest(hasher.finalize().into()))
    }

    pub fn n_sectors(&self) -> u32 {
        self.n_sectors
    }

    /// offset of the partition in flash in bytes
    pub fn offset(&self) -> u32 {
        self.offset_sector * SECTOR_SIZE as u32
    }

    /// size in bytes
    pub fn size(&self) -> u32 {
        self.n_sectors * SECTOR_SIZE as u32
    }
}
