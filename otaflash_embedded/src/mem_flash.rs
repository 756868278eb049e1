use alloc::vec::Vec;
use embedded_storage::nor_flash::{self, NorFlashErrorKind};

pub const MEM_FLASH_WORD_SIZE: usize = 4;
pub const MEM_FLASH_ERASE_SIZE: usize = 4096;

/// Faults [`MemFlash`] injects into the next operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Once this many writes have succeeded the next write lands only partially and fails.
    /// Fires once.
    pub tear_write_after: Option<usize>,
    pub fail_erase: bool,
}

/// NOR flash held in memory. Writes can only clear bits, erases set whole sectors back to `0xff`.
#[derive(Clone, Debug)]
pub struct MemFlash {
    bytes: Vec<u8>,
    pub faults: Faults,
    pub write_calls: usize,
    pub erase_calls: usize,
}

impl MemFlash {
    pub fn new(capacity: usize) -> Self {
        Self::from_bytes(vec![0xff; capacity])
    }

    /// Wrap an existing flash dump. The length must be a whole number of sectors.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        assert_eq!(
            bytes.len() % MEM_FLASH_ERASE_SIZE,
            0,
            "flash image must be made of whole sectors"
        );
        Self {
            bytes,
            faults: Faults::default(),
            write_calls: 0,
            erase_calls: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<usize, NorFlashErrorKind> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start),
            _ => Err(NorFlashErrorKind::OutOfBounds),
        }
    }
}

impl nor_flash::ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl nor_flash::ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = self.check_bounds(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl nor_flash::NorFlash for MemFlash {
    const WRITE_SIZE: usize = MEM_FLASH_WORD_SIZE;
    const ERASE_SIZE: usize = MEM_FLASH_ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        if from as usize % MEM_FLASH_ERASE_SIZE != 0 || to as usize % MEM_FLASH_ERASE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let start = self.check_bounds(from, (to - from) as usize)?;
        if self.faults.fail_erase {
            return Err(NorFlashErrorKind::Other);
        }
        self.bytes[start..to as usize].fill(0xff);
        self.erase_calls += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % MEM_FLASH_WORD_SIZE != 0 || bytes.len() % MEM_FLASH_WORD_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let start = self.check_bounds(offset, bytes.len())?;

        let (landed, torn) = match self.faults.tear_write_after {
            Some(after) if self.write_calls >= after => {
                self.faults.tear_write_after = None;
                let half = (bytes.len() / 2) - (bytes.len() / 2) % MEM_FLASH_WORD_SIZE;
                (&bytes[..half], true)
            }
            _ => (bytes, false),
        };
        for (dst, src) in self.bytes[start..start + landed.len()].iter_mut().zip(landed) {
            *dst &= *src;
        }
        if torn {
            return Err(NorFlashErrorKind::Other);
        }
        self.write_calls += 1;
        Ok(())
    }
}
