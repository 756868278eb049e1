//! The update regions of a device backed by one NOR flash.
use crate::{BootSelector, FlashPartition, SECTOR_SIZE};
use alloc::string::String;
use core::cell::RefCell;
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind};
use otaflash_core::{
    migrate::Migrator,
    region::{PartitionRow, RegionError, REGION_PAIRS},
    target::{BootSwitch, ExecutableTarget, FilesystemTarget},
    BlockSink, RegionDescriptor, RegionMap, UpdateTargets,
};
use tracing::{event, Level};

/// Write granularity of the executable region.
pub const EXECUTABLE_BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    Region(RegionError),
    MissingOtadata(String),
    /// A partition that is not sector aligned or doesn't fit in flash.
    BadPartition {
        label: String,
        error: NorFlashErrorKind,
    },
    Otadata(NorFlashErrorKind),
}

impl core::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LayoutError::Region(e) => write!(f, "{e}"),
            LayoutError::MissingOtadata(label) => {
                write!(f, "boot selection partition {label} is not in the partition table")
            }
            LayoutError::BadPartition { label, error } => {
                write!(f, "partition {label} can't be used: {error:?}")
            }
            LayoutError::Otadata(e) => write!(f, "reading the boot selection failed: {e:?}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LayoutError {}

impl From<RegionError> for LayoutError {
    fn from(e: RegionError) -> Self {
        LayoutError::Region(e)
    }
}

/// Sequential writer for the update-target executable region. Sectors are erased as the image
/// reaches them so nothing is touched before the first block arrives.
#[derive(Debug, Clone)]
pub struct FlashExecutable<'a, S> {
    partition: FlashPartition<'a, S>,
    cursor: u32,
    erased_sectors: u32,
}

impl<'a, S: NorFlash> FlashExecutable<'a, S> {
    pub fn new(partition: FlashPartition<'a, S>) -> Self {
        Self {
            partition,
            cursor: 0,
            erased_sectors: 0,
        }
    }

    /// Bytes written since `begin`, padding included.
    pub fn written(&self) -> u32 {
        self.cursor
    }
}

impl<S: NorFlash> BlockSink for FlashExecutable<'_, S> {
    type Error = NorFlashErrorKind;

    fn write_blocks(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let end = self
            .cursor
            .checked_add(bytes.len() as u32)
            .filter(|end| *end <= self.partition.size())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        let sectors_needed = end.div_ceil(SECTOR_SIZE as u32);
        while self.erased_sectors < sectors_needed {
            self.partition.erase_sector(self.erased_sectors)?;
            self.erased_sectors += 1;
        }
        self.partition.nor_write(self.cursor, bytes)?;
        self.cursor = end;
        Ok(())
    }
}

impl<S: NorFlash> ExecutableTarget for FlashExecutable<'_, S> {
    fn begin(&mut self) -> Result<(), Self::Error> {
        if EXECUTABLE_BLOCK_SIZE % S::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if self.partition.size() == 0 {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.cursor = 0;
        self.erased_sectors = 0;
        Ok(())
    }

    fn block_size(&self) -> usize {
        EXECUTABLE_BLOCK_SIZE
    }

    fn size(&self) -> u32 {
        self.partition.size()
    }
}

#[derive(Debug, Clone)]
pub struct FlashFilesystem<'a, S> {
    partition: FlashPartition<'a, S>,
}

impl<'a, S: NorFlash> FlashFilesystem<'a, S> {
    pub fn new(partition: FlashPartition<'a, S>) -> Self {
        Self { partition }
    }
}

impl<S: NorFlash> FilesystemTarget for FlashFilesystem<'_, S> {
    type Error = NorFlashErrorKind;

    fn size(&self) -> u32 {
        self.partition.size()
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        self.partition.erase_all()
    }

    fn write_at(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.partition.write_bytes(offset, bytes)
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.partition.read(offset, buf)
    }
}

#[derive(Debug, Clone)]
pub struct FlashBootSwitch<'a, S> {
    running: FlashPartition<'a, S>,
    target: FlashPartition<'a, S>,
    target_slot: u8,
    selector: BootSelector<'a, S>,
}

impl<S: NorFlash> BootSwitch for FlashBootSwitch<'_, S> {
    type Error = NorFlashErrorKind;

    fn target_matches_running(&mut self, len: u32) -> Result<bool, Self::Error> {
        if len > self.running.size() {
            return Ok(false);
        }
        let running = self.running.sha256_digest(len)?;
        let target = self.target.sha256_digest(len)?;
        event!(Level::DEBUG, %running, %target, "compared executable regions");
        Ok(running == target)
    }

    fn select_target(&mut self) -> Result<(), Self::Error> {
        self.selector.select(self.target_slot)
    }
}

/// The four update regions and the boot selection, resolved from the partition table and the
/// currently selected slot.
#[derive(Debug, Clone)]
pub struct OtaPartitions<'a, S> {
    map: RegionMap,
    executable_running: FlashPartition<'a, S>,
    executable_target: FlashPartition<'a, S>,
    filesystem_running: FlashPartition<'a, S>,
    filesystem_target: FlashPartition<'a, S>,
    selector: BootSelector<'a, S>,
}

impl<'a, S: NorFlash> OtaPartitions<'a, S> {
    pub fn load(
        flash: &'a RefCell<S>,
        rows: &[PartitionRow],
        otadata_label: &str,
    ) -> Result<Self, LayoutError> {
        let otadata_row = rows
            .iter()
            .find(|row| row.label == otadata_label)
            .ok_or_else(|| LayoutError::MissingOtadata(otadata_label.into()))?;
        let otadata = FlashPartition::from_row(flash, otadata_row.offset, otadata_row.size, "otadata")
            .map_err(|error| LayoutError::BadPartition {
                label: otadata_label.into(),
                error,
            })?;
        let selector = BootSelector::new(otadata).map_err(|error| LayoutError::BadPartition {
            label: otadata_label.into(),
            error,
        })?;
        let running_slot = selector.selected_slot().map_err(LayoutError::Otadata)?;
        let running_pair = REGION_PAIRS
            .get(running_slot as usize)
            .ok_or(LayoutError::Otadata(NorFlashErrorKind::Other))?;
        let map = RegionMap::resolve(&REGION_PAIRS, rows, running_pair.executable)?;

        let running = REGION_PAIRS[map.running_index];
        let target = REGION_PAIRS[map.target_index];
        let partition = |descriptor: &RegionDescriptor, tag: &'static str| {
            FlashPartition::from_row(flash, descriptor.base_address, descriptor.size_bytes, tag)
                .map_err(|error| LayoutError::BadPartition {
                    label: descriptor.label.clone(),
                    error,
                })
        };

        Ok(Self {
            executable_running: partition(&map.executable_running, running.executable)?,
            executable_target: partition(&map.executable_target, target.executable)?,
            filesystem_running: partition(&map.filesystem_running, running.filesystem)?,
            filesystem_target: partition(&map.filesystem_target, target.filesystem)?,
            map,
            selector,
        })
    }

    pub fn region_map(&self) -> &RegionMap {
        &self.map
    }

    pub fn running_slot(&self) -> u8 {
        self.map.running_index as u8
    }

    pub fn selector(&self) -> &BootSelector<'a, S> {
        &self.selector
    }

    pub fn executable_running(&self) -> FlashPartition<'a, S> {
        self.executable_running
    }

    pub fn filesystem_running(&self) -> FlashPartition<'a, S> {
        self.filesystem_running
    }

    pub fn filesystem_target(&self) -> FlashPartition<'a, S> {
        self.filesystem_target
    }

    pub fn executable_target(&self) -> FlashPartition<'a, S> {
        self.executable_target
    }

    pub fn log_regions(&self) {
        for descriptor in self.map.descriptors() {
            event!(
                Level::INFO,
                label = descriptor.label.as_str(),
                role = ?descriptor.role,
                slot = ?descriptor.slot,
                address = descriptor.base_address,
                size = descriptor.size_bytes,
                "update region"
            );
        }
    }

    /// Everything an update session needs to update the non-running pair.
    pub fn update_targets<M: Migrator>(
        &self,
        migrator: M,
    ) -> UpdateTargets<FlashExecutable<'a, S>, FlashFilesystem<'a, S>, M, FlashBootSwitch<'a, S>>
    {
        self.log_regions();
        UpdateTargets {
            executable: FlashExecutable::new(self.executable_target),
            filesystem: FlashFilesystem::new(self.filesystem_target),
            migrator,
            boot: FlashBootSwitch {
                running: self.executable_running,
                target: self.executable_target,
                target_slot: self.map.target_index as u8,
                selector: self.selector.clone(),
            },
        }
    }
}
