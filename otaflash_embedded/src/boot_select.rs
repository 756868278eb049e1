use crate::{AbSlot, FlashPartition};
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind};
use tracing::{event, Level};

/// What the bootloader reads to decide which executable region to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BootRecord {
    /// index into the region pair table
    pub slot: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootStatus {
    pub slot: u8,
    pub sequence: u32,
}

/// The persisted boot selection, kept in the `otadata` partition.
#[derive(Debug)]
pub struct BootSelector<'a, S> {
    slots: AbSlot<'a, S>,
}

impl<S> Clone for BootSelector<'_, S> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<'a, S: NorFlash> BootSelector<'a, S> {
    pub fn new(otadata: FlashPartition<'a, S>) -> Result<Self, NorFlashErrorKind> {
        Ok(Self {
            slots: AbSlot::new(otadata)?,
        })
    }

    pub fn status(&self) -> Result<Option<BootStatus>, NorFlashErrorKind> {
        Ok(self
            .slots
            .read::<BootRecord>()?
            .map(|(sequence, record)| BootStatus {
                slot: record.slot,
                sequence,
            }))
    }

    /// The slot that boots next. A device that has never been updated boots slot 0.
    pub fn selected_slot(&self) -> Result<u8, NorFlashErrorKind> {
        Ok(self.status()?.map(|status| status.slot).unwrap_or(0))
    }

    pub fn select(&self, slot: u8) -> Result<(), NorFlashErrorKind> {
        let sequence = self.slots.write(&BootRecord { slot })?;
        let written = self.status()?;
        if written != Some(BootStatus { slot, sequence }) {
            event!(Level::ERROR, slot, sequence, "boot record did not read back");
            return Err(NorFlashErrorKind::Other);
        }
        event!(Level::INFO, slot, sequence, "boot target selected");
        Ok(())
    }
}
