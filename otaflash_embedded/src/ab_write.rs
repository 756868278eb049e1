use crate::FlashPartition;
use alloc::vec::Vec;
use embedded_storage::nor_flash::{NorFlash, NorFlashErrorKind};

pub const ABWRITE_BINCODE_CONFIG: bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::NoLimit,
> = bincode::config::standard().with_fixed_int_encoding();

pub const SLOT_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// length and checksum in front of every slot record
const RECORD_HEADER_LEN: usize = 8;

/// Manages two writable sectors of persistent storage such that we make sure the state of the system we're managing is never lost.
/// Each write goes to the slot that doesn't hold the newest value, so a write that is cut short
/// can only ever destroy the older of the two values. Records carry a checksum and a torn record
/// is treated as absent.
#[derive(Debug)]
pub struct AbSlot<'a, S> {
    slots: [Slot<'a, S>; 2],
}

impl<S> Clone for AbSlot<'_, S> {
    fn clone(&self) -> Self {
        Self {
            slots: [self.slots[0].clone(), self.slots[1].clone()],
        }
    }
}

impl<'a, S: NorFlash> AbSlot<'a, S> {
    pub fn new(mut partition: FlashPartition<'a, S>) -> Result<Self, NorFlashErrorKind> {
        if partition.n_sectors() < 2 || partition.n_sectors() % 2 != 0 {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        let slot_size = partition.n_sectors() / 2;
        let b_slot = Slot {
            flash: partition.split_off_end(slot_size),
        };
        let a_slot = Slot { flash: partition };

        Ok(Self {
            slots: [a_slot, b_slot],
        })
    }

    /// Write `value` as the newest value. Returns the index it was written under.
    pub fn write<T>(&self, value: &T) -> Result<u32, NorFlashErrorKind>
    where
        T: bincode::Encode,
    {
        let (next_slot, next_index) = match self.current_slot_and_index()? {
            Some((current_slot, current_index)) => {
                let next_index = current_index
                    .checked_add(1)
                    .filter(|index| *index != u32::MAX)
                    .ok_or(NorFlashErrorKind::Other)?;
                ((current_slot + 1) % 2, next_index)
            }
            None => (0, 0),
        };

        self.slots[next_slot].write(&SlotValue {
            index: next_index,
            value,
        })?;
        Ok(next_index)
    }

    /// The newest intact value and its index.
    pub fn read<T: bincode::Decode<()>>(&self) -> Result<Option<(u32, T)>, NorFlashErrorKind> {
        let a = self.slots[0].read::<T>()?;
        let b = self.slots[1].read::<T>()?;
        let newest = match (a, b) {
            (Some(a), Some(b)) => Some(if b.index > a.index { b } else { a }),
            (a, b) => a.or(b),
        };
        Ok(newest.map(|slot_value| (slot_value.index, slot_value.value)))
    }

    fn current_slot_and_index(&self) -> Result<Option<(usize, u32)>, NorFlashErrorKind> {
        let a_index = self.slots[0].read_index()?;
        let b_index = self.slots[1].read_index()?;
        Ok(match (a_index, b_index) {
            (Some(a), Some(b)) if b > a => Some((1, b)),
            (Some(a), _) => Some((0, a)),
            (None, Some(b)) => Some((1, b)),
            (None, None) => None,
        })
    }

    pub fn current_index(&self) -> Result<Option<u32>, NorFlashErrorKind> {
        Ok(self
            .current_slot_and_index()?
            .map(|(_, index)| index))
    }
}

#[derive(Debug)]
struct Slot<'a, S> {
    flash: FlashPartition<'a, S>,
}

impl<S> Clone for Slot<'_, S> {
    fn clone(&self) -> Self {
        Self { flash: self.flash }
    }
}

impl<S: NorFlash> Slot<'_, S> {
    /// Reads the record body if it is intact. A blank, torn or undecodable slot reads as `None`.
    fn read_record(&self) -> Result<Option<Vec<u8>>, NorFlashErrorKind> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        self.flash.read(0, &mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len as usize > self.flash.size() as usize - RECORD_HEADER_LEN {
            return Ok(None);
        }
        let mut body = vec![0u8; len as usize];
        self.flash.read(RECORD_HEADER_LEN as u32, &mut body)?;
        if SLOT_CRC.checksum(&body) != crc {
            return Ok(None);
        }
        Ok(Some(body))
    }

    fn read<T: bincode::Decode<()>>(&self) -> Result<Option<SlotValue<T>>, NorFlashErrorKind> {
        let Some(body) = self.read_record()? else {
            return Ok(None);
        };
        Ok(
            bincode::decode_from_slice::<SlotValue<T>, _>(&body, ABWRITE_BINCODE_CONFIG)
                .ok()
                .map(|(value, _)| value),
        )
    }

    fn read_index(&self) -> Result<Option<u32>, NorFlashErrorKind> {
        let Some(body) = self.read_record()? else {
            return Ok(None);
        };
        Ok(bincode::decode_from_slice::<u32, _>(&body, ABWRITE_BINCODE_CONFIG)
            .ok()
            .map(|(index, _)| index))
    }

    fn write<T: bincode::Encode>(&self, value: &SlotValue<&T>) -> Result<(), NorFlashErrorKind> {
        // encode failures surface as Other
        let body = bincode::encode_to_vec(value, ABWRITE_BINCODE_CONFIG)
            .map_err(|_| NorFlashErrorKind::Other)?;
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + body.len());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&SLOT_CRC.checksum(&body).to_le_bytes());
        record.extend_from_slice(&body);
        let padded_len = record.len().div_ceil(S::WRITE_SIZE) * S::WRITE_SIZE;
        record.resize(padded_len, 0xff);
        if record.len() > self.flash.size() as usize {
            return Err(NorFlashErrorKind::OutOfBounds);
        }

        self.flash.erase_all()?;
        self.flash.nor_write(0, &record)
    }
}

#[derive(Clone, Copy, Debug, bincode::Encode, bincode::Decode)]
struct SlotValue<T> {
    // the slot with the newest index is chosen
    index: u32,
    value: T,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MemFlash;
    use core::cell::RefCell;

    #[test]
    fn newest_value_wins() {
        let flash = RefCell::new(MemFlash::new(4096 * 4));
        let ab = AbSlot::new(FlashPartition::new(&flash, 1, 2, "ab")).unwrap();
        assert_eq!(ab.read::<u64>().unwrap(), None);
        assert_eq!(ab.current_index().unwrap(), None);

        assert_eq!(ab.write(&7u64).unwrap(), 0);
        assert_eq!(ab.write(&8u64).unwrap(), 1);
        assert_eq!(ab.write(&9u64).unwrap(), 2);
        assert_eq!(ab.read::<u64>().unwrap(), Some((2, 9)));
        assert_eq!(ab.current_index().unwrap(), Some(2));
    }

    #[test]
    fn writes_alternate_between_slots() {
        let flash = RefCell::new(MemFlash::new(4096 * 4));
        let ab = AbSlot::new(FlashPartition::new(&flash, 0, 2, "ab")).unwrap();
        ab.write(&1u32).unwrap();
        let erases = flash.borrow().erase_calls;
        ab.write(&2u32).unwrap();
        // the first slot still holds the old value
        assert_eq!(flash.borrow().erase_calls, erases + 1);
        assert_eq!(ab.slots[0].read::<u32>().unwrap().map(|v| v.value), Some(1));
        assert_eq!(ab.slots[1].read::<u32>().unwrap().map(|v| v.value), Some(2));
    }

    #[test]
    fn torn_write_keeps_previous_value() {
        let flash = RefCell::new(MemFlash::new(4096 * 4));
        let ab = AbSlot::new(FlashPartition::new(&flash, 0, 2, "ab")).unwrap();
        ab.write(&[0xabu8; 40]).unwrap();
        ab.write(&[0xcdu8; 40]).unwrap();

        let writes = flash.borrow().write_calls;
        flash.borrow_mut().faults.tear_write_after = Some(writes);
        assert!(ab.write(&[0xefu8; 40]).is_err());
        assert_eq!(ab.read::<[u8; 40]>().unwrap(), Some((1, [0xcd; 40])));

        // and the next write goes to the torn slot again
        assert_eq!(ab.write(&[0x01u8; 40]).unwrap(), 2);
        assert_eq!(ab.read::<[u8; 40]>().unwrap(), Some((2, [0x01; 40])));
    }

    #[test]
    fn odd_partitions_are_rejected() {
        let flash = RefCell::new(MemFlash::new(4096 * 4));
        assert!(AbSlot::new(FlashPartition::new(&flash, 0, 3, "ab")).is_err());
        assert!(AbSlot::new(FlashPartition::new(&flash, 0, 0, "ab")).is_err());
    }
}
