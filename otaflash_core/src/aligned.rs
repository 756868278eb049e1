use alloc::vec::Vec;

/// Raw write primitive of a region that only accepts whole, aligned blocks.
pub trait BlockSink {
    type Error: core::fmt::Debug;

    /// Append `bytes` to the region. `bytes.len()` is always a multiple of the block size.
    fn write_blocks(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Buffers the tail of each write that doesn't complete a block until the next write fills it.
///
/// The writer knows how long the image is. Once the last image byte has been handed to it the
/// buffered tail is zero padded to a full block and committed, so no image byte is ever left
/// behind and padding never appears before the end of the image.
#[derive(Debug, Clone)]
pub struct AlignedWriter {
    pending: Vec<u8>,
    block_size: usize,
    remaining: u32,
    committed: u64,
}

impl AlignedWriter {
    pub fn new(block_size: usize, image_len: u32) -> Self {
        assert!(block_size > 0, "block size must not be zero");
        Self {
            pending: Vec::with_capacity(block_size),
            block_size,
            remaining: image_len,
            committed: 0,
        }
    }

    /// Takes at most [`remaining`](Self::remaining) bytes from the front of `bytes` and returns
    /// how many were taken. The rest belongs to whatever comes after the image.
    pub fn write<S: BlockSink>(&mut self, sink: &mut S, bytes: &[u8]) -> Result<usize, S::Error> {
        let take = bytes.len().min(self.remaining as usize);
        let mut input = &bytes[..take];
        self.remaining -= take as u32;

        if !self.pending.is_empty() {
            let fill = (self.block_size - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..fill]);
            input = &input[fill..];
            if self.pending.len() == self.block_size {
                self.commit_pending(sink)?;
            }
        }

        // if the pending block is still short then input is exhausted
        if self.pending.is_empty() {
            let aligned = input.len() - input.len() % self.block_size;
            if aligned > 0 {
                sink.write_blocks(&input[..aligned])?;
                self.committed += aligned as u64;
            }
            self.pending.extend_from_slice(&input[aligned..]);
        }

        if self.remaining == 0 && !self.pending.is_empty() {
            self.pending.resize(self.block_size, 0);
            self.commit_pending(sink)?;
        }

        Ok(take)
    }

    fn commit_pending<S: BlockSink>(&mut self, sink: &mut S) -> Result<(), S::Error> {
        sink.write_blocks(&self.pending)?;
        self.committed += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Image bytes not yet handed to the writer.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// All image bytes received and committed.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0 && self.pending.is_empty()
    }

    /// Bytes committed to the sink, padding included.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec::Vec;
    use proptest::{collection, prelude::*};

    #[derive(Default)]
    struct RecordingSink {
        block_size: usize,
        written: Vec<u8>,
        calls: usize,
        fail_on_call: Option<usize>,
    }

    impl BlockSink for RecordingSink {
        type Error = &'static str;

        fn write_blocks(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            assert_eq!(bytes.len() % self.block_size, 0, "unaligned commit");
            assert!(!bytes.is_empty());
            if self.fail_on_call == Some(self.calls) {
                return Err("injected");
            }
            self.calls += 1;
            self.written.extend_from_slice(bytes);
            Ok(())
        }
    }

    fn sink(block_size: usize) -> RecordingSink {
        RecordingSink {
            block_size,
            ..Default::default()
        }
    }

    #[test]
    fn leftover_is_buffered_then_filled() {
        let mut sink = sink(16);
        let mut writer = AlignedWriter::new(16, 40);
        assert_eq!(writer.write(&mut sink, &[1; 10]).unwrap(), 10);
        assert_eq!(sink.written.len(), 0);
        assert_eq!(writer.pending_len(), 10);

        assert_eq!(writer.write(&mut sink, &[2; 20]).unwrap(), 20);
        assert_eq!(sink.written.len(), 16);
        assert_eq!(writer.pending_len(), 14);

        // only 10 of these belong to the image
        assert_eq!(writer.write(&mut sink, &[3; 30]).unwrap(), 10);
        assert!(writer.is_complete());
        assert_eq!(sink.written.len(), 48);
        assert_eq!(&sink.written[40..], &[0; 8]);
        assert_eq!(writer.committed(), 48);
    }

    #[test]
    fn exact_blocks_need_no_padding() {
        let mut sink = sink(16);
        let mut writer = AlignedWriter::new(16, 32);
        writer.write(&mut sink, &[7; 32]).unwrap();
        assert!(writer.is_complete());
        assert_eq!(sink.written, vec![7; 32]);
        assert_eq!(sink.calls, 1);
    }

    #[test]
    fn empty_image_is_complete_immediately() {
        let mut sink = sink(16);
        let mut writer = AlignedWriter::new(16, 0);
        assert!(writer.is_complete());
        assert_eq!(writer.write(&mut sink, &[1, 2, 3]).unwrap(), 0);
        assert_eq!(sink.calls, 0);
    }

    #[test]
    fn sink_error_is_returned() {
        let mut sink = sink(4);
        sink.fail_on_call = Some(1);
        let mut writer = AlignedWriter::new(4, 12);
        writer.write(&mut sink, &[1; 6]).unwrap();
        assert_eq!(writer.write(&mut sink, &[1; 6]), Err("injected"));
    }

    proptest! {
        #[test]
        fn any_split_commits_the_image_exactly(
            image in collection::vec(any::<u8>(), 0..300),
            block_size in 1usize..=32,
            splits in collection::vec(1usize..40, 0..60),
            trailing in collection::vec(any::<u8>(), 0..20),
        ) {
            let mut stream = image.clone();
            stream.extend_from_slice(&trailing);
            let mut sink = sink(block_size);
            let mut writer = AlignedWriter::new(block_size, image.len() as u32);

            let mut rest = &stream[..];
            let mut consumed = 0;
            for split in splits.into_iter().chain(core::iter::repeat(7)) {
                if rest.is_empty() {
                    break;
                }
                let chunk = &rest[..split.min(rest.len())];
                consumed += writer.write(&mut sink, chunk).unwrap();
                rest = &rest[chunk.len()..];
            }

            prop_assert_eq!(consumed, image.len());
            prop_assert!(writer.is_complete());
            let padded = image.len().div_ceil(block_size) * block_size;
            prop_assert_eq!(sink.written.len(), padded);
            prop_assert_eq!(&sink.written[..image.len()], &image[..]);
            prop_assert!(sink.written[image.len()..].iter().all(|byte| *byte == 0));
            prop_assert_eq!(writer.committed(), padded as u64);
        }
    }
}
