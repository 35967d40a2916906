//! The free-space stream: the system stream that owns every segment not
//! currently claimed by another stream (§4.2).

use crate::{
    chain::Chain,
    error::Error,
    file::RandomAccess,
    journal::Sink,
    segment::Segment,
};

/// A thin, named wrapper around [`Chain`] for the free-space stream's two
/// operations. Unlike an ordinary stream, free space has no data of its own
/// to read or write — only segments to give out and take back.
#[derive(Default)]
pub struct FreeSpaceStream {
    pub chain: Chain,
}

impl FreeSpaceStream {
    pub fn load(file: &impl RandomAccess, first_location: Option<u64>) -> Result<Self, Error> {
        Ok(Self {
            chain: Chain::load(file, first_location)?,
        })
    }

    pub fn total_free_bytes(&self) -> u64 {
        self.chain.data_size()
    }

    /// Hand out up to `amount` data-area bytes, carved off the front of the
    /// free chain. May return less than requested if free space is
    /// exhausted; the caller (`Storage::request_space`) is responsible for
    /// extending the file and retrying.
    pub fn deallocate_space(
        &mut self,
        amount: u64,
        block_size: u64,
        sink: &mut impl Sink,
    ) -> Result<Vec<Segment>, Error> {
        self.chain.take_from_front(amount, block_size, sink)
    }

    /// Return segments no longer used by another stream back to free space,
    /// coalescing with neighbors where possible.
    pub fn add_segments(&mut self, segments: Vec<Segment>, sink: &mut impl Sink) -> Result<(), Error> {
        self.chain.add_segments(segments, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use crate::journal::DirectSink;

    #[test]
    fn deallocate_then_return_restores_total() {
        let file = MemoryFile::new();
        file.set_len(4096).unwrap();
        let mut sink = DirectSink::new(&file);

        let mut free = FreeSpaceStream {
            chain: Chain {
                segments: vec![Segment::new(0, 2048, Some(2048)), Segment::new(2048, 2048, None)],
            },
        };
        let total_before = free.total_free_bytes();

        let taken = free.deallocate_space(1000, 512, &mut sink).unwrap();
        assert!(!taken.is_empty());
        assert!(free.total_free_bytes() < total_before);

        free.add_segments(taken, &mut sink).unwrap();
        assert_eq!(free.total_free_bytes(), total_before);
    }

    #[test]
    fn deallocate_more_than_available_returns_partial() {
        let file = MemoryFile::new();
        file.set_len(1024).unwrap();
        let mut sink = DirectSink::new(&file);

        let mut free = FreeSpaceStream {
            chain: Chain {
                segments: vec![Segment::new(0, 1024, None)],
            },
        };
        let taken = free.deallocate_space(10_000, 512, &mut sink).unwrap();
        assert_eq!(taken.len(), 1);
        assert!(free.chain.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn deallocate_and_return_never_changes_total_bytes(
            segment_sizes in proptest::collection::vec(1u64..20, 1..8),
            amount in 0u64..20_000,
        ) {
            let block_size = 512u64;
            let file = MemoryFile::new();
            let mut location = 0u64;
            let mut segments = Vec::new();
            for blocks in segment_sizes {
                let size = blocks * block_size;
                segments.push(Segment::new(location, size, None));
                location += size;
            }
            file.set_len(location).unwrap();
            let mut sink = DirectSink::new(&file);

            let mut free = FreeSpaceStream {
                chain: Chain { segments },
            };
            // Re-persist so headers aren't garbage for the checksum reload below.
            free.chain.rebuild();
            free.chain.persist_all(&mut sink).unwrap();
            let total_before = free.total_free_bytes();

            let taken = free.deallocate_space(amount, block_size, &mut sink).unwrap();
            let taken_bytes: u64 = taken.iter().map(Segment::data_area_size).sum();
            free.add_segments(taken, &mut sink).unwrap();

            proptest::prop_assert!(taken_bytes <= total_before);
            proptest::prop_assert_eq!(free.total_free_bytes(), total_before);
        }
    }
}
