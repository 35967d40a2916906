//! Segment headers: the fixed-layout record that precedes every segment's
//! data area, and the splitting/merging arithmetic used by the free-space and
//! storage-stream chains.

use crc32c::crc32c;

use crate::{
    error::Error,
    file::RandomAccess,
    header::{loc_to_raw, raw_to_loc},
};

/// Size in bytes of a segment header: `size(8) + next_location(8) + checksum(4)`.
pub const STRUCTURE_SIZE: u64 = 20;

/// A segment's header, as read from or about to be written to its
/// `location`. `location` itself is not stored in the header (it is implicit
/// in where the header was read from) but does feed the checksum, so that a
/// header read from the wrong offset is very likely to be rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    pub location: u64,
    pub size: u64,
    pub next_location: Option<u64>,
}

impl Segment {
    pub fn new(location: u64, size: u64, next_location: Option<u64>) -> Self {
        Self {
            location,
            size,
            next_location,
        }
    }

    pub fn data_area_start(&self) -> u64 {
        self.location + STRUCTURE_SIZE
    }

    pub fn data_area_end(&self) -> u64 {
        self.location + self.size
    }

    pub fn data_area_size(&self) -> u64 {
        self.size - STRUCTURE_SIZE
    }

    fn checksum(location: u64, size: u64, next_location: Option<u64>) -> u32 {
        let mut payload = [0u8; 24];
        payload[0..8].copy_from_slice(&location.to_le_bytes());
        payload[8..16].copy_from_slice(&size.to_le_bytes());
        payload[16..24].copy_from_slice(&loc_to_raw(next_location).to_le_bytes());
        crc32c(&payload)
    }

    /// Read the header at `location` and verify its checksum.
    pub fn load<F: RandomAccess>(file: &F, location: u64) -> Result<Self, Error> {
        let mut buf = [0u8; STRUCTURE_SIZE as usize];
        file.read_exact_at(&mut buf, location)?;

        let size = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let next_location = raw_to_loc(i64::from_le_bytes(buf[8..16].try_into().unwrap()));
        let checksum = u32::from_le_bytes(buf[16..20].try_into().unwrap());

        if checksum != Self::checksum(location, size, next_location) {
            return Err(Error::ChecksumMismatch { location });
        }

        Ok(Self {
            location,
            size,
            next_location,
        })
    }

    /// Encode the header bytes that belong at `self.location`.
    pub fn encode(&self) -> [u8; STRUCTURE_SIZE as usize] {
        let mut buf = [0u8; STRUCTURE_SIZE as usize];
        buf[0..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&loc_to_raw(self.next_location).to_le_bytes());
        let checksum = Self::checksum(self.location, self.size, self.next_location);
        buf[16..20].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Write the header directly (only; the data area is untouched), with no
    /// journaling. Used for bootstrap writes that have nothing to roll back
    /// to yet, and by tests.
    pub fn persist<F: RandomAccess>(&self, file: &F) -> Result<(), Error> {
        file.write_all_at(&self.encode(), self.location)?;
        Ok(())
    }

    /// Write the header through a [`crate::journal::Sink`], so the previous
    /// contents of this header's bytes are journaled first.
    pub fn persist_via(&self, sink: &mut impl crate::journal::Sink) -> Result<(), Error> {
        sink.write_all_at(self.location, &self.encode())
    }
}

/// Bare geometry of a segment not yet backed by a persisted header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentSpec {
    pub location: u64,
    pub size: u64,
}

#[derive(Debug, Eq, PartialEq)]
pub enum SplitOutcome {
    /// The segment was large enough to carve `amount_to_remove` off of; the
    /// `taken` piece is the one being removed from this chain, `remaining` is
    /// what continues to belong to it.
    Split { taken: SegmentSpec, remaining: SegmentSpec },
    /// Carving off the requested amount would leave a remainder smaller than
    /// one block, so the caller must take the segment whole instead.
    TakeWhole,
}

impl Segment {
    /// Compute how `self` would split in order to carve `amount_to_remove`
    /// data-area bytes off one end of it, following §4.1 of the spec:
    ///
    /// - `new_segment_size = split_at_end ? amount_to_remove - STRUCTURE_SIZE
    ///   : amount_to_remove + STRUCTURE_SIZE`, rounded down to a block
    ///   multiple; except when `!split_at_end` and the raw value was not
    ///   already aligned, in which case it is rounded up by one block
    ///   instead.
    /// - If the remainder would be smaller than one block, refuse the split.
    ///
    /// `new_segment_size` is always the size of the *carved-off* piece:
    /// carving from the front (`split_at_end = false`, used by
    /// `DeallocateSpace` to hand out free space) keeps the carved piece at
    /// `self.location` and shifts the remainder forward; carving from the
    /// tail (`split_at_end = true`, used when a stream shrinks itself) keeps
    /// the remainder at `self.location` and places the carved piece at the
    /// new tail.
    pub fn split(&self, amount_to_remove: u64, split_at_end: bool, block_size: u64) -> SplitOutcome {
        let raw = if split_at_end {
            amount_to_remove.saturating_sub(STRUCTURE_SIZE)
        } else {
            amount_to_remove + STRUCTURE_SIZE
        };
        let rounded_down = round_down(raw, block_size);
        let taken_size = if !split_at_end && rounded_down != raw {
            rounded_down + block_size
        } else {
            rounded_down
        };

        if taken_size == 0 || taken_size > self.size || self.size - taken_size < block_size {
            return SplitOutcome::TakeWhole;
        }

        let remaining_size = self.size - taken_size;
        let (taken_location, remaining_location) = if split_at_end {
            (self.location + remaining_size, self.location)
        } else {
            (self.location, self.location + taken_size)
        };

        SplitOutcome::Split {
            taken: SegmentSpec {
                location: taken_location,
                size: taken_size,
            },
            remaining: SegmentSpec {
                location: remaining_location,
                size: remaining_size,
            },
        }
    }
}

fn round_down(value: u64, block_size: u64) -> u64 {
    (value / block_size) * block_size
}

pub fn round_up(value: u64, block_size: u64) -> u64 {
    round_down(value + block_size - 1, block_size)
}
