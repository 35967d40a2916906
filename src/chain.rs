//! The segment chain: the singly-linked list of [`Segment`]s that backs every
//! stream, including the two system streams. `Chain` is the shared machine
//! behind §4.2 (free-space), §4.3 (stream table) and §4.4 (storage streams);
//! each of those layers a different meaning over the same segment-splitting
//! and rebuild arithmetic.

use crate::{
    error::Error,
    journal::Sink,
    segment::{Segment, SplitOutcome, STRUCTURE_SIZE},
};

/// An ordered, in-memory view of one stream's segments, head first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Chain {
    pub segments: Vec<Segment>,
}

impl Chain {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn first_location(&self) -> Option<u64> {
        self.segments.first().map(|s| s.location)
    }

    /// Sum of every segment's data-area size; used directly as a stream's
    /// `Length` upper bound, and as the stream-table's own `Length`.
    pub fn data_size(&self) -> u64 {
        self.segments.iter().map(Segment::data_area_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walk the chain starting at `first`, verifying every header's checksum
    /// along the way.
    pub fn load(file: &impl crate::file::RandomAccess, first: Option<u64>) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut cursor = first;
        while let Some(location) = cursor {
            let segment = Segment::load(file, location)?;
            cursor = segment.next_location;
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// §4.5: merge adjacent segments whose data area abuts the next one's
    /// location, then fix up every `next_location` link.
    pub fn rebuild(&mut self) {
        let mut i = 0;
        while i + 1 < self.segments.len() {
            if self.segments[i].data_area_end() == self.segments[i + 1].location {
                let merged_size = self.segments[i + 1].size;
                self.segments.remove(i + 1);
                self.segments[i].size += merged_size;
            } else {
                i += 1;
            }
        }
        let len = self.segments.len();
        for i in 0..len {
            let next_location = self.segments.get(i + 1).map(|s| s.location);
            self.segments[i].next_location = next_location;
        }
    }

    /// Write every segment's header. Cheap enough at this crate's scale that
    /// we don't bother tracking which headers actually changed.
    pub fn persist_all(&self, sink: &mut impl Sink) -> Result<(), Error> {
        for segment in &self.segments {
            segment.persist_via(sink)?;
        }
        Ok(())
    }

    /// Carve `amount` data-area bytes off the front of the chain (used by
    /// `DeallocateSpace` to satisfy a growth request from free space).
    /// Returns the segments removed from `self`, in front-to-back order.
    /// Returns fewer than `amount` worth of bytes if the chain is exhausted
    /// first; the caller is responsible for growing the file and retrying.
    pub fn take_from_front(
        &mut self,
        amount: u64,
        block_size: u64,
        sink: &mut impl Sink,
    ) -> Result<Vec<Segment>, Error> {
        self.take_from_one_end(amount, block_size, false, sink)
    }

    /// Carve `amount` data-area bytes off the tail of the chain (used when a
    /// stream shrinks its own length and returns the freed tail to the
    /// free-space stream).
    pub fn take_from_back(&mut self, amount: u64, block_size: u64, sink: &mut impl Sink) -> Result<Vec<Segment>, Error> {
        self.take_from_one_end(amount, block_size, true, sink)
    }

    fn take_from_one_end(
        &mut self,
        amount: u64,
        block_size: u64,
        from_end: bool,
        sink: &mut impl Sink,
    ) -> Result<Vec<Segment>, Error> {
        let mut taken = Vec::new();
        let mut remaining_needed = amount;

        while remaining_needed > 0 && !self.segments.is_empty() {
            let idx = if from_end { self.segments.len() - 1 } else { 0 };
            let segment = self.segments[idx];

            if segment.data_area_size() <= remaining_needed {
                remaining_needed -= segment.data_area_size();
                taken.push(segment);
                self.segments.remove(idx);
                continue;
            }

            match segment.split(remaining_needed, from_end, block_size) {
                SplitOutcome::TakeWhole => {
                    remaining_needed = remaining_needed.saturating_sub(segment.data_area_size());
                    taken.push(segment);
                    self.segments.remove(idx);
                }
                SplitOutcome::Split {
                    taken: taken_spec,
                    remaining: remaining_spec,
                } => {
                    let kept_next = if from_end { None } else { segment.next_location };
                    let kept = Segment::new(
                        remaining_spec.location,
                        remaining_spec.size,
                        if from_end { segment.next_location } else { kept_next },
                    );
                    let split_off = Segment::new(taken_spec.location, taken_spec.size, None);

                    kept.persist_via(sink)?;
                    split_off.persist_via(sink)?;

                    self.segments[idx] = kept;
                    taken.push(split_off);
                    remaining_needed = 0;
                }
            }
        }

        if from_end {
            taken.reverse();
        }
        Ok(taken)
    }

    /// Merge-insert `new_segments` into the chain in location order, then
    /// coalesce and persist. This is `AddSegments` from §4.2.
    pub fn add_segments(&mut self, new_segments: Vec<Segment>, sink: &mut impl Sink) -> Result<(), Error> {
        for segment in new_segments {
            let at = self
                .segments
                .binary_search_by_key(&segment.location, |s| s.location)
                .unwrap_or_else(|at| at);
            self.segments.insert(at, segment);
        }
        self.rebuild();
        self.persist_all(sink)
    }
}

/// Minimum total size a freshly allocated segment may have: one block plus
/// its own header, so its data area is never empty.
pub fn min_segment_total_size(block_size: u64) -> u64 {
    block_size.max(STRUCTURE_SIZE + 1)
}
