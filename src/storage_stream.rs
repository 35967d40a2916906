//! Per-stream cursor state and the read/write/seek/resize operations that
//! act on it (§4.4). `Storage` owns one [`OpenStreamState`] per open stream;
//! callers address a stream through the cheap, `Copy` [`StorageStream`]
//! handle rather than holding a borrow of `Storage` for the stream's whole
//! lifetime, since the engine allows several streams to stay open at once.

use std::io::SeekFrom;

use crate::{
    chain::Chain,
    error::Error,
    file::RandomAccess,
    header::MasterHeader,
    journal::Sink,
    segment::{round_up, Segment},
    stream_table::StreamId,
};

/// A handle to a stream that has been opened with
/// [`crate::storage::Storage::open_stream`]. Carries no borrow of its own;
/// every operation takes the owning `Storage` explicitly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct StorageStream {
    pub(crate) id: StreamId,
}

impl StorageStream {
    pub fn id(&self) -> StreamId {
        self.id
    }
}

/// The mutable state kept for one open stream.
pub struct OpenStreamState {
    pub chain: Chain,
    pub position: u64,
    pub length: u64,
    pub initialized_length: u64,
    pub tag: u32,
    pub closed: bool,
}

impl OpenStreamState {
    pub fn new(chain: Chain, length: u64, initialized_length: u64, tag: u32) -> Self {
        Self {
            chain,
            position: 0,
            length,
            initialized_length,
            tag,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes starting at the cursor, zero-filling any
    /// portion that falls between `initialized_length` and `length` (the
    /// zero-fill law), and returning fewer bytes once `length` is reached.
    /// Advances the cursor by the number of bytes returned.
    pub fn read(&mut self, file: &impl RandomAccess, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_open()?;
        let available = self.length.saturating_sub(self.position);
        let to_read = (buf.len() as u64).min(available) as usize;
        let mut done = 0usize;
        let mut file_pos = self.position;

        while done < to_read {
            let want = to_read - done;
            if file_pos >= self.initialized_length {
                let zero = want.min((self.length - file_pos) as usize);
                buf[done..done + zero].fill(0);
                done += zero;
                file_pos += zero as u64;
                continue;
            }

            let (segment, offset_in_segment) = self.locate(file_pos).ok_or(Error::OutOfBounds {
                reason: "cursor outside stream chain".into(),
            })?;
            let readable_here = (segment.data_area_size() - offset_in_segment) as usize;
            let take = want.min(readable_here).min((self.initialized_length - file_pos) as usize);
            file.read_exact_at(
                &mut buf[done..done + take],
                segment.data_area_start() + offset_in_segment,
            )?;
            done += take;
            file_pos += take as u64;
        }

        self.position += done as u64;
        Ok(done)
    }

    /// Write `buf` at the cursor, growing the stream (and its backing
    /// segments) first if the write extends past the current `length`.
    pub fn write(
        &mut self,
        file: &impl RandomAccess,
        header: &mut MasterHeader,
        free_space: &mut Chain,
        block_size: u64,
        sink: &mut impl Sink,
        buf: &[u8],
    ) -> Result<(), Error> {
        self.check_open()?;
        let end = self.position + buf.len() as u64;
        if end > self.length {
            grow_chain(&mut self.chain, file, header, free_space, end - self.length, block_size, sink)?;
            self.length = end;
        }

        if self.position > self.initialized_length {
            self.zero_fill(sink, self.initialized_length, self.position)?;
        }

        let mut written = 0usize;
        let mut file_pos = self.position;
        while written < buf.len() {
            let (segment, offset_in_segment) = self.locate(file_pos).ok_or(Error::OutOfBounds {
                reason: "write cursor outside stream chain".into(),
            })?;
            let space_here = (segment.data_area_size() - offset_in_segment) as usize;
            let take = (buf.len() - written).min(space_here);
            sink.write_all_at(
                segment.data_area_start() + offset_in_segment,
                &buf[written..written + take],
            )?;
            written += take;
            file_pos += take as u64;
        }

        self.position += buf.len() as u64;
        self.initialized_length = self.initialized_length.max(self.position);
        Ok(())
    }

    /// `SeekFrom::End(offset)` is deliberately evaluated as `length - offset`
    /// rather than POSIX's `length + offset`, matching the documented
    /// quirk this engine preserves.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u64, Error> {
        self.check_open()?;
        let new_position = match from {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(offset) => self.length as i128 - offset as i128,
        };
        if new_position < 0 {
            return Err(Error::OutOfBounds {
                reason: "seek before start of stream".into(),
            });
        }
        self.position = new_position as u64;
        Ok(self.position)
    }

    pub fn set_length(
        &mut self,
        file: &impl RandomAccess,
        header: &mut MasterHeader,
        free_space: &mut Chain,
        block_size: u64,
        sink: &mut impl Sink,
        new_length: u64,
    ) -> Result<(), Error> {
        self.check_open()?;
        if new_length > self.length {
            grow_chain(&mut self.chain, file, header, free_space, new_length - self.length, block_size, sink)?;
        } else if new_length < self.length {
            let shrink = self.length - new_length;
            let freed = self.chain.take_from_back(shrink, block_size, sink)?;
            free_space.add_segments(freed, sink)?;
        }
        self.length = new_length;
        self.initialized_length = self.initialized_length.min(new_length);
        self.position = self.position.min(new_length);
        Ok(())
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Physically zero the data-area bytes in `[from, to)`, in chunks no
    /// larger than one segment's data area at a time. Called before a write
    /// that lands past `initialized_length`: the gap between the old
    /// initialized length and the new write position must read back as
    /// zero even though `read` only synthesizes zeros past
    /// `initialized_length` — once this write advances `initialized_length`
    /// across the gap, the gap's bytes are "real" disk content as far as
    /// `read` is concerned, and may otherwise still hold another stream's
    /// former data from a reused free segment.
    fn zero_fill(&self, sink: &mut impl Sink, from: u64, to: u64) -> Result<(), Error> {
        let mut file_pos = from;
        while file_pos < to {
            let (segment, offset_in_segment) = self.locate(file_pos).ok_or(Error::OutOfBounds {
                reason: "zero-fill cursor outside stream chain".into(),
            })?;
            let space_here = segment.data_area_size() - offset_in_segment;
            let take = space_here.min(to - file_pos);
            sink.write_all_at(segment.data_area_start() + offset_in_segment, &vec![0u8; take as usize])?;
            file_pos += take;
        }
        Ok(())
    }

    /// Find the segment and in-segment byte offset covering data-offset
    /// `at`, walking the chain in order.
    fn locate(&self, at: u64) -> Option<(Segment, u64)> {
        let mut base = 0u64;
        for segment in &self.chain.segments {
            let size = segment.data_area_size();
            if at < base + size {
                return Some((*segment, at - base));
            }
            base += size;
        }
        None
    }
}

/// Extend `chain` by `additional` data-area bytes, growing the backing file
/// first if the free-space stream cannot satisfy the request on its own.
pub fn grow_chain(
    chain: &mut Chain,
    file: &impl RandomAccess,
    header: &mut MasterHeader,
    free_space: &mut Chain,
    additional: u64,
    block_size: u64,
    sink: &mut impl Sink,
) -> Result<(), Error> {
    let mut taken = free_space.take_from_front(additional, block_size, sink)?;
    let acquired: u64 = taken.iter().map(Segment::data_area_size).sum();

    if acquired < additional {
        let shortfall = additional - acquired;
        let extra_total = round_up(shortfall + crate::segment::STRUCTURE_SIZE, block_size);
        let old_file_length = header.file_length;
        file.set_len(old_file_length + extra_total)?;

        // If persisting the new segment's header fails, shrink the file back
        // down rather than leave an unreachable, un-headered tail behind.
        let shrink_back = scopeguard::guard(true, |should_shrink| {
            if should_shrink {
                let _ = file.set_len(old_file_length);
            }
        });

        let new_segment = Segment::new(old_file_length, extra_total, None);
        new_segment.persist_via(sink)?;
        scopeguard::ScopeGuard::into_inner(shrink_back);

        header.file_length = old_file_length + extra_total;
        taken.push(new_segment);
    }

    chain.add_segments(taken, sink)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use crate::journal::DirectSink;

    fn fresh_state() -> (MemoryFile, MasterHeader, Chain, OpenStreamState) {
        let file = MemoryFile::new();
        file.set_len(4096).unwrap();
        let header = MasterHeader::new(512);
        let free_space = Chain {
            segments: vec![Segment::new(512, 3584, None)],
        };
        let state = OpenStreamState::new(Chain::empty(), 0, 0, 0);
        (file, header, free_space, state)
    }

    #[test]
    fn write_then_read_back_roundtrips() {
        let (file, mut header, mut free_space, mut state) = fresh_state();
        let mut sink = DirectSink::new(&file);

        state
            .write(&file, &mut header, &mut free_space, 512, &mut sink, b"hello world")
            .unwrap();
        state.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 11];
        let n = state.read(&file, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_initialized_length_is_zero_filled() {
        let (file, mut header, mut free_space, mut state) = fresh_state();
        let mut sink = DirectSink::new(&file);

        state.set_length(&file, &mut header, &mut free_space, 512, &mut sink, 100).unwrap();
        state.write(&file, &mut header, &mut free_space, 512, &mut sink, b"AB").unwrap();

        state.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0xffu8; 10];
        state.read(&file, &mut buf).unwrap();
        assert_eq!(&buf[0..2], b"AB");
        assert_eq!(&buf[2..10], &[0u8; 8]);
    }

    #[test]
    fn write_past_initialized_length_zero_fills_the_gap_on_disk() {
        // Scenario 2: grow to 2048, write 4 bytes at offset 1000 without ever
        // writing 0..999 first. The gap must read back as zero even though
        // `initialized_length` now covers it (i.e. those bytes must actually
        // be zeroed on disk, not just treated as zero by `read`'s virtual
        // fill past `initialized_length`).
        let (file, mut header, mut free_space, mut state) = fresh_state();
        let mut sink = DirectSink::new(&file);

        // Poison the segment that will back position 1000 with non-zero
        // bytes first, the way a reused free-space segment might arrive
        // holding another stream's old data.
        state.set_length(&file, &mut header, &mut free_space, 512, &mut sink, 2048).unwrap();
        let (segment, _) = state.locate(1000).unwrap();
        sink.write_all_at(segment.data_area_start(), &[0xAAu8; 512]).unwrap();
        state.initialized_length = 0;

        state.seek(SeekFrom::Start(1000)).unwrap();
        state.write(&file, &mut header, &mut free_space, 512, &mut sink, &[0xFF; 4]).unwrap();

        state.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0xffu8; 2048];
        state.read(&file, &mut buf).unwrap();
        assert!(buf[0..1000].iter().all(|&b| b == 0), "gap before write position must read as zero");
        assert_eq!(&buf[1000..1004], &[0xFF; 4]);
        assert!(buf[1004..2048].iter().all(|&b| b == 0));
    }

    #[test]
    fn seek_from_end_subtracts_offset() {
        let (file, mut header, mut free_space, mut state) = fresh_state();
        let mut sink = DirectSink::new(&file);
        state.set_length(&file, &mut header, &mut free_space, 512, &mut sink, 100).unwrap();

        let pos = state.seek(SeekFrom::End(30)).unwrap();
        assert_eq!(pos, 70);
    }

    #[test]
    fn shrink_returns_tail_to_free_space() {
        let (file, mut header, mut free_space, mut state) = fresh_state();
        let mut sink = DirectSink::new(&file);
        state.set_length(&file, &mut header, &mut free_space, 512, &mut sink, 2000).unwrap();
        let free_before = free_space.data_size();

        state.set_length(&file, &mut header, &mut free_space, 512, &mut sink, 10).unwrap();
        assert!(free_space.data_size() > free_before);
        assert_eq!(state.length, 10);
    }

    #[test]
    fn operations_after_close_fail() {
        let mut state = OpenStreamState::new(Chain::empty(), 0, 0, 0);
        state.close();
        assert!(matches!(state.seek(SeekFrom::Start(0)), Err(Error::StreamClosed)));
    }
}
