//! The stream table: the system stream that records every other stream's
//! identity, tag and chain head (§4.3).

use uuid::Uuid;

use crate::{
    chain::Chain,
    error::Error,
    header::{loc_to_raw, raw_to_loc},
    journal::Sink,
};

/// 128-bit identifier for a stream. Opaque to callers beyond equality and
/// display; assigned by [`crate::storage::Storage::create_stream`].
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub(crate) const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub(crate) fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub(crate) fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

/// The reserved id of the stream table itself: fixed so `Storage::open` can
/// find it without consulting the table it's trying to load.
pub const STREAM_TABLE_ID: StreamId = StreamId::from_uuid(Uuid::from_u128(0));

/// The reserved id of the free-space stream.
pub const FREE_SPACE_ID: StreamId = StreamId::from_uuid(Uuid::from_u128(1));

/// On-disk size of one stream-table record:
/// `stream_id(16) + tag(4) + first_segment(8) + length(8) + initialized_length(8)`.
pub const RECORD_SIZE: u64 = 16 + 4 + 8 + 8 + 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamRecord {
    pub stream_id: StreamId,
    pub tag: u32,
    pub first_segment: Option<u64>,
    pub length: u64,
    pub initialized_length: u64,
}

impl StreamRecord {
    fn encode(&self) -> [u8; RECORD_SIZE as usize] {
        let mut buf = [0u8; RECORD_SIZE as usize];
        let mut at = 0;
        buf[at..at + 16].copy_from_slice(&self.stream_id.as_bytes());
        at += 16;
        buf[at..at + 4].copy_from_slice(&self.tag.to_le_bytes());
        at += 4;
        buf[at..at + 8].copy_from_slice(&loc_to_raw(self.first_segment).to_le_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&self.length.to_le_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&self.initialized_length.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; RECORD_SIZE as usize]) -> Self {
        let stream_id = StreamId::from_bytes(buf[0..16].try_into().unwrap());
        let tag = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let first_segment = raw_to_loc(i64::from_le_bytes(buf[20..28].try_into().unwrap()));
        let length = u64::from_le_bytes(buf[28..36].try_into().unwrap());
        let initialized_length = u64::from_le_bytes(buf[36..44].try_into().unwrap());
        Self {
            stream_id,
            tag,
            first_segment,
            length,
            initialized_length,
        }
    }

    /// A tombstone marking a removed slot: an all-zero id with a zero tag is
    /// never produced by `new_random` in practice, but we spell it out with
    /// an explicit marker tag instead of relying on that.
    fn is_tombstone(&self) -> bool {
        self.tag == TOMBSTONE_TAG
    }
}

const TOMBSTONE_TAG: u32 = u32::MAX;

/// The decoded contents of the stream-table stream: an unordered bag of
/// fixed-size records, scanned linearly (tables stay small enough in
/// practice — dozens to low thousands of streams — that no index is kept).
#[derive(Default)]
pub struct StreamTable {
    records: Vec<StreamRecord>,
}

impl StreamTable {
    pub fn decode_all(data: &[u8]) -> Result<Self, Error> {
        if data.len() % RECORD_SIZE as usize != 0 {
            return Err(Error::BadFormat);
        }
        let mut records = Vec::with_capacity(data.len() / RECORD_SIZE as usize);
        for chunk in data.chunks_exact(RECORD_SIZE as usize) {
            let record = StreamRecord::decode(chunk.try_into().unwrap());
            if !record.is_tombstone() {
                records.push(record);
            }
        }
        Ok(Self { records })
    }

    pub fn find(&self, id: StreamId) -> Option<StreamRecord> {
        self.records.iter().copied().find(|r| r.stream_id == id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.find(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.iter()
    }

    pub fn insert(&mut self, record: StreamRecord) {
        self.records.push(record);
    }

    pub fn update(&mut self, record: StreamRecord) -> Result<(), Error> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.stream_id == record.stream_id)
            .ok_or(Error::NoSuchStream(record.stream_id))?;
        *slot = record;
        Ok(())
    }

    pub fn remove(&mut self, id: StreamId) -> Result<(), Error> {
        let before = self.records.len();
        self.records.retain(|r| r.stream_id != id);
        if self.records.len() == before {
            return Err(Error::NoSuchStream(id));
        }
        Ok(())
    }

    /// Re-encode every live record back-to-back. The table never keeps
    /// tombstones on disk; `remove` above already dropped the in-memory
    /// entry, so a re-encode after any mutation compacts them away for free.
    pub fn encode_all(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.records.len() * RECORD_SIZE as usize);
        for record in &self.records {
            buf.extend_from_slice(&record.encode());
        }
        buf
    }
}

/// Persist the stream table's full contents into its chain, growing or
/// shrinking the chain as needed. Mirrors `StorageStream::write` at a smaller
/// scale, since the stream table does not need partial/cursor writes: the
/// whole table is always rewritten together.
pub fn rewrite_chain(
    chain: &mut Chain,
    table: &StreamTable,
    file: &impl crate::file::RandomAccess,
    header: &mut crate::header::MasterHeader,
    block_size: u64,
    free_space: &mut Chain,
    sink: &mut impl Sink,
) -> Result<(), Error> {
    let encoded = table.encode_all();
    let current = chain.data_size();
    let needed = encoded.len() as u64;

    if needed > current {
        let growth = needed - current;
        // Free space alone may not cover the growth; route through the same
        // file-extending path `storage_stream::grow_chain` uses so the table
        // can't silently fail to grow when the free-space chain is empty.
        crate::storage_stream::grow_chain(chain, file, header, free_space, growth, block_size, sink)?;
    } else if needed < current {
        let shrink = current - needed;
        let freed = chain.take_from_back(shrink, block_size, sink)?;
        free_space.add_segments(freed, sink)?;
    }

    write_spanning(chain, &encoded, sink)
}

/// Write `data` across a chain's data areas starting at data-offset zero,
/// honoring the chain's actual segment boundaries.
pub(crate) fn write_spanning(chain: &Chain, data: &[u8], sink: &mut impl Sink) -> Result<(), Error> {
    let mut written = 0usize;
    for segment in &chain.segments {
        if written >= data.len() {
            break;
        }
        let take = (segment.data_area_size() as usize).min(data.len() - written);
        sink.write_all_at(segment.data_area_start(), &data[written..written + take])?;
        written += take;
    }
    Ok(())
}
