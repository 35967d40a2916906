//! The storage coordinator: bootstrap, the stream registry, and the
//! single-writer transaction model (§5, §6).

use std::collections::HashMap;
use std::io::SeekFrom;

use log::{debug, trace, warn};

use crate::{
    chain::Chain,
    error::Error,
    file::RandomAccess,
    free_space::FreeSpaceStream,
    header::MasterHeader,
    journal::{JournaledSink, Journal},
    segment::Segment,
    stream_table::{self, StreamId, StreamRecord, StreamTable, FREE_SPACE_ID, STREAM_TABLE_ID},
    storage_stream::{OpenStreamState, StorageStream},
    Options,
};

/// The open coordinator for one storage file. Holds the one file handle,
/// the two system streams' chains, and the registry of streams a caller has
/// opened. There is never more than one `Storage` per file: the single-writer
/// model is enforced by Rust's ownership rules rather than a runtime lock —
/// a caller simply cannot construct a second `Storage` over the same `F`
/// without first giving up the one they have.
pub struct Storage<F: RandomAccess> {
    file: F,
    header: MasterHeader,
    free_space: FreeSpaceStream,
    stream_table_chain: Chain,
    stream_table: StreamTable,
    open: HashMap<StreamId, OpenStreamState>,
    journal: Journal<F>,
}

impl<F: RandomAccess> Storage<F> {
    /// Format `file` as a brand-new, empty storage file.
    pub fn create(file: F, options: Options) -> Result<Self, Error> {
        let block_size = options.block_size.max(crate::header::MIN_BLOCK_SIZE);
        let mut header = MasterHeader::new(block_size);

        // The stream table can't describe itself (§4.3/§9), so its first
        // segment is bootstrapped directly at format time: one block at the
        // file's tail, right after the header's own block.
        let table_segment = Segment::new(header.file_length, block_size as u64, None);
        header.file_length += block_size as u64;
        file.set_len(header.file_length)?;

        let mut sink = crate::journal::DirectSink::new(&file);
        table_segment.persist_via(&mut sink)?;
        header.stream_table_location = Some(table_segment.location);
        header.write_via(&mut sink)?;
        file.sync_all()?;

        debug!("formatted new storage file, block_size={block_size}");

        Ok(Self {
            file,
            header,
            free_space: FreeSpaceStream::default(),
            stream_table_chain: Chain {
                segments: vec![table_segment],
            },
            stream_table: StreamTable::default(),
            open: HashMap::new(),
            journal: Journal::new(),
        })
    }

    /// Open an existing storage file, loading both system streams.
    pub fn open(file: F) -> Result<Self, Error> {
        let header = MasterHeader::read(&file)?;
        let free_space = FreeSpaceStream::load(&file, header.free_space_location)?;
        let stream_table_chain = Chain::load(&file, header.stream_table_location)?;
        let table_bytes = read_spanning(&file, &stream_table_chain)?;
        let stream_table = StreamTable::decode_all(&table_bytes)?;

        trace!(
            "opened storage file: {} live streams, {} free bytes",
            stream_table.iter().count(),
            free_space.total_free_bytes()
        );

        Ok(Self {
            file,
            header,
            free_space,
            stream_table_chain,
            stream_table,
            open: HashMap::new(),
            journal: Journal::new(),
        })
    }

    pub fn block_size(&self) -> u64 {
        self.header.block_size as u64
    }

    pub fn file_length(&self) -> u64 {
        self.header.file_length
    }

    pub fn free_space_segment_count(&self) -> usize {
        self.free_space.chain.segments.len()
    }

    // -- transactions --------------------------------------------------

    pub fn start_transaction(&mut self) {
        self.journal.begin();
    }

    /// Commit the currently open transaction. Refuses with
    /// `TransactionConflict` — rolling everything back instead — if an
    /// operation inside this transaction already failed and the caller
    /// tried to commit rather than roll back.
    pub fn commit_transaction(&mut self) -> Result<(), Error> {
        if self.journal.is_poisoned() {
            self.rollback_transaction()?;
            return Err(Error::TransactionConflict);
        }
        self.journal.commit();
        Ok(())
    }

    /// Undo every write made since the transaction started and discard it.
    ///
    /// The journal only restores file bytes; this also reloads the two
    /// system streams and refreshes every open stream's in-memory chain and
    /// length from the now-reverted stream table, so a caller's already-open
    /// [`StorageStream`] handles reflect the rollback too.
    pub fn rollback_transaction(&mut self) -> Result<(), Error> {
        warn!("rolling back open transaction");
        self.journal.rollback(&self.file)?;

        let header = MasterHeader::read(&self.file)?;
        self.free_space = FreeSpaceStream::load(&self.file, header.free_space_location)?;
        self.stream_table_chain = Chain::load(&self.file, header.stream_table_location)?;
        let table_bytes = read_spanning(&self.file, &self.stream_table_chain)?;
        self.stream_table = StreamTable::decode_all(&table_bytes)?;
        self.header = header;

        for (id, state) in self.open.iter_mut() {
            match self.stream_table.find(*id) {
                Some(record) => {
                    state.chain = Chain::load(&self.file, record.first_segment)?;
                    state.length = record.length;
                    state.initialized_length = record.initialized_length;
                    state.position = state.position.min(state.length);
                }
                None => state.close(),
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_open()
    }

    /// Run `body` inside a transaction, opening and closing one implicitly
    /// if the caller hasn't already started one explicitly. An explicit,
    /// still-open transaction is left for the caller to commit or roll back.
    fn auto_transaction<R>(&mut self, body: impl FnOnce(&mut Self) -> Result<R, Error>) -> Result<R, Error> {
        let owns_transaction = !self.in_transaction();
        if owns_transaction {
            self.start_transaction();
        }
        let result = body(self);
        if owns_transaction {
            match &result {
                Ok(_) => self.commit_transaction()?,
                Err(_) => {
                    self.rollback_transaction()?;
                }
            }
        } else if result.is_err() {
            self.journal.poison();
        }
        result
    }

    // -- streams ---------------------------------------------------------

    /// Create a new, empty stream under the caller-supplied id and record it
    /// in the stream table. Does not open it; call
    /// [`Storage::open_stream`] to get a handle.
    pub fn create_stream(&mut self, id: StreamId, tag: u32) -> Result<StreamId, Error> {
        self.auto_transaction(|this| {
            if id == STREAM_TABLE_ID || id == FREE_SPACE_ID || this.stream_table.contains(id) {
                return Err(Error::DuplicateStream(id));
            }

            this.stream_table.insert(StreamRecord {
                stream_id: id,
                tag,
                first_segment: None,
                length: 0,
                initialized_length: 0,
            });
            this.persist_stream_table()?;
            debug!("created stream {id}");
            Ok(id)
        })
    }

    /// Open a handle to an existing stream, loading its chain into memory.
    pub fn open_stream(&mut self, id: StreamId) -> Result<StorageStream, Error> {
        if self.open.contains_key(&id) {
            return Ok(StorageStream { id });
        }
        let record = self.stream_table.find(id).ok_or(Error::NoSuchStream(id))?;
        let chain = Chain::load(&self.file, record.first_segment)?;
        self.open.insert(
            id,
            OpenStreamState::new(chain, record.length, record.initialized_length, record.tag),
        );
        Ok(StorageStream { id })
    }

    /// Permanently remove a stream: its segments return to free space and
    /// its stream-table record is dropped. The stream must not be open.
    pub fn delete_stream(&mut self, id: StreamId) -> Result<(), Error> {
        if self.open.contains_key(&id) {
            return Err(Error::OutOfBounds {
                reason: "cannot delete an open stream".into(),
            });
        }
        self.auto_transaction(|this| {
            let record = this.stream_table.find(id).ok_or(Error::NoSuchStream(id))?;
            let chain = Chain::load(&this.file, record.first_segment)?;
            if !chain.is_empty() {
                let mut sink = JournaledSink {
                    file: &this.file,
                    journal: &mut this.journal,
                };
                this.free_space.add_segments(chain.segments, &mut sink)?;
            }
            this.stream_table.remove(id)?;
            this.persist_stream_table()?;
            debug!("deleted stream {id}");
            Ok(())
        })
    }

    pub fn read_stream(&mut self, stream: StorageStream, buf: &mut [u8]) -> Result<usize, Error> {
        let state = self.open.get_mut(&stream.id).ok_or(Error::NoSuchStream(stream.id))?;
        state.read(&self.file, buf)
    }

    pub fn write_stream(&mut self, stream: StorageStream, buf: &[u8]) -> Result<(), Error> {
        self.auto_transaction(|this| {
            let block_size = this.block_size();
            let state = this.open.get_mut(&stream.id).ok_or(Error::NoSuchStream(stream.id))?;
            let mut sink = JournaledSink {
                file: &this.file,
                journal: &mut this.journal,
            };
            state.write(
                &this.file,
                &mut this.header,
                &mut this.free_space.chain,
                block_size,
                &mut sink,
                buf,
            )?;
            this.sync_record(stream.id)
        })
    }

    pub fn seek_stream(&mut self, stream: StorageStream, from: SeekFrom) -> Result<u64, Error> {
        let state = self.open.get_mut(&stream.id).ok_or(Error::NoSuchStream(stream.id))?;
        state.seek(from)
    }

    pub fn set_stream_length(&mut self, stream: StorageStream, new_length: u64) -> Result<(), Error> {
        self.auto_transaction(|this| {
            let block_size = this.block_size();
            let state = this.open.get_mut(&stream.id).ok_or(Error::NoSuchStream(stream.id))?;
            let mut sink = JournaledSink {
                file: &this.file,
                journal: &mut this.journal,
            };
            state.set_length(
                &this.file,
                &mut this.header,
                &mut this.free_space.chain,
                block_size,
                &mut sink,
                new_length,
            )?;
            this.sync_record(stream.id)
        })
    }

    pub fn stream_length(&self, stream: StorageStream) -> Result<u64, Error> {
        Ok(self.open.get(&stream.id).ok_or(Error::NoSuchStream(stream.id))?.length)
    }

    pub fn stream_position(&self, stream: StorageStream) -> Result<u64, Error> {
        Ok(self.open.get(&stream.id).ok_or(Error::NoSuchStream(stream.id))?.position)
    }

    pub fn stream_tag(&self, stream: StorageStream) -> Result<u32, Error> {
        Ok(self.open.get(&stream.id).ok_or(Error::NoSuchStream(stream.id))?.tag)
    }

    /// Close an open stream handle, dropping its in-memory cursor state. The
    /// stream's durable contents are unaffected; a later `open_stream` with
    /// the same id reloads it from the stream table. Closing an already-closed
    /// handle is an error rather than a silent no-op.
    pub fn close_stream(&mut self, stream: StorageStream) -> Result<(), Error> {
        let mut state = self.open.remove(&stream.id).ok_or(Error::StreamClosed)?;
        state.close();
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), Error> {
        if self.journal.is_open() {
            self.rollback_transaction()?;
        }
        for (_, state) in self.open.iter_mut() {
            state.close();
        }
        self.open.clear();
        self.file.sync_all()?;
        Ok(())
    }

    // -- internal ----------------------------------------------------------

    /// After a stream's chain changes shape, push its new head/length back
    /// into the stream table and persist the table.
    fn sync_record(&mut self, id: StreamId) -> Result<(), Error> {
        let (first_segment, length, initialized_length, tag) = {
            let state = self.open.get(&id).ok_or(Error::NoSuchStream(id))?;
            (state.chain.first_location(), state.length, state.initialized_length, state.tag)
        };
        self.stream_table.update(StreamRecord {
            stream_id: id,
            tag,
            first_segment,
            length,
            initialized_length,
        })?;
        self.persist_stream_table()
    }

    fn persist_stream_table(&mut self) -> Result<(), Error> {
        let block_size = self.block_size();
        let mut sink = JournaledSink {
            file: &self.file,
            journal: &mut self.journal,
        };
        stream_table::rewrite_chain(
            &mut self.stream_table_chain,
            &self.stream_table,
            &self.file,
            &mut self.header,
            block_size,
            &mut self.free_space.chain,
            &mut sink,
        )?;
        self.header.stream_table_location = self.stream_table_chain.first_location();
        self.header.free_space_location = self.free_space.chain.first_location();
        self.header.write_via(&mut sink)?;
        Ok(())
    }
}

fn read_spanning(file: &impl RandomAccess, chain: &Chain) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; chain.data_size() as usize];
    let mut at = 0usize;
    for segment in &chain.segments {
        let size = segment.data_area_size() as usize;
        file.read_exact_at(&mut buf[at..at + size], segment.data_area_start())?;
        at += size;
    }
    Ok(buf)
}
