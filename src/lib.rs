//! A segmented, single-writer transactional storage engine: many named byte
//! streams multiplexed into one backing file, each a singly-linked chain of
//! block-aligned segments, with before-image journaling for rollback.
//!
//! ```no_run
//! use seg_storage::{Options, Storage, StreamId};
//! use std::fs::OpenOptions;
//!
//! # fn main() -> Result<(), seg_storage::Error> {
//! let file = OpenOptions::new().read(true).write(true).create(true).open("data.seg")?;
//! let mut storage = Storage::create(file, Options::default())?;
//! let id = StreamId::new_random();
//! storage.create_stream(id, 0)?;
//! let stream = storage.open_stream(id)?;
//! storage.write_stream(stream, b"hello")?;
//! storage.close()?;
//! # Ok(())
//! # }
//! ```

mod chain;
mod error;
mod file;
mod free_space;
mod header;
mod journal;
mod segment;
mod storage;
mod storage_stream;
mod stream_table;

pub use error::{Error, Result};
pub use file::{MemoryFile, RandomAccess};
pub use storage::Storage;
pub use storage_stream::StorageStream;
pub use stream_table::StreamId;

/// Configuration for formatting a new storage file. There is deliberately no
/// way to supply these from the environment or a CLI: a storage file's block
/// size is a structural property fixed for its whole lifetime, not a runtime
/// tunable, so callers set it once at `Storage::create` time in code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    /// Minimum allocation granularity, in bytes. Every segment's size is a
    /// multiple of this. Must be at least [`header::MIN_BLOCK_SIZE`].
    pub block_size: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: header::DEFAULT_BLOCK_SIZE,
        }
    }
}
