use std::io;

use thiserror::Error;

use crate::stream_table::StreamId;

/// Every failure mode the engine can surface to a caller.
///
/// Mutating calls roll the in-progress transaction back before returning any
/// of these; reads never have side effects on error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("master header magic or version mismatch")]
    BadFormat,

    #[error("segment header checksum mismatch at location {location}")]
    ChecksumMismatch { location: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("stream is closed")]
    StreamClosed,

    #[error("no such stream: {0}")]
    NoSuchStream(StreamId),

    #[error("stream already exists: {0}")]
    DuplicateStream(StreamId),

    #[error("out of bounds: {reason}")]
    OutOfBounds { reason: String },

    #[error("rollback encountered while committing")]
    TransactionConflict,
}

pub type Result<T> = std::result::Result<T, Error>;
