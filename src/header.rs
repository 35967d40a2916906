//! The master header: the fixed record at offset zero of the backing file.

use crate::{error::Error, file::RandomAccess};

pub const MAGIC: [u8; 4] = *b"SSTE";
pub const VERSION: u16 = 1;

/// Sentinel written in place of an absent segment location.
pub const ABSENT: i64 = -1;

pub const MIN_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// On-disk size of the header record itself. The header occupies a whole
/// block on disk (the remainder is zero-padded), so the first real segment
/// never overlaps it.
pub const ENCODED_LEN: usize = 4 + 2 + 4 + 8 + 8 + 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MasterHeader {
    pub version: u16,
    pub block_size: u32,
    pub stream_table_location: Option<u64>,
    pub free_space_location: Option<u64>,
    pub file_length: u64,
}

impl MasterHeader {
    pub fn new(block_size: u32) -> Self {
        Self {
            version: VERSION,
            block_size,
            stream_table_location: None,
            free_space_location: None,
            file_length: block_size as u64,
        }
    }

    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        let mut at = 0;
        buf[at..at + 4].copy_from_slice(&MAGIC);
        at += 4;
        buf[at..at + 2].copy_from_slice(&self.version.to_le_bytes());
        at += 2;
        buf[at..at + 4].copy_from_slice(&self.block_size.to_le_bytes());
        at += 4;
        buf[at..at + 8].copy_from_slice(&loc_to_raw(self.stream_table_location).to_le_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&loc_to_raw(self.free_space_location).to_le_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&(self.file_length as i64).to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; ENCODED_LEN]) -> Result<Self, Error> {
        if buf[0..4] != MAGIC {
            return Err(Error::BadFormat);
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version > VERSION {
            return Err(Error::BadFormat);
        }
        let block_size = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        if block_size < MIN_BLOCK_SIZE {
            return Err(Error::BadFormat);
        }
        let stream_table_location = raw_to_loc(i64::from_le_bytes(buf[10..18].try_into().unwrap()));
        let free_space_location = raw_to_loc(i64::from_le_bytes(buf[18..26].try_into().unwrap()));
        let file_length = i64::from_le_bytes(buf[26..34].try_into().unwrap()) as u64;

        Ok(Self {
            version,
            block_size,
            stream_table_location,
            free_space_location,
            file_length,
        })
    }

    pub fn read<F: RandomAccess>(file: &F) -> Result<Self, Error> {
        let mut buf = [0u8; ENCODED_LEN];
        file.read_exact_at(&mut buf, 0)?;
        Self::decode(&buf)
    }

    pub fn write<F: RandomAccess>(&self, file: &F) -> Result<(), Error> {
        file.write_all_at(&self.encode(), 0)?;
        Ok(())
    }

    /// Write the header through a [`crate::journal::Sink`].
    pub fn write_via(&self, sink: &mut impl crate::journal::Sink) -> Result<(), Error> {
        sink.write_all_at(0, &self.encode())
    }
}

pub(crate) fn loc_to_raw(loc: Option<u64>) -> i64 {
    loc.map(|l| l as i64).unwrap_or(ABSENT)
}

pub(crate) fn raw_to_loc(raw: i64) -> Option<u64> {
    if raw == ABSENT {
        None
    } else {
        Some(raw as u64)
    }
}
