//! Backing store abstraction.
//!
//! The engine never assumes it owns a real [`std::fs::File`]: tests run the
//! exact same code against an in-memory buffer so that the property tests in
//! `storage.rs` and `free_space.rs` stay fast and deterministic. This mirrors
//! the split between a real and an in-memory backend used elsewhere in this
//! workspace for segment storage.

use std::{
    fs::File,
    io,
    sync::{Arc, RwLock},
};

/// Positional, random-access read/write over the single backing file.
///
/// All offsets are absolute from the start of the file. Implementations must
/// grow the underlying storage on [`RandomAccess::set_len`], not on write:
/// every write in this crate targets a region that has already been sized.
pub trait RandomAccess {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;
    fn len(&self) -> io::Result<u64>;
    fn set_len(&self, len: u64) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

#[cfg(unix)]
impl RandomAccess for File {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

#[cfg(not(unix))]
impl RandomAccess for File {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// An in-memory [`RandomAccess`] implementation backed by a growable byte
/// buffer, used by tests in place of a real file.
///
/// Unlike a real file, growth and reads/writes are never partially visible:
/// the whole buffer sits behind a single lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryFile(Arc<RwLock<Vec<u8>>>);

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current contents, for comparing before/after a rolled
    /// back transaction in tests.
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.read().unwrap().clone()
    }
}

impl RandomAccess for MemoryFile {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let inner = self.0.read().unwrap();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end > inner.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of file"));
        }
        buf.copy_from_slice(&inner[start..end]);
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut inner = self.0.write().unwrap();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end > inner.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of file"));
        }
        inner[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.0.read().unwrap().len() as u64)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.0.write().unwrap().resize(len as usize, 0);
        Ok(())
    }

    fn sync_all(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_then_read_write() {
        let f = MemoryFile::new();
        f.set_len(16).unwrap();
        f.write_all_at(b"hello", 4).unwrap();

        let mut buf = [0u8; 5];
        f.read_exact_at(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_end_fails() {
        let f = MemoryFile::new();
        f.set_len(4).unwrap();
        let mut buf = [0u8; 8];
        assert!(f.read_exact_at(&mut buf, 0).is_err());
    }
}
