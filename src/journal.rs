//! Transactional write-through: before every mutating write we record the
//! bytes currently at that offset in a side `.journal` file, so an aborted
//! transaction can restore them in reverse order (§4.7).

use std::marker::PhantomData;

use crate::{error::Error, file::RandomAccess};

/// Anything that accepts positional writes that must be undoable. `Storage`
/// implements this through its journal; [`DirectSink`] implements it as a
/// pass-through for writes that predate any open transaction (e.g. formatting
/// a brand-new file).
pub trait Sink {
    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error>;
}

/// A [`Sink`] that writes straight to the file with no journaling. Only valid
/// when there is nothing yet to roll back to.
pub struct DirectSink<'a, F: RandomAccess> {
    file: &'a F,
}

impl<'a, F: RandomAccess> DirectSink<'a, F> {
    pub fn new(file: &'a F) -> Self {
        Self { file }
    }
}

impl<'a, F: RandomAccess> Sink for DirectSink<'a, F> {
    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }
}

/// A [`Sink`] that journals through to a file. Borrows its two fields
/// separately (rather than borrowing some owning struct as a whole) so that
/// callers holding other disjoint `&mut` borrows into the same struct (e.g.
/// `Storage`'s free-space chain or master header) can construct one of these
/// inline without fighting the borrow checker.
pub struct JournaledSink<'a, F: RandomAccess> {
    pub file: &'a F,
    pub journal: &'a mut Journal<F>,
}

impl<'a, F: RandomAccess> Sink for JournaledSink<'a, F> {
    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.journal.write_through(self.file, offset, data)
    }
}

/// One recorded before-image: the bytes that lived at `offset` before a
/// transactional write overwrote them.
struct Record {
    offset: u64,
    before: Vec<u8>,
}

/// The undo log for the single in-progress transaction.
///
/// `Journal` does not own a file handle of its own; the before-images are
/// kept in memory (the engine only ever has one writer, and a transaction's
/// total write volume is bounded by what a single caller does between
/// `start_transaction` and `commit_transaction`). This keeps the journal
/// itself crash-proof-by-simplicity: if the process dies mid-transaction, the
/// next `Storage::open` just never replays a `.journal` it never wrote,
/// because nothing was appended to the real file outside of a transaction.
#[derive(Default)]
pub struct Journal<F> {
    records: Vec<Record>,
    depth: u32,
    /// Set when an operation inside an explicitly-opened (caller-managed)
    /// transaction fails. A poisoned transaction can still be rolled back,
    /// but `commit_transaction` must refuse it — committing would persist
    /// whatever partial writes happened before the failure.
    poisoned: bool,
    _marker: PhantomData<F>,
}

impl<F: RandomAccess> Journal<F> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            depth: 0,
            poisoned: false,
            _marker: PhantomData,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn begin(&mut self) {
        self.depth += 1;
    }

    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Record the bytes currently at `offset..offset+data.len()` before they
    /// get overwritten, then perform the write.
    pub fn write_through(&mut self, file: &F, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut before = vec![0u8; data.len()];
        file.read_exact_at(&mut before, offset)?;
        self.records.push(Record { offset, before });
        file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Undo every recorded write, most recent first, and clear the log. Used
    /// both by an explicit rollback and by `commit_transaction` dropping back
    /// to depth zero on a nested transaction that was itself marked for
    /// rollback.
    pub fn rollback(&mut self, file: &F) -> Result<(), Error> {
        while let Some(record) = self.records.pop() {
            file.write_all_at(&record.before, record.offset)?;
        }
        self.depth = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Drop one level of nesting. At depth zero the transaction is fully
    /// committed and the log is discarded (the writes already happened).
    pub fn commit(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
        }
        if self.depth == 0 {
            self.records.clear();
        }
    }

    pub fn is_open(&self) -> bool {
        self.depth > 0
    }
}
