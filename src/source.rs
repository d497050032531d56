//! The digital sequence source seam
//!
//! The sequence-file reader used during database creation is out of scope
//! (spec §1): the writer only needs something it can rewind and iterate
//! twice over, yielding already-digitized residue codes plus the metadata
//! fields. [`DigitalSequenceSource`] is that seam. [`VecSeqSource`] is a
//! small in-memory implementation used by this crate's own tests and
//! usable directly by callers who already hold their sequences in memory.

use crate::error::Result;

/// One digitized sequence record, as the writer expects to receive it.
///
/// `residues` holds codes indexed from 0 (no leading sentinel — the writer
/// adds that internally when it packs). `taxid` follows the metadata
/// record's signed 32-bit field (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub name: Vec<u8>,
    pub accession: Vec<u8>,
    pub description: Vec<u8>,
    pub taxid: i32,
    pub residues: Vec<u8>,
}

impl SeqRecord {
    #[must_use]
    pub fn new(name: impl Into<Vec<u8>>, residues: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            accession: Vec::new(),
            description: Vec::new(),
            taxid: 0,
            residues: residues.into(),
        }
    }
}

/// A rewindable source of digitized sequences.
///
/// The writer's first pass (spec §4.3) calls [`rewind`](Self::rewind) then
/// [`next_seq`](Self::next_seq) in a loop to gather counts and maxima; its
/// second pass rewinds again and re-iterates to actually write. A source
/// that cannot rewind (a true single-pass stream) cannot be used with this
/// writer, matching the original format's two-pass requirement.
pub trait DigitalSequenceSource {
    /// Returns the next sequence, or `Ok(None)` at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Write`] with
    /// [`crate::error::WriteError::SourceParseError`] if the underlying
    /// source reports malformed input.
    fn next_seq(&mut self) -> Result<Option<SeqRecord>>;

    /// Rewinds the source so the next `next_seq` call returns the first
    /// record again.
    fn rewind(&mut self) -> Result<()>;
}

/// An in-memory [`DigitalSequenceSource`] backed by a `Vec<SeqRecord>`.
#[derive(Debug, Clone, Default)]
pub struct VecSeqSource {
    records: Vec<SeqRecord>,
    pos: usize,
}

impl VecSeqSource {
    #[must_use]
    pub fn new(records: Vec<SeqRecord>) -> Self {
        Self { records, pos: 0 }
    }
}

impl DigitalSequenceSource for VecSeqSource {
    fn next_seq(&mut self) -> Result<Option<SeqRecord>> {
        if self.pos >= self.records.len() {
            return Ok(None);
        }
        let rec = self.records[self.pos].clone();
        self.pos += 1;
        Ok(Some(rec))
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}
