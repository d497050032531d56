//! On-disk headers for the three binary files, plus the human-readable stub
//!
//! Layouts follow spec §6 exactly. All multi-byte integers are little-endian
//! on the wire. Each binary header starts with the same `magic`/`tag` pair
//! (spec §3's cross-file invariant); `IndexHeader` additionally carries the
//! database-wide counts a caller needs before allocating anything.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::alphabet::AlphabetKind;
use crate::error::{HeaderError, Result};

/// Magic number identifying the little-endian dsqdata format, version 1.
pub const MAGIC: u32 = 0x6473_7131; // "1qsd" read as bytes, arbitrary but stable
/// The byte-swapped counterpart of [`MAGIC`], reserved for a future
/// cross-endian reading path (spec §9). Currently rejected with a clear
/// error rather than silently reinterpreted.
pub const SWAPPED_MAGIC: u32 = MAGIC.swap_bytes();

/// Size in bytes of the fixed-size index header.
pub const SIZE_INDEX_HEADER: usize = 4 + 4 + 4 + 4 + 4 + 4 + 4 + 8 + 8 + 8;
/// Size in bytes of an index record (`psq_end`, `metadata_end`).
pub const SIZE_INDEX_RECORD: usize = 8 + 8;
/// Size in bytes of the short metadata/sequence file headers.
pub const SIZE_SHORT_HEADER: usize = 4 + 4;

/// Format version written into the stub's first line.
pub const STUB_VERSION: u32 = 1;

/// The fixed-size header at the start of the `.dsqi` index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub magic: u32,
    pub tag: u32,
    pub alphatype: u32,
    /// Reserved for future use; always written as zero and never
    /// interpreted on read (spec §9's open question).
    pub flags: u32,
    pub max_namelen: u32,
    pub max_acclen: u32,
    pub max_desclen: u32,
    pub max_seqlen: u64,
    pub nseq: u64,
    pub nres: u64,
}

impl IndexHeader {
    #[must_use]
    pub fn alphabet(&self) -> Option<AlphabetKind> {
        AlphabetKind::from_u32(self.alphatype)
    }

    /// Reads and validates the index header from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidMagic`] if the magic number doesn't
    /// match, [`HeaderError::ByteSwappedUnsupported`] if it matches the
    /// swapped variant instead, or [`HeaderError::InvalidAlphabetType`] if
    /// `alphatype` isn't one of the three recognized kinds.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        reader.read_exact(&mut buf)?;
        let magic = LittleEndian::read_u32(&buf[0..4]);
        check_magic(magic, "index")?;
        let tag = LittleEndian::read_u32(&buf[4..8]);
        let alphatype = LittleEndian::read_u32(&buf[8..12]);
        if AlphabetKind::from_u32(alphatype).is_none() {
            return Err(HeaderError::InvalidAlphabetType(alphatype).into());
        }
        let flags = LittleEndian::read_u32(&buf[12..16]);
        let max_namelen = LittleEndian::read_u32(&buf[16..20]);
        let max_acclen = LittleEndian::read_u32(&buf[20..24]);
        let max_desclen = LittleEndian::read_u32(&buf[24..28]);
        let max_seqlen = LittleEndian::read_u64(&buf[28..36]);
        let nseq = LittleEndian::read_u64(&buf[36..44]);
        let nres = LittleEndian::read_u64(&buf[44..52]);
        Ok(Self {
            magic,
            tag,
            alphatype,
            flags,
            max_namelen,
            max_acclen,
            max_desclen,
            max_seqlen,
            nseq,
            nres,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        LittleEndian::write_u32(&mut buf[8..12], self.alphatype);
        LittleEndian::write_u32(&mut buf[12..16], 0); // flags: always zero on write
        LittleEndian::write_u32(&mut buf[16..20], self.max_namelen);
        LittleEndian::write_u32(&mut buf[20..24], self.max_acclen);
        LittleEndian::write_u32(&mut buf[24..28], self.max_desclen);
        LittleEndian::write_u64(&mut buf[28..36], self.max_seqlen);
        LittleEndian::write_u64(&mut buf[36..44], self.nseq);
        LittleEndian::write_u64(&mut buf[44..52], self.nres);
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// One index record: a pair of cumulative end offsets, each a post-write
/// position minus one (spec §4.3). Record 0 is reached from a notional
/// previous record whose offsets are both -1, so a sequence's extent is
/// always `this_record.field - previous_record.field`, previous defaulting
/// to -1 at the start of the database. `metadata_end` counts only the three
/// NUL-terminated strings of a metadata record, not its fixed 4-byte taxid
/// trailer (`src/reader.rs`'s loader adds that back per sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRecord {
    /// Cumulative packet count through this sequence, minus one.
    pub psq_end: i64,
    /// Cumulative metadata string-bytes (excluding taxid) through this
    /// sequence, minus one.
    pub metadata_end: i64,
}

impl IndexRecord {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; SIZE_INDEX_RECORD];
        reader.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; SIZE_INDEX_RECORD]) -> Self {
        Self {
            psq_end: LittleEndian::read_i64(&buf[0..8]),
            metadata_end: LittleEndian::read_i64(&buf[8..16]),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; SIZE_INDEX_RECORD];
        LittleEndian::write_i64(&mut buf[0..8], self.psq_end);
        LittleEndian::write_i64(&mut buf[8..16], self.metadata_end);
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// The short header shared by the metadata (`.dsqm`) and sequence
/// (`.dsqs`) files: just `magic` and `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortHeader {
    pub magic: u32,
    pub tag: u32,
}

impl ShortHeader {
    #[must_use]
    pub fn new(tag: u32) -> Self {
        Self { magic: MAGIC, tag }
    }

    pub fn read_from<R: Read>(reader: &mut R, file: &'static str) -> Result<Self> {
        let mut buf = [0u8; SIZE_SHORT_HEADER];
        reader.read_exact(&mut buf)?;
        let magic = LittleEndian::read_u32(&buf[0..4]);
        check_magic(magic, file)?;
        let tag = LittleEndian::read_u32(&buf[4..8]);
        Ok(Self { magic, tag })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; SIZE_SHORT_HEADER];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        writer.write_all(&buf)?;
        Ok(())
    }
}

fn check_magic(magic: u32, file: &'static str) -> Result<()> {
    if magic == MAGIC {
        return Ok(());
    }
    if magic == SWAPPED_MAGIC {
        return Err(HeaderError::ByteSwappedUnsupported(file).into());
    }
    Err(HeaderError::InvalidMagic {
        file,
        expected: MAGIC,
        found: magic,
    }
    .into())
}

/// Checks that `tag` (read from `file`) matches the index's authoritative
/// tag, per the cross-file invariant in spec §3.
pub fn check_tag(index_tag: u32, found: u32, file: &'static str) -> Result<()> {
    if index_tag == found {
        return Ok(());
    }
    Err(HeaderError::TagMismatch {
        file,
        index_tag,
        found,
    }
    .into())
}

/// Renders the human-readable stub file's contents.
///
/// Only the first line is formally parsed by [`parse_stub`]; everything
/// after it is free-form text a human reading the file might find useful,
/// never consulted by the reader (spec §6, §9).
#[must_use]
pub fn render_stub(tag: u32, alphabet: AlphabetKind, nseq: u64, nres: u64) -> String {
    format!(
        "Easel dsqdata v{STUB_VERSION} x{tag}\n\
         \n\
         This is a dsqdata format binary database, consisting of three\n\
         accompanying files (.dsqi, .dsqm, .dsqs) that must stay together\n\
         and unmodified. This stub is for human inspection only.\n\
         \n\
         alphabet : {alphabet}\n\
         nseq     : {nseq}\n\
         nres     : {nres}\n"
    )
}

/// Parses the stub's first line, returning the declared version and tag.
///
/// # Errors
///
/// Returns [`HeaderError::MalformedStub`] if the first line isn't
/// whitespace-separated as `Easel dsqdata v<version> x<tag>`.
pub fn parse_stub(contents: &str) -> Result<(u32, u32)> {
    let first_line = contents.lines().next().unwrap_or("");
    let tokens: Vec<&str> = first_line.split_whitespace().collect();
    let malformed = || HeaderError::MalformedStub(first_line.to_string()).into();

    if tokens.len() != 4 || tokens[0] != "Easel" || tokens[1] != "dsqdata" {
        return Err(malformed());
    }
    let version = tokens[2]
        .strip_prefix('v')
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let tag = tokens[3]
        .strip_prefix('x')
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    Ok((version, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn index_header_roundtrip() {
        let header = IndexHeader {
            magic: MAGIC,
            tag: 0xdead_beef,
            alphatype: AlphabetKind::Dna.as_u32(),
            flags: 0,
            max_namelen: 10,
            max_acclen: 20,
            max_desclen: 30,
            max_seqlen: 1000,
            nseq: 42,
            nres: 9999,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), SIZE_INDEX_HEADER);
        let mut cursor = Cursor::new(buf);
        let parsed = IndexHeader::read_from(&mut cursor).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; SIZE_SHORT_HEADER];
        LittleEndian::write_u32(&mut buf[0..4], 0x1234_5678);
        let mut cursor = Cursor::new(buf);
        let err = ShortHeader::read_from(&mut cursor, "metadata").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Header(HeaderError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn swapped_magic_is_a_distinct_error() {
        let mut buf = vec![0u8; SIZE_SHORT_HEADER];
        LittleEndian::write_u32(&mut buf[0..4], SWAPPED_MAGIC);
        let mut cursor = Cursor::new(buf);
        let err = ShortHeader::read_from(&mut cursor, "sequence").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Header(HeaderError::ByteSwappedUnsupported("sequence"))
        ));
    }

    #[test]
    fn stub_roundtrip() {
        let text = render_stub(123, AlphabetKind::Protein, 7, 700);
        let (version, tag) = parse_stub(&text).unwrap();
        assert_eq!(version, STUB_VERSION);
        assert_eq!(tag, 123);
    }

    #[test]
    fn malformed_stub_is_rejected() {
        assert!(parse_stub("not a stub file\n").is_err());
    }
}
