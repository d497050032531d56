//! The two-pass database writer
//!
//! Building a dsqdata database requires knowing several database-wide
//! maxima before the first byte of any fixed-size header can be written
//! (spec §4.3): the sequence count, total residue count, longest sequence,
//! and longest name/accession/description. The writer therefore makes two
//! passes over the caller's [`DigitalSequenceSource`]: pass one gathers
//! those numbers, pass two actually packs and writes everything. This
//! mirrors the teacher's `Encoder` in `src/bq/writer.rs`, generalized from
//! a single-pass 2-bit encoder reusing scratch buffers to a two-pass
//! mixed-packing encoder that additionally must rewind its source.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::{Alphabet, AlphabetKind};
use crate::codec::{pack_5bit, pack_mixed};
use crate::error::{Result, WriteError};
use crate::header::{render_stub, IndexHeader, IndexRecord, ShortHeader};
use crate::source::DigitalSequenceSource;

/// Builds a [`Writer`], mirroring the teacher's `*Builder` pattern for
/// configuring a writer before it touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct WriterBuilder {
    base_path: Option<PathBuf>,
}

impl WriterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base path; the writer appends `.dsqi`/`.dsqm`/`.dsqs` and
    /// the extensionless stub to this path (spec §6).
    #[must_use]
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Runs both passes over `source` and writes all four files.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::OpenFailed`] if any output file cannot be
    /// created, [`WriteError::SequenceTooLong`] if a sequence's packet
    /// count would overflow the packets-per-chunk bound the reader relies
    /// on, or any error the source itself reports while iterating.
    /// [`Alphabet::kind`] returning anything other than protein, DNA, or
    /// RNA cannot occur: [`AlphabetKind`] is a closed three-variant enum,
    /// so the "any other alphabet is rejected" clause of the format is
    /// enforced by the type system rather than at runtime.
    pub fn write(self, alphabet: &impl Alphabet, source: &mut impl DigitalSequenceSource) -> Result<()> {
        let base_path = self
            .base_path
            .expect("WriterBuilder::write called without a base_path");
        Writer::write_database(&base_path, alphabet.kind(), source)
    }
}

/// Stateless entry point for writing a complete dsqdata database.
///
/// There is no long-lived `Writer` value: unlike the reader, which holds
/// open files and worker threads across many calls, writing is a single
/// two-pass operation over one source, so the natural API is a function,
/// reached through [`WriterBuilder`] for configuration symmetry with
/// [`crate::reader::ReaderBuilder`].
pub struct Writer;

struct Totals {
    nseq: u64,
    nres: u64,
    max_seqlen: u64,
    max_namelen: u32,
    max_acclen: u32,
    max_desclen: u32,
}

impl Writer {
    fn write_database(
        base_path: &Path,
        alphatype: AlphabetKind,
        source: &mut impl DigitalSequenceSource,
    ) -> Result<()> {
        let totals = Self::pass_one(source)?;
        let tag: u32 = rand::random();

        let index_path = with_ext(base_path, "dsqi");
        let metadata_path = with_ext(base_path, "dsqm");
        let sequence_path = with_ext(base_path, "dsqs");

        let mut index_out = create(&index_path)?;
        let mut metadata_out = create(&metadata_path)?;
        let mut sequence_out = create(&sequence_path)?;

        let index_header = IndexHeader {
            magic: crate::header::MAGIC,
            tag,
            alphatype: alphatype.as_u32(),
            flags: 0,
            max_namelen: totals.max_namelen,
            max_acclen: totals.max_acclen,
            max_desclen: totals.max_desclen,
            max_seqlen: totals.max_seqlen,
            nseq: totals.nseq,
            nres: totals.nres,
        };
        index_header.write_to(&mut index_out)?;
        ShortHeader::new(tag).write_to(&mut metadata_out)?;
        ShortHeader::new(tag).write_to(&mut sequence_out)?;

        source.rewind()?;
        let mut packets = Vec::new();
        // Index offsets are cumulative positions minus one (spec §4.3):
        // record 0 is reached from a notional previous record whose
        // offsets are -1, so a zero-packet first sequence writes psq_end
        // -1 (scenario 1). `metadata_end` tracks only the three
        // NUL-terminated strings, not the fixed-width taxid trailer that
        // follows them on disk — the reader knows its size (4 bytes) per
        // sequence without needing it cumulatively tracked.
        let mut psq_end: i64 = -1;
        let mut metadata_end: i64 = -1;
        let mut seq_index = 0u64;
        while let Some(record) = source.next_seq()? {
            match alphatype {
                AlphabetKind::Protein => pack_5bit(&record.residues, &mut packets),
                AlphabetKind::Dna | AlphabetKind::Rna => pack_mixed(&record.residues, &mut packets),
            }
            if packets.len() as u64 > u32::MAX as u64 {
                return Err(WriteError::SequenceTooLong {
                    index: seq_index,
                    len: record.residues.len() as u64,
                }
                .into());
            }
            for p in &packets {
                sequence_out.write_all(&p.to_le_bytes())?;
            }
            psq_end += packets.len() as i64;

            metadata_out.write_all(&record.name)?;
            metadata_out.write_all(&[0])?;
            metadata_out.write_all(&record.accession)?;
            metadata_out.write_all(&[0])?;
            metadata_out.write_all(&record.description)?;
            metadata_out.write_all(&[0])?;
            metadata_out.write_all(&record.taxid.to_le_bytes())?;
            metadata_end += (record.name.len() + record.accession.len() + record.description.len()
                + 3) as i64;

            IndexRecord {
                psq_end,
                metadata_end,
            }
            .write_to(&mut index_out)?;
            seq_index += 1;
        }

        index_out.flush()?;
        metadata_out.flush()?;
        sequence_out.flush()?;

        let stub = render_stub(tag, alphatype, totals.nseq, totals.nres);
        std::fs::write(base_path, stub).map_err(|source| WriteError::OpenFailed {
            path: base_path.to_path_buf(),
            source,
        })?;

        Ok(())
    }

    fn pass_one(source: &mut impl DigitalSequenceSource) -> Result<Totals> {
        source.rewind()?;
        let mut totals = Totals {
            nseq: 0,
            nres: 0,
            max_seqlen: 0,
            max_namelen: 0,
            max_acclen: 0,
            max_desclen: 0,
        };
        while let Some(record) = source.next_seq()? {
            totals.nseq += 1;
            totals.nres += record.residues.len() as u64;
            totals.max_seqlen = totals.max_seqlen.max(record.residues.len() as u64);
            totals.max_namelen = totals.max_namelen.max(record.name.len() as u32);
            totals.max_acclen = totals.max_acclen.max(record.accession.len() as u32);
            totals.max_desclen = totals.max_desclen.max(record.description.len() as u32);
        }
        Ok(totals)
    }
}

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut p = base.as_os_str().to_owned();
    p.push(".");
    p.push(ext);
    PathBuf::from(p)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| {
            WriteError::OpenFailed {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderBuilder;
    use crate::source::{SeqRecord, VecSeqSource};
    use tempfile::tempdir;

    #[test]
    fn writes_and_reopens_a_small_protein_database() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("mydb");

        let mut source = VecSeqSource::new(vec![
            SeqRecord::new("seq1", vec![0, 1, 2, 3, 4]),
            SeqRecord::new("seq2", vec![]),
            SeqRecord::new("seq3", vec![5, 6, 7, 8, 9, 10, 11, 12]),
        ]);

        WriterBuilder::new()
            .base_path(&base)
            .write(&AlphabetKind::Protein, &mut source)
            .unwrap();

        assert!(with_ext(&base, "dsqi").exists());
        assert!(with_ext(&base, "dsqm").exists());
        assert!(with_ext(&base, "dsqs").exists());
        assert!(base.exists());

        let mut reader = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Protein)
            .open()
            .unwrap();
        let summary = reader.summary();
        assert_eq!(summary.nseq, 3);
        assert_eq!(summary.nres, 13);
        reader.close().unwrap();
    }

    #[test]
    fn empty_first_sequence_writes_minus_one_convention_offsets() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("mydb");
        let mut source = VecSeqSource::new(vec![SeqRecord::new("x", vec![])]);

        WriterBuilder::new()
            .base_path(&base)
            .write(&AlphabetKind::Protein, &mut source)
            .unwrap();

        let mut index_file = std::fs::File::open(with_ext(&base, "dsqi")).unwrap();
        let header = IndexHeader::read_from(&mut index_file).unwrap();
        assert_eq!(header.nseq, 1);
        let record = IndexRecord::read_from(&mut index_file).unwrap();
        assert_eq!(record.psq_end, -1);
        assert_eq!(record.metadata_end, 3);
    }

    #[test]
    fn rejects_mismatched_alphabet_on_reopen() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("mydb");
        let mut source = VecSeqSource::new(vec![SeqRecord::new(
            "seq1",
            vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2],
        )]);
        WriterBuilder::new()
            .base_path(&base)
            .write(&AlphabetKind::Dna, &mut source)
            .unwrap();

        let err = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Protein)
            .open()
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Incompatible(_)));
    }
}
