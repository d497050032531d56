//! The chunk: the unit of work handed from loader to unpacker to consumers
//!
//! A chunk holds `n` consecutive sequences (spec §4.2), indexed `i0..i0+n`
//! in the database. `n == 0` is the distinguished end-of-data chunk (spec
//! §4.6). The loader thread fills `packed` and `metadata` with raw bytes
//! read straight off disk plus the per-sequence packet-count deltas it
//! derived from the index window; the unpacker thread then decodes
//! `packed` into `dsq` (per [`crate::codec`]) and scans `metadata` into the
//! per-sequence fields consumers actually read. `packed` and `dsq` are
//! separate buffers rather than one aliased allocation (see
//! `DESIGN.md`'s note on `src/codec.rs`); each still only grows, never
//! reallocating smaller, across a recycled chunk's lifetime.
//!
//! Chunks are recycled through the reader's LIFO free stack (spec §4.7)
//! rather than reallocated per use, so every `Vec` here is cleared and
//! reused, never reallocated unless it needs to grow.

use crate::codec::{self, RESIDUE_SENTINEL};
use crate::error::{ReadError, Result};

/// One decoded sequence's metadata fields, borrowed from a [`Chunk`].
#[derive(Debug, Clone, Copy)]
pub struct SeqView<'a> {
    pub name: &'a [u8],
    pub accession: &'a [u8],
    pub description: &'a [u8],
    pub taxid: i32,
    pub residues: &'a [u8],
}

/// A reusable buffer of `n` consecutive decoded sequences.
///
/// `packed` is populated by the loader and holds raw packet bytes laid out
/// contiguously (one sequence's packets after the previous one's); `dsq` is
/// the decode destination [`Chunk::unpack`] writes into, one sequence at a
/// time, via [`crate::codec::decode_one_sequence`]. After `unpack` runs,
/// [`Chunk::seq`] returns fully decoded views.
#[derive(Debug, Default)]
pub struct Chunk {
    /// Index (in the database) of this chunk's first sequence.
    pub i0: u64,
    /// Number of sequences in this chunk. Zero marks end-of-data.
    pub n: u64,
    /// Number of packets loaded into `packed`.
    pub pn: u64,

    /// Raw packet bytes for all `n` sequences, back to back.
    packed: Vec<u8>,
    /// Packet count for each of the `n` sequences, in order.
    psq_counts: Vec<u64>,

    /// Decoded residues for all `n` sequences, back to back, each bracketed
    /// by [`RESIDUE_SENTINEL`] bytes.
    dsq: Vec<u8>,
    /// Byte offset into `dsq` of each sequence's leading sentinel.
    dsq_offset: Vec<usize>,
    /// Residue count for each sequence (excludes both sentinels).
    len: Vec<u64>,

    /// Raw metadata bytes for all `n` sequences, back to back.
    metadata: Vec<u8>,
    name: Vec<Vec<u8>>,
    accession: Vec<Vec<u8>>,
    description: Vec<Vec<u8>>,
    taxid: Vec<i32>,
}

impl Chunk {
    /// Creates an empty chunk, ready to be filled by the loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The distinguished end-of-data chunk: `n == 0`, carrying only the
    /// index one past the database's last sequence.
    #[must_use]
    pub fn eod(i0: u64) -> Self {
        Self {
            i0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_eod(&self) -> bool {
        self.n == 0
    }

    /// Clears all content but keeps every `Vec`'s allocated capacity, so a
    /// recycled chunk costs no allocation the next time the loader fills it.
    pub fn reset(&mut self) {
        self.i0 = 0;
        self.n = 0;
        self.pn = 0;
        self.packed.clear();
        self.psq_counts.clear();
        self.dsq.clear();
        self.dsq_offset.clear();
        self.len.clear();
        self.metadata.clear();
        self.name.clear();
        self.accession.clear();
        self.description.clear();
        self.taxid.clear();
    }

    /// Mutable access to the loader's raw-bytes staging areas, plus the
    /// per-sequence bookkeeping it must fill in alongside them.
    pub(crate) fn loader_parts(
        &mut self,
    ) -> (&mut Vec<u8>, &mut Vec<u64>, &mut Vec<u8>) {
        (&mut self.packed, &mut self.psq_counts, &mut self.metadata)
    }

    pub(crate) fn set_header(&mut self, i0: u64, n: u64, pn: u64) {
        self.i0 = i0;
        self.n = n;
        self.pn = pn;
    }

    /// Decodes every sequence's packets and metadata fields.
    ///
    /// Run once by the unpacker thread per chunk (spec §4.4, §4.5), never
    /// by a consumer. Idempotent is not guaranteed: call exactly once per
    /// load.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Packet`] if a sequence's packet
    /// stream doesn't end with a final-packet sentinel where expected, or
    /// [`ReadError::MalformedMetadata`] if a metadata record runs past the
    /// end of the metadata buffer.
    pub fn unpack(&mut self) -> Result<()> {
        debug_assert_eq!(self.psq_counts.len() as u64, self.n);

        // Worst case per packet is 15x expansion (a full 2-bit packet), plus
        // two sentinel bytes per sequence.
        let cap = self.packed.len() * 15 + 2 * self.n as usize + 16;
        if self.dsq.len() < cap {
            self.dsq.resize(cap, 0);
        }

        let mut read_pos = 0usize;
        let mut write = 0usize;
        for (seq_index, &n_packets) in self.psq_counts.iter().enumerate() {
            let (new_pos, decoded) = codec::decode_one_sequence(
                &self.packed,
                read_pos,
                n_packets,
                &mut self.dsq,
                write,
                self.i0 as usize + seq_index,
            )?;
            read_pos = new_pos;
            write = decoded.dsq_offset + decoded.len as usize + 2;
            self.dsq_offset.push(decoded.dsq_offset);
            self.len.push(decoded.len);
        }

        self.scan_metadata()?;
        Ok(())
    }

    /// Walks `metadata` exactly `n` times, each record three
    /// NUL-terminated byte strings (name, accession, description) followed
    /// by a little-endian `i32` taxid (spec §3, §4.5).
    fn scan_metadata(&mut self) -> Result<()> {
        let mut pos = 0usize;
        for record in 0..self.n as usize {
            let name = self.read_cstring(&mut pos, record)?;
            let accession = self.read_cstring(&mut pos, record)?;
            let description = self.read_cstring(&mut pos, record)?;
            if pos + 4 > self.metadata.len() {
                return Err(ReadError::MalformedMetadata {
                    chunk_i0: self.i0,
                    record,
                }
                .into());
            }
            let taxid = i32::from_le_bytes(self.metadata[pos..pos + 4].try_into().unwrap());
            pos += 4;

            self.name.push(name);
            self.accession.push(accession);
            self.description.push(description);
            self.taxid.push(taxid);
        }
        Ok(())
    }

    fn read_cstring(&self, pos: &mut usize, record: usize) -> Result<Vec<u8>> {
        let start = *pos;
        let end = self.metadata[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|rel| start + rel)
            .ok_or(ReadError::MalformedMetadata {
                chunk_i0: self.i0,
                record,
            })?;
        *pos = end + 1;
        Ok(self.metadata[start..end].to_vec())
    }

    /// Returns the decoded view of sequence `local_index` (0-based within
    /// this chunk), after [`Chunk::unpack`] has run.
    #[must_use]
    pub fn seq(&self, local_index: usize) -> SeqView<'_> {
        let offset = self.dsq_offset[local_index];
        let len = self.len[local_index] as usize;
        debug_assert_eq!(self.dsq[offset], RESIDUE_SENTINEL);
        debug_assert_eq!(self.dsq[offset + 1 + len], RESIDUE_SENTINEL);
        SeqView {
            name: &self.name[local_index],
            accession: &self.accession[local_index],
            description: &self.description[local_index],
            taxid: self.taxid[local_index],
            residues: &self.dsq[offset + 1..offset + 1 + len],
        }
    }

    /// Database-wide index of sequence `local_index` within this chunk.
    #[must_use]
    pub fn global_index(&self, local_index: usize) -> u64 {
        self.i0 + local_index as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pack_mixed;

    fn make_chunk(seqs: &[&[u8]]) -> Chunk {
        let mut chunk = Chunk::new();
        chunk.set_header(0, seqs.len() as u64, 0);
        let (packed, psq_counts, metadata) = chunk.loader_parts();
        let mut pn = 0u64;
        for residues in seqs {
            let mut packets = Vec::new();
            pack_mixed(residues, &mut packets);
            for p in &packets {
                packed.extend_from_slice(&p.to_le_bytes());
            }
            psq_counts.push(packets.len() as u64);
            pn += packets.len() as u64;

            metadata.extend_from_slice(b"seq\0acc\0desc\0");
            metadata.extend_from_slice(&7i32.to_le_bytes());
        }
        chunk.pn = pn;
        chunk
    }

    #[test]
    fn unpacks_multiple_sequences_in_order() {
        let seqs: [&[u8]; 3] = [&[0, 1, 2, 3], &[], &[0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]];
        let mut chunk = make_chunk(&seqs);
        chunk.unpack().unwrap();
        for (i, expected) in seqs.iter().enumerate() {
            let view = chunk.seq(i);
            assert_eq!(view.residues, *expected);
            assert_eq!(view.name, b"seq");
            assert_eq!(view.accession, b"acc");
            assert_eq!(view.description, b"desc");
            assert_eq!(view.taxid, 7);
        }
    }

    #[test]
    fn empty_sequence_between_nonempty_ones_is_located_correctly() {
        let seqs: [&[u8]; 3] = [&[0, 1, 2], &[], &[3, 2, 1, 0]];
        let mut chunk = make_chunk(&seqs);
        chunk.unpack().unwrap();
        assert_eq!(chunk.seq(1).residues, &[] as &[u8]);
        assert_eq!(chunk.seq(0).residues, &[0, 1, 2]);
        assert_eq!(chunk.seq(2).residues, &[3, 2, 1, 0]);
    }

    #[test]
    fn reset_clears_content_but_keeps_capacity() {
        let seqs: [&[u8]; 1] = [&[0, 1, 2, 3]];
        let mut chunk = make_chunk(&seqs);
        chunk.unpack().unwrap();
        let packed_cap = chunk.packed.capacity();
        chunk.reset();
        assert_eq!(chunk.n, 0);
        assert!(chunk.dsq_offset.is_empty());
        assert!(chunk.packed.capacity() >= packed_cap);
    }

    #[test]
    fn malformed_metadata_is_reported() {
        let mut chunk = Chunk::new();
        chunk.set_header(0, 1, 0);
        {
            let (packed, psq_counts, metadata) = chunk.loader_parts();
            psq_counts.push(0);
            metadata.extend_from_slice(b"nameonly"); // missing NUL terminators
            let _ = packed;
        }
        let err = chunk.unpack().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Read(ReadError::MalformedMetadata { .. })
        ));
    }
}
