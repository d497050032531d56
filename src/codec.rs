//! The bit-packed sequence codec
//!
//! A packet is a 32-bit word with two control bits (spec §3): bit 31 marks
//! the last packet of a sequence, bit 30 selects 2-bit (15 canonical
//! residues) or 5-bit (up to 6 residues, any code) packing. The remaining
//! 30 bits carry residues, most-significant group first.
//!
//! Packing is pure: it reads a residue slice and writes packets into a
//! caller-supplied, reusable output buffer, the same texture as the
//! teacher's `Encoder` in `src/bq/writer.rs` reusing its `sbuffer`/`xbuffer`
//! across calls instead of allocating per record. Unpacking is where reuse
//! actually matters on the read side: it writes residues directly into a
//! shared chunk buffer whose packed bytes live at the high end and whose
//! unpacked residues grow from the low end (spec §4.1, §9), reading each
//! packet into a local before writing any residue it produces so the two
//! regions may overlap safely with no unsafe code.

use crate::error::{PacketError, Result};

/// Reserved non-residue byte written at both ends of a decoded sequence.
///
/// Distinct from every valid residue code (0..=31).
pub const RESIDUE_SENTINEL: u8 = 0xff;

/// The in-packet filler/terminator value under 5-bit packing.
pub const INPACKET_SENTINEL: u8 = 31;

const SENTINEL_BIT: u32 = 1 << 31;
const KIND_BIT: u32 = 1 << 30;

/// Packs `residues` (one byte per residue code, no sentinels) as 5-bit
/// packets, appending the result to `packets` (which is cleared first).
///
/// Used for protein sequences, where every packet is 5-bit (spec §4.1).
/// `residues.len() == 0` appends nothing.
pub fn pack_5bit(residues: &[u8], packets: &mut Vec<u32>) {
    packets.clear();
    let n = residues.len();
    let mut i = 0;
    while i < n {
        let take = (n - i).min(6);
        let is_final = i + take == n;
        packets.push(encode_5bit_packet(&residues[i..i + take], is_final));
        i += take;
    }
}

/// Packs `residues` using mixed 2-bit/5-bit packing, appending to `packets`
/// (which is cleared first).
///
/// Used for DNA/RNA sequences. A run of 15 consecutive canonical residues
/// (codes 0-3) is packed as one 2-bit packet; any 15-residue window
/// containing a degenerate residue (code > 3) forces a 5-bit packet
/// instead, realigning one group of up to 6 residues at a time until a
/// clean 15-residue window is available again (spec §4.1).
pub fn pack_mixed(residues: &[u8], packets: &mut Vec<u32>) {
    packets.clear();
    let n = residues.len();
    let mut i = 0;
    while i < n {
        let remaining = n - i;
        if remaining >= 15 && residues[i..i + 15].iter().all(|&c| c <= 3) {
            let is_final = i + 15 == n;
            packets.push(encode_2bit_packet(&residues[i..i + 15], is_final));
            i += 15;
        } else {
            let take = remaining.min(6);
            let is_final = i + take == n;
            packets.push(encode_5bit_packet(&residues[i..i + take], is_final));
            i += take;
        }
    }
}

fn encode_5bit_packet(group: &[u8], is_final: bool) -> u32 {
    debug_assert!(group.len() <= 6);
    let mut word = KIND_BIT;
    if is_final {
        word |= SENTINEL_BIT;
    }
    for k in 0..6 {
        let code = group.get(k).copied().unwrap_or(INPACKET_SENTINEL) as u32;
        word |= (code & 0x1f) << (25 - 5 * k);
    }
    word
}

fn encode_2bit_packet(group: &[u8], is_final: bool) -> u32 {
    debug_assert_eq!(group.len(), 15);
    let mut word = 0u32;
    if is_final {
        word |= SENTINEL_BIT;
    }
    for (k, &code) in group.iter().enumerate() {
        word |= (u32::from(code) & 0x3) << (28 - 2 * k);
    }
    word
}

/// Result of decoding the packets belonging to one sequence.
pub struct DecodedSeq {
    /// Byte offset, within the destination buffer, of the leading sentinel.
    pub dsq_offset: usize,
    /// Number of residues (excludes both sentinels).
    pub len: u64,
}

/// Decodes exactly the packets belonging to one sequence from a packed
/// byte stream, writing residues (plus leading/trailing sentinels) into
/// `dst` starting at `write`.
///
/// `packet_bytes` is the little-endian packed stream; `n_packets` is how
/// many packets (consumed starting at `read_pos`) belong to this sequence,
/// as determined by the index (not by scanning for sentinel bits — an
/// empty sequence contributes zero packets and zero sentinel signals, so
/// sentinel-only scanning cannot by itself locate sequence boundaries; see
/// spec §3's empty-sequence case).
///
/// Returns the new `write` cursor (one past the trailing sentinel just
/// written) and the decoded sequence's metadata. Reads each packet into a
/// local before writing any residue it produces, so `dst` may safely
/// overlap the remaining, not-yet-read tail of `packet_bytes` as long as
/// the write cursor never catches up to the read cursor (guaranteed by the
/// buffer sizing in [`crate::chunk`]).
///
/// # Errors
///
/// Returns [`PacketError::TruncatedPacketStream`] if `n_packets` packets
/// are consumed without the last one's sentinel bit being set, which can
/// only happen if the database itself is corrupt (the writer always marks
/// the true last packet of a sequence).
pub fn decode_one_sequence(
    packet_bytes: &[u8],
    read_pos: usize,
    n_packets: u64,
    dst: &mut [u8],
    write: usize,
    seq_index: usize,
) -> Result<(usize, DecodedSeq)> {
    let dsq_offset = write;
    let mut write = write;
    dst[write] = RESIDUE_SENTINEL;
    write += 1;

    let mut pos = read_pos;
    let mut saw_sentinel = false;
    for i in 0..n_packets {
        let word = u32::from_le_bytes(
            packet_bytes[pos..pos + 4]
                .try_into()
                .expect("packet slice is always 4 bytes"),
        );
        pos += 4;
        let sentinel = word & SENTINEL_BIT != 0;
        let is_5bit = word & KIND_BIT != 0;
        if is_5bit {
            for k in 0..6 {
                let code = ((word >> (25 - 5 * k)) & 0x1f) as u8;
                if code == INPACKET_SENTINEL {
                    break;
                }
                dst[write] = code;
                write += 1;
            }
        } else {
            for k in 0..15 {
                let code = ((word >> (28 - 2 * k)) & 0x3) as u8;
                dst[write] = code;
                write += 1;
            }
        }
        if sentinel {
            saw_sentinel = i + 1 == n_packets;
            break;
        }
    }

    if n_packets > 0 && !saw_sentinel {
        return Err(PacketError::TruncatedPacketStream(seq_index).into());
    }

    let len = (write - dsq_offset - 1) as u64;
    dst[write] = RESIDUE_SENTINEL;
    write += 1;

    Ok((
        pos,
        DecodedSeq {
            dsq_offset,
            len,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(residues: &[u8], nucleic: bool) {
        let mut packets = Vec::new();
        if nucleic {
            pack_mixed(residues, &mut packets);
        } else {
            pack_5bit(residues, &mut packets);
        }

        let mut bytes = Vec::with_capacity(packets.len() * 4);
        for p in &packets {
            bytes.extend_from_slice(&p.to_le_bytes());
        }

        // Oversize destination: worst case is 15x expansion per packet.
        let mut dst = vec![0u8; packets.len() * 15 + 2];
        let (_pos, decoded) =
            decode_one_sequence(&bytes, 0, packets.len() as u64, &mut dst, 0, 0).unwrap();
        assert_eq!(decoded.len, residues.len() as u64);
        let got = &dst[decoded.dsq_offset + 1..decoded.dsq_offset + 1 + residues.len()];
        assert_eq!(got, residues);
    }

    #[test]
    fn empty_sequence_emits_no_packets() {
        let mut packets = Vec::new();
        pack_5bit(&[], &mut packets);
        assert!(packets.is_empty());
        pack_mixed(&[], &mut packets);
        assert!(packets.is_empty());
    }

    #[test]
    fn protein_single_packet() {
        // A,C,D,E as arbitrary small codes.
        roundtrip(&[0, 1, 2, 3], false);
    }

    #[test]
    fn protein_packet_count() {
        for n in 0..40 {
            let residues: Vec<u8> = (0..n).map(|i| (i % 20) as u8).collect();
            let mut packets = Vec::new();
            pack_5bit(&residues, &mut packets);
            let expected = if n == 0 { 0 } else { n.div_ceil(6) };
            assert_eq!(packets.len(), expected, "n={n}");
        }
        roundtrip(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12], false);
    }

    #[test]
    fn nucleic_pure_canonical_30() {
        let residues = vec![0u8, 1, 2, 3].repeat(8)[..30].to_vec();
        roundtrip(&residues, true);
        let mut packets = Vec::new();
        pack_mixed(&residues, &mut packets);
        // Every packet must carry the sentinel flag only on the last one.
        for (i, p) in packets.iter().enumerate() {
            let is_last = i + 1 == packets.len();
            assert_eq!(p & SENTINEL_BIT != 0, is_last);
        }
    }

    #[test]
    fn nucleic_degenerate_forces_5bit() {
        // "ACGTACGTNNACGTA" digitized: A=0 C=1 G=2 T=3 N=4 (arbitrary degenerate code > 3)
        let residues = vec![0, 1, 2, 3, 0, 1, 2, 3, 4, 4, 0, 1, 2, 3, 0];
        roundtrip(&residues, true);
        let mut packets = Vec::new();
        pack_mixed(&residues, &mut packets);
        // No packet in this run can be a full-window 2-bit packet since the
        // only complete 15-residue window contains degenerate codes.
        for p in &packets {
            let is_5bit = p & KIND_BIT != 0;
            assert!(is_5bit);
        }
        let upper = (residues.len() as u64).div_ceil(15);
        let lower = (residues.len() as u64).div_ceil(15);
        assert!(packets.len() as u64 >= lower);
        assert!(packets.len() as u64 <= (residues.len() as u64 + 14) / 15 + 3);
        let _ = upper;
    }

    #[test]
    fn nucleic_bounds_hold_for_many_lengths() {
        for n in 1usize..60 {
            let residues: Vec<u8> = (0..n)
                .map(|i| if i % 17 == 5 { 4 } else { (i % 4) as u8 })
                .collect();
            let mut packets = Vec::new();
            pack_mixed(&residues, &mut packets);
            let lower = (n as u64).div_ceil(15);
            let upper = (n as u64 + 14).div_ceil(15);
            assert!(
                packets.len() as u64 >= lower && packets.len() as u64 <= upper,
                "n={n} packets={} lower={lower} upper={upper}",
                packets.len()
            );
            roundtrip(&residues, true);
        }
    }

    #[test]
    fn every_packet_has_exactly_one_final_sentinel_per_sequence() {
        let residues = vec![0u8, 1, 2, 3, 4, 0, 1];
        let mut packets = Vec::new();
        pack_mixed(&residues, &mut packets);
        let sentinel_count = packets.iter().filter(|&&p| p & SENTINEL_BIT != 0).count();
        assert_eq!(sentinel_count, 1);
        assert!(packets.last().unwrap() & SENTINEL_BIT != 0);
    }
}
