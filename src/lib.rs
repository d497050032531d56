//! A bit-packed, random-access binary database of biological sequences.
//!
//! A dsqdata database is three files sharing a base path — `.dsqi` (index),
//! `.dsqm` (metadata), `.dsqs` (packed sequence) — plus a human-readable
//! stub at the base path itself. [`writer::WriterBuilder`] creates one from
//! any [`source::DigitalSequenceSource`]; [`reader::ReaderBuilder`] opens
//! one for reading, handing decoded [`chunk::Chunk`]s to however many
//! consumer threads call [`reader::Reader::read`].

#![allow(clippy::module_inception)]

pub mod alphabet;
pub mod chunk;
pub mod codec;
pub mod error;
mod header;
pub mod reader;
pub mod source;
pub mod writer;

pub use alphabet::{Alphabet, AlphabetKind};
pub use chunk::{Chunk, SeqView};
pub use error::{Error, HeaderError, PacketError, ReadError, Result, WriteError};
pub use reader::{DatabaseSummary, Reader, ReaderBuilder};
pub use source::{DigitalSequenceSource, SeqRecord, VecSeqSource};
pub use writer::WriterBuilder;
