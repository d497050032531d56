//! Error types for the dsqdata library
//!
//! Errors are grouped the way the on-disk format is: header problems,
//! packet-stream problems, and problems specific to reading or writing.
//! The top-level [`Error`] enum wraps each group plus I/O and EOF, matching
//! the taxonomy a consumer needs at the reader/writer boundary.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("invalid magic number in {file}: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        file: &'static str,
        expected: u32,
        found: u32,
    },

    #[error(
        "database presents a byte-swapped magic number in {0}; byte-swapped reading is not implemented"
    )]
    ByteSwappedUnsupported(&'static str),

    #[error(
        "tag mismatch in {file}: index tag {index_tag:#010x} does not match {file} tag {found:#010x}"
    )]
    TagMismatch {
        file: &'static str,
        index_tag: u32,
        found: u32,
    },

    #[error("unrecognized alphabet type code: {0}")]
    InvalidAlphabetType(u32),

    #[error(
        "database alphabet ({found}) does not match the caller's expected alphabet ({expected})"
    )]
    AlphabetMismatch { expected: String, found: String },

    #[error("stub file is missing or malformed: {0}")]
    MalformedStub(String),
}

#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("packet stream ended before signaling end-of-sequence for sequence {0}")]
    TruncatedPacketStream(usize),

    #[error(
        "sequence length {0} exceeds the maximum packets-per-chunk bound; the writer should never produce such a sequence"
    )]
    SequenceTooLong(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error(
        "truncated database: expected {expected} more bytes in {file} at offset {offset}, found {found}"
    )]
    TruncatedFile {
        file: &'static str,
        offset: u64,
        expected: u64,
        found: u64,
    },

    #[error(
        "malformed metadata record {record} in chunk starting at sequence {chunk_i0}: cursor advanced past the metadata buffer"
    )]
    MalformedMetadata { chunk_i0: u64, record: usize },

    /// A loader or unpacker worker hit an unrecoverable format error deep in
    /// the pipeline (spec §7). There is no back-channel from those threads
    /// to an in-flight consumer call, so the error is latched and replayed
    /// here the next time a consumer observes end-of-data.
    #[error("reader pipeline terminated early: {0}")]
    PipelineFailed(String),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("failed to create output file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the source sequence iterator reported a parse error: {0}")]
    SourceParseError(String),

    #[error(
        "sequence {index} has length {len}, which exceeds the maximum packets-per-chunk bound and can never be loaded by the reader"
    )]
    SequenceTooLong { index: u64, len: u64 },
}

/// Top-level error type returned at the crate's public boundary.
///
/// Variants map onto the error taxonomy of the format specification:
/// not-found and truncated-file conditions and malformed headers/tags are
/// [`Error::Read`], alphabet mismatches are [`Error::Incompatible`],
/// output-open failures are [`Error::Write`], thread/synchronization
/// failures are [`Error::System`], and normal end-of-data is [`Error::Eof`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("alphabet incompatible with database: {0}")]
    Incompatible(String),

    #[error("system error: {0}")]
    System(String),

    #[error("out of memory: {0}")]
    Memory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Normal end of data on `Read`. Not a failure.
    #[error("end of data")]
    Eof,
}
