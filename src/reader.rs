//! The reader: header validation plus the loader/unpacker pipeline
//!
//! Opening a database validates the three files' magic numbers and tags
//! against each other and the caller's declared alphabet (spec §4.6), then
//! starts two background threads: a loader that reads raw bytes off disk
//! into [`Chunk`]s, and an unpacker that decodes each chunk's packets and
//! metadata. Chunks flow loader -> unpacker -> consumer through two
//! single-slot mailboxes, and flow back consumer -> loader through a LIFO
//! recycling stack, so steady-state operation allocates nothing (spec
//! §4.7). There is no precedent in the teacher for a `Condvar`-based
//! pipeline (its own parallelism is range-partitioned, each thread reading
//! its own disjoint slice independently, as in
//! `ParallelReader::process_parallel_range`); this module generalizes that
//! same "spawn plain `std::thread`s sharing state behind `Arc`" idiom to a
//! producer/consumer handoff using `std::sync::{Mutex, Condvar}`.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::alphabet::{Alphabet, AlphabetKind};
use crate::chunk::Chunk;
use crate::error::{Error, ReadError, Result};
use crate::header::{check_tag, IndexHeader, IndexRecord, ShortHeader};

/// Target number of packet bytes to read into one chunk. Chosen to keep a
/// chunk comfortably inside L2/L3 cache sizes without making the loader
/// issue a read syscall per sequence.
const CHUNK_BYTE_BUDGET: u64 = 4 * 1024 * 1024;
/// Upper bound on sequences per chunk regardless of their combined size,
/// so a run of many empty or near-empty sequences still caps metadata
/// bookkeeping per chunk.
const MAX_CHUNK_SEQS: usize = 8192;

/// Summary statistics about an open database, mirroring the fields
/// recorded in the index header (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub alphabet: AlphabetKind,
    pub nseq: u64,
    pub nres: u64,
    pub max_seqlen: u64,
}

/// Builds a [`Reader`], mirroring the teacher's `*ReaderBuilder` pattern.
#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    base_path: Option<PathBuf>,
    alphabet: Option<AlphabetKind>,
    nconsumers: usize,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self {
            base_path: None,
            alphabet: None,
            nconsumers: default_nconsumers(),
        }
    }
}

impl ReaderBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// The alphabet the caller expects this database to hold. Opening
    /// fails with [`Error::Incompatible`] if the database declares a
    /// different kind (spec §4.6).
    #[must_use]
    pub fn alphabet(mut self, alphabet: impl Alphabet) -> Self {
        self.alphabet = Some(alphabet.kind());
        self
    }

    /// Number of consumer threads this reader will be shared with.
    /// Defaults to the available parallelism. Only used to size internal
    /// bookkeeping; the reader does not itself spawn consumer threads.
    #[must_use]
    pub fn nconsumers(mut self, n: usize) -> Self {
        self.nconsumers = n.max(1);
        self
    }

    /// Opens the database, validating headers and starting the loader and
    /// unpacker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::NotFound`] if any of the four files is
    /// missing, a [`crate::error::HeaderError`] variant if magics, tags,
    /// or the alphabet type code fail validation, or
    /// [`Error::Incompatible`] if the database's alphabet doesn't match
    /// the one passed to [`ReaderBuilder::alphabet`].
    pub fn open(self) -> Result<Reader> {
        let base_path = self
            .base_path
            .expect("ReaderBuilder::open called without a base_path");
        Reader::open(&base_path, self.alphabet, self.nconsumers)
    }
}

fn default_nconsumers() -> usize {
    num_cpus::get()
}

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut p = base.as_os_str().to_owned();
    p.push(".");
    p.push(ext);
    PathBuf::from(p)
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ReadError::NotFound(path.to_path_buf()).into()
        } else {
            Error::Io(source)
        }
    })
}

/// A single-slot rendezvous mailbox: `put` blocks while the slot is full,
/// `take` blocks while it's empty. The standard bounded-to-one-item
/// producer/consumer handoff (spec §4.7).
struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    full: Condvar,
    empty: Condvar,
}

impl<T> Mailbox<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            full: Condvar::new(),
            empty: Condvar::new(),
        }
    }

    fn put(&self, value: T) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while slot.is_some() {
            slot = self
                .full
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *slot = Some(value);
        self.empty.notify_one();
    }

    fn take(&self) -> T {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while slot.is_none() {
            slot = self
                .empty
                .wait(slot)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        let value = slot.take().expect("slot checked non-empty above");
        self.full.notify_one();
        value
    }
}

/// The LIFO recycling stack chunks flow back through from consumer to
/// loader (spec §4.7). Unbounded; a single condvar wakes the loader when a
/// push happens, which only matters once the loader has hit its
/// `nconsumers + 2` allocation cap and has nothing to pop.
struct RecycleStack {
    stack: Mutex<Vec<Chunk>>,
    available: Condvar,
}

impl RecycleStack {
    fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, chunk: Chunk) {
        self.stack
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(chunk);
        self.available.notify_one();
    }

    fn pop_nonblocking(&self) -> Option<Chunk> {
        self.stack
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
    }

    /// Blocks until a chunk is available, used only once the loader's
    /// allocation cap has been reached (spec §4.4 step 1).
    fn pop_blocking(&self) -> Chunk {
        let mut guard = self
            .stack
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(chunk) = guard.pop() {
                return chunk;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// An open dsqdata database: the index header plus the loader/unpacker
/// worker pair feeding decoded [`Chunk`]s to however many consumer
/// threads the caller runs [`Reader::read`] from.
pub struct Reader {
    header: IndexHeader,
    unpacker_outbox: Arc<Mailbox<Chunk>>,
    recycle: Arc<RecycleStack>,
    fatal: Arc<Mutex<Option<String>>>,
    at_eof: Arc<AtomicBool>,
    loader_handle: Option<JoinHandle<()>>,
    unpacker_handle: Option<JoinHandle<()>>,
}

impl Reader {
    fn open(base_path: &Path, expected: Option<AlphabetKind>, nconsumers: usize) -> Result<Reader> {
        let index_path = with_ext(base_path, "dsqi");
        let metadata_path = with_ext(base_path, "dsqm");
        let sequence_path = with_ext(base_path, "dsqs");

        let mut index_file = BufReader::new(open_file(&index_path)?);
        let header = IndexHeader::read_from(&mut index_file)?;

        if let Some(expected) = expected {
            if header.alphabet() != Some(expected) {
                return Err(Error::Incompatible(format!(
                    "database is {}, caller expected {expected}",
                    header
                        .alphabet()
                        .map_or_else(|| "an unknown alphabet".to_string(), |a| a.to_string())
                )));
            }
        }

        let mut records = Vec::with_capacity(header.nseq as usize);
        for _ in 0..header.nseq {
            records.push(IndexRecord::read_from(&mut index_file)?);
        }

        let mut metadata_reader = BufReader::new(open_file(&metadata_path)?);
        let metadata_header = ShortHeader::read_from(&mut metadata_reader, "metadata")?;
        check_tag(header.tag, metadata_header.tag, "metadata")?;

        let mut sequence_reader = BufReader::new(open_file(&sequence_path)?);
        let sequence_header = ShortHeader::read_from(&mut sequence_reader, "sequence")?;
        check_tag(header.tag, sequence_header.tag, "sequence")?;

        let loader_outbox = Arc::new(Mailbox::new());
        let unpacker_outbox = Arc::new(Mailbox::new());
        let recycle = Arc::new(RecycleStack::new());
        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let records = Arc::new(records);
        // Spec §4.4 step 1: at most nconsumers + 2 chunks may be in flight.
        let allocation_cap = nconsumers.max(1) + 2;

        let loader_handle = {
            let loader_outbox = Arc::clone(&loader_outbox);
            let recycle = Arc::clone(&recycle);
            let records = Arc::clone(&records);
            let fatal = Arc::clone(&fatal);
            let sequence_file = sequence_reader.into_inner();
            let metadata_file = metadata_reader.into_inner();
            std::thread::spawn(move || {
                run_loader(
                    sequence_file,
                    metadata_file,
                    &records,
                    &recycle,
                    allocation_cap,
                    &loader_outbox,
                    &fatal,
                );
            })
        };

        let unpacker_handle = {
            let unpacker_outbox = Arc::clone(&unpacker_outbox);
            let fatal = Arc::clone(&fatal);
            std::thread::spawn(move || run_unpacker(&loader_outbox, &unpacker_outbox, &fatal))
        };

        Ok(Reader {
            header,
            unpacker_outbox,
            recycle,
            fatal,
            at_eof: Arc::new(AtomicBool::new(false)),
            loader_handle: Some(loader_handle),
            unpacker_handle: Some(unpacker_handle),
        })
    }

    /// Summary statistics gathered from the index header at open time.
    #[must_use]
    pub fn summary(&self) -> DatabaseSummary {
        DatabaseSummary {
            alphabet: self.header.alphabet().unwrap_or(AlphabetKind::Protein),
            nseq: self.header.nseq,
            nres: self.header.nres,
            max_seqlen: self.header.max_seqlen,
        }
    }

    /// Receives the next decoded chunk, blocking until the unpacker has
    /// one ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Eof`] once the database's end-of-data chunk has
    /// been observed, by this call or by another consumer sharing this
    /// reader; every call after that also returns `Eof` immediately
    /// without blocking (spec §4.6's "first consumer to see N=0" rule).
    ///
    /// If a worker thread hit an unrecoverable format error (a truncated
    /// database or malformed metadata), that error is latched and returned
    /// here instead of a plain `Eof`, once the pipeline has drained to the
    /// terminal chunk (spec §7's sticky-error allowance).
    pub fn read(&self) -> Result<Chunk> {
        if self.at_eof.load(Ordering::Acquire) {
            return Err(Error::Eof);
        }
        let chunk = self.unpacker_outbox.take();
        if chunk.is_eod() {
            self.at_eof.store(true, Ordering::Release);
            // Other consumers may already be parked in `take()`; `at_eof`
            // only stops callers that check it *before* blocking. Put the
            // sentinel back so the next parked consumer wakes, observes
            // `is_eod`, and repeats this same cascade in turn.
            self.unpacker_outbox.put(Chunk::eod(chunk.i0));
            if let Some(msg) = self
                .fatal
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
            {
                return Err(ReadError::PipelineFailed(msg).into());
            }
            return Err(Error::Eof);
        }
        Ok(chunk)
    }

    /// Returns a consumed chunk to the recycling stack so the loader can
    /// reuse its buffers without reallocating. Constant-time; does not
    /// block (spec §4.6).
    pub fn recycle(&self, mut chunk: Chunk) {
        chunk.reset();
        self.recycle.push(chunk);
    }

    /// Joins the loader and unpacker threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::System`] if either worker thread panicked.
    pub fn close(mut self) -> Result<()> {
        if let Some(h) = self.loader_handle.take() {
            h.join()
                .map_err(|_| Error::System("loader thread panicked".to_string()))?;
        }
        if let Some(h) = self.unpacker_handle.take() {
            h.join()
                .map_err(|_| Error::System("unpacker thread panicked".to_string()))?;
        }
        Ok(())
    }
}

/// Pops a recycled chunk if one is available, otherwise allocates a fresh
/// one as long as `allocated` is under `cap`, otherwise blocks on the
/// recycling stack's condvar (spec §4.4 step 1).
fn acquire_chunk(recycle: &RecycleStack, allocated: &mut usize, cap: usize) -> Chunk {
    if let Some(chunk) = recycle.pop_nonblocking() {
        return chunk;
    }
    if *allocated < cap {
        *allocated += 1;
        return Chunk::new();
    }
    recycle.pop_blocking()
}

fn run_loader(
    mut sequence_file: File,
    mut metadata_file: File,
    records: &[IndexRecord],
    recycle: &RecycleStack,
    allocation_cap: usize,
    outbox: &Mailbox<Chunk>,
    fatal: &Mutex<Option<String>>,
) {
    let nseq = records.len();
    let mut i0 = 0usize;
    // Index offsets are cumulative positions minus one (spec §4.3); record 0
    // is reached from a notional previous record whose offsets are -1, so an
    // empty first sequence's psq_end is -1 (scenario 1).
    let mut prev_psq_end: i64 = -1;
    let mut prev_metadata_end: i64 = -1;
    let mut seq_byte_pos: u64 = 0;
    let mut meta_byte_pos: u64 = 0;
    let mut allocated = 0usize;

    while i0 < nseq {
        let remaining = &records[i0..];
        let n = remaining
            .partition_point(|r| ((r.psq_end - prev_psq_end) as u64) * 4 <= CHUNK_BYTE_BUDGET)
            .max(1)
            .min(remaining.len())
            .min(MAX_CHUNK_SEQS);

        let window = &records[i0..i0 + n];
        let packet_count = (window[n - 1].psq_end - prev_psq_end) as u64;
        let packet_bytes = packet_count * 4;
        // `metadata_end` tracks only each record's three NUL-terminated
        // strings, not its fixed 4-byte taxid trailer (writer.rs mirrors
        // this), so the physical read must add 4 bytes per sequence in the
        // window on top of the delta the index records directly give us.
        let metadata_bytes =
            (window[n - 1].metadata_end - prev_metadata_end) as u64 + 4 * n as u64;

        let mut chunk = acquire_chunk(recycle, &mut allocated, allocation_cap);
        chunk.set_header(i0 as u64, n as u64, packet_count);

        let read_ok = (|| -> Result<()> {
            sequence_file.seek(SeekFrom::Start(
                crate::header::SIZE_SHORT_HEADER as u64 + seq_byte_pos,
            ))?;
            metadata_file.seek(SeekFrom::Start(
                crate::header::SIZE_SHORT_HEADER as u64 + meta_byte_pos,
            ))?;
            let (packed, psq_counts, metadata) = chunk.loader_parts();
            packed.resize(packet_bytes as usize, 0);
            sequence_file.read_exact(packed)?;
            metadata.resize(metadata_bytes as usize, 0);
            metadata_file.read_exact(metadata)?;

            let mut prev = prev_psq_end;
            for rec in window {
                psq_counts.push((rec.psq_end - prev) as u64);
                prev = rec.psq_end;
            }
            Ok(())
        })();

        if let Err(err) = read_ok {
            // A genuinely truncated or corrupt database at the I/O layer
            // (spec §4.4 step 4, §7): fatal to the reader. There is no
            // consumer-facing channel from inside this background thread,
            // so the message is latched and the terminal chunk is sent
            // immediately; `Reader::read` replays it once the pipeline
            // drains to end-of-data.
            *fatal
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) =
                Some(format!("truncated database while loading chunk at sequence {i0}: {err}"));
            break;
        }

        seq_byte_pos += packet_bytes;
        meta_byte_pos += metadata_bytes;
        prev_psq_end = window[n - 1].psq_end;
        prev_metadata_end = window[n - 1].metadata_end;
        i0 += n;

        outbox.put(chunk);
    }

    outbox.put(Chunk::eod(i0 as u64));

    // Drain the recycling stack until every chunk this loader allocated has
    // come back, then let them drop (spec §4.4's shutdown sequence, §5's
    // "loader exclusively owns chunk allocation and destruction").
    let mut returned = 0usize;
    while returned < allocated {
        drop(recycle.pop_blocking());
        returned += 1;
    }
}

fn run_unpacker(
    loader_outbox: &Mailbox<Chunk>,
    unpacker_outbox: &Mailbox<Chunk>,
    fatal: &Mutex<Option<String>>,
) {
    loop {
        let mut chunk = loader_outbox.take();
        let is_eod = chunk.is_eod();
        if !is_eod {
            if let Err(err) = chunk.unpack() {
                // See the matching comment in `run_loader`: a corrupt
                // packet stream or malformed metadata this deep in the
                // pipeline has no consumer-facing channel to report
                // through directly, so the message is latched instead.
                *fatal
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                    Some(format!("corrupt chunk starting at sequence {}: {err}", chunk.i0));
                unpacker_outbox.put(Chunk::eod(chunk.i0));
                return;
            }
        }
        let should_stop = is_eod;
        unpacker_outbox.put(chunk);
        if should_stop {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SeqRecord, VecSeqSource};
    use crate::writer::WriterBuilder;
    use tempfile::tempdir;

    fn write_db(base: &Path, alphabet: AlphabetKind, records: Vec<SeqRecord>) {
        let mut source = VecSeqSource::new(records);
        WriterBuilder::new()
            .base_path(base)
            .write(&alphabet, &mut source)
            .unwrap();
    }

    #[test]
    fn reads_back_all_sequences_in_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        let records: Vec<SeqRecord> = (0..50)
            .map(|i| SeqRecord::new(format!("seq{i}"), vec![(i % 20) as u8; (i % 7) as usize]))
            .collect();
        write_db(&base, AlphabetKind::Protein, records.clone());

        let reader = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Protein)
            .open()
            .unwrap();

        let mut seen = 0usize;
        loop {
            match reader.read() {
                Ok(chunk) => {
                    for local in 0..chunk.n as usize {
                        let view = chunk.seq(local);
                        let global = chunk.global_index(local) as usize;
                        assert_eq!(view.residues, records[global].residues);
                        seen += 1;
                    }
                    reader.recycle(chunk);
                }
                Err(Error::Eof) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen, records.len());
        reader.close().unwrap();
    }

    #[test]
    fn empty_database_yields_immediate_eof() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        write_db(&base, AlphabetKind::Dna, vec![]);

        let reader = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Dna)
            .open()
            .unwrap();
        assert!(matches!(reader.read(), Err(Error::Eof)));
        reader.close().unwrap();
    }

    #[test]
    fn multiple_consumers_partition_the_database_exactly_once() {
        use std::sync::Mutex as StdMutex;

        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        let records: Vec<SeqRecord> = (0..2000)
            .map(|i| SeqRecord::new(format!("seq{i}"), vec![(i % 4) as u8; (i % 11) as usize]))
            .collect();
        write_db(&base, AlphabetKind::Dna, records.clone());

        let reader = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Dna)
            .nconsumers(4)
            .open()
            .unwrap();

        let seen_indices = StdMutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| loop {
                    match reader.read() {
                        Ok(chunk) => {
                            let mut local_seen = Vec::with_capacity(chunk.n as usize);
                            for local in 0..chunk.n as usize {
                                let view = chunk.seq(local);
                                let global = chunk.global_index(local) as usize;
                                assert_eq!(view.residues, records[global].residues);
                                local_seen.push(global);
                            }
                            reader.recycle(chunk);
                            seen_indices.lock().unwrap().extend(local_seen);
                        }
                        Err(Error::Eof) => break,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                });
            }
        });

        let mut seen = seen_indices.into_inner().unwrap();
        seen.sort_unstable();
        let expected: Vec<usize> = (0..records.len()).collect();
        assert_eq!(seen, expected);
        reader.close().unwrap();
    }

    #[test]
    fn repeated_reads_after_eof_stay_eof() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        write_db(
            &base,
            AlphabetKind::Protein,
            vec![SeqRecord::new("only", vec![1, 2, 3])],
        );
        let reader = ReaderBuilder::new()
            .base_path(&base)
            .alphabet(AlphabetKind::Protein)
            .open()
            .unwrap();
        let chunk = reader.read().unwrap();
        reader.recycle(chunk);
        assert!(matches!(reader.read(), Err(Error::Eof)));
        assert!(matches!(reader.read(), Err(Error::Eof)));
        reader.close().unwrap();
    }
}
