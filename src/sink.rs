use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use lz4_flex::frame::FrameEncoder;

use crate::name_registry;
use crate::record::{Record, RecordKind, Slot};

/// Pluggable backends consuming drained records.
///
/// A sink is only ever invoked from the flush consumer thread, one batch at
/// a time: `begin_batch` once per handed-off buffer, then `dispatch` for
/// each record in exact append order. What a sink does with the records
/// (count, format, compress, ship elsewhere) is its own business.
pub trait Sink: Send {
    /// Start of a new per-thread batch. Batches are never interleaved.
    fn begin_batch(&mut self, _thread: ThreadId) {}

    /// Consume one record. An error here is fatal for the whole pipeline.
    fn dispatch(&mut self, record: &Record) -> io::Result<()>;

    /// Final drain at shutdown; the sink will not be called again.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards everything. Useful for measuring the recording path itself.
pub struct NullSink;

impl Sink for NullSink {
    fn dispatch(&mut self, _record: &Record) -> io::Result<()> {
        Ok(())
    }
}

/// Shared per-kind counters filled in by a [`CountingSink`].
pub struct RecordCounts {
    kinds: [AtomicUsize; RecordKind::COUNT],
    batches: AtomicUsize,
}

impl RecordCounts {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            kinds: std::array::from_fn(|_| AtomicUsize::new(0)),
            batches: AtomicUsize::new(0),
        })
    }

    pub fn of(&self, kind: RecordKind) -> usize {
        self.kinds[kind.index()].load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.kinds.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

/// Counts delivered records per kind behind shared atomics.
pub struct CountingSink {
    counts: Arc<RecordCounts>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self {
            counts: RecordCounts::new(),
        }
    }

    /// Handle the embedder keeps to read the counters after the sink has
    /// been moved onto the consumer thread.
    pub fn counts(&self) -> Arc<RecordCounts> {
        Arc::clone(&self.counts)
    }
}

impl Default for CountingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CountingSink {
    fn begin_batch(&mut self, _thread: ThreadId) {
        self.counts.batches.fetch_add(1, Ordering::SeqCst);
    }

    fn dispatch(&mut self, record: &Record) -> io::Result<()> {
        self.counts.kinds[record.kind().index()].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes one compact text line per record.
///
/// Object payloads are printed as their assigned identity (`#id`), member
/// ids are resolved back through the name registry. Timestamps are printed
/// relative to the first record of each batch, which keeps the lines short
/// and makes per-batch ordering obvious.
pub struct TextSink<W: Write + Send> {
    out: W,
    base_time: Option<u64>,
    // Header is written with the first record so its io::Result has
    // somewhere to go.
    pending_batch: Option<ThreadId>,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            base_time: None,
            pending_batch: None,
        }
    }

    fn into_inner(self) -> W {
        self.out
    }

    fn write_slot(&mut self, slot: &Slot) -> io::Result<()> {
        match slot {
            Slot::Empty => Ok(()),
            Slot::Object(obj) => write!(self.out, " #{}", obj.id()),
            Slot::Int(value) => write!(self.out, " {value}"),
            Slot::Float(value) => write!(self.out, " {value}"),
        }
    }

    fn write_packed(&mut self, record: &Record) -> io::Result<()> {
        match record.kind() {
            // Member access and invocation carry an interned member id.
            RecordKind::GetField
            | RecordKind::PutFieldInt
            | RecordKind::PutFieldFloat
            | RecordKind::PutFieldObject
            | RecordKind::GetStatic
            | RecordKind::PutStaticInt
            | RecordKind::PutStaticFloat
            | RecordKind::PutStaticObject
            | RecordKind::InvokeBefore
            | RecordKind::InvokeAfter => {
                match name_registry::lookup_name(record.packed as u16) {
                    Some(name) => write!(self.out, " {name}"),
                    None => write!(self.out, " m{}", record.packed),
                }
            }
            // Array length, element index or branch target.
            RecordKind::NewArray
            | RecordKind::ArrayLoad
            | RecordKind::ArrayStoreInt
            | RecordKind::ArrayStoreFloat
            | RecordKind::ArrayStoreObject
            | RecordKind::Branch => write!(self.out, " {}", record.packed),
            _ => Ok(()),
        }
    }
}

impl<W: Write + Send> Sink for TextSink<W> {
    fn begin_batch(&mut self, thread: ThreadId) {
        // Relative time restarts with each batch.
        self.base_time = None;
        self.pending_batch = Some(thread);
    }

    fn dispatch(&mut self, record: &Record) -> io::Result<()> {
        if let Some(thread) = self.pending_batch.take() {
            writeln!(self.out, "; batch {thread:?}")?;
        }
        let base = *self.base_time.get_or_insert(record.timestamp);
        let rel = record.timestamp.saturating_sub(base);
        write!(self.out, "{rel} {}", record.kind().mnemonic())?;
        self.write_slot(&record.payload_a)?;
        self.write_packed(record)?;
        self.write_slot(&record.payload_b)?;
        writeln!(self.out)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// [`TextSink`] output pushed through an LZ4 frame.
pub struct Lz4TextSink<W: Write + Send> {
    inner: Option<TextSink<FrameEncoder<W>>>,
}

impl<W: Write + Send> Lz4TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Some(TextSink::new(FrameEncoder::new(out))),
        }
    }
}

impl<W: Write + Send> Sink for Lz4TextSink<W> {
    fn begin_batch(&mut self, thread: ThreadId) {
        if let Some(inner) = self.inner.as_mut() {
            inner.begin_batch(thread);
        }
    }

    fn dispatch(&mut self, record: &Record) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.dispatch(record),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.finish()?;
            inner
                .into_inner()
                .finish()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        }
        Ok(())
    }
}
