use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use log::debug;

use crate::clock;
use crate::config::TracerConfig;
use crate::flush::FlushCoordinator;
use crate::identity::ObjectStateTable;
use crate::pool::PoolSet;
use crate::record::{ObjectRef, Record, RecordKind, Slot, NO_ID};
use crate::sink::Sink;
use crate::thread_buffer::ThreadBuffer;

/// The event handler: claims records, fills payloads, appends them to the
/// calling thread's buffer and forces flushes when a buffer or pool runs
/// dry. One instance per process; instrumented call sites reach it through
/// a per-thread [`ThreadHandle`].

/// Bounded retry for pool exhaustion. Each attempt force-flushes the
/// claiming thread's buffer, then waits [`CLAIM_WAIT`] for some thread to
/// release a record; a pool still empty after this many rounds means an
/// undersized pool or a stuck consumer, which is fatal.
const CLAIM_RETRIES: usize = 10;
const CLAIM_WAIT: Duration = Duration::from_millis(100);

struct TracerShared {
    pools: Arc<PoolSet>,
    state: ObjectStateTable,
    coordinator: FlushCoordinator,
    finalizing: AtomicBool,
    buffer_capacity: usize,
}

/// Cheaply cloneable handle to the process-wide tracing pipeline.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerShared>,
}

impl Tracer {
    /// Preallocates every record pool and spawns the flush consumer, which
    /// owns `sink` from here on.
    pub fn new(config: TracerConfig, sink: Box<dyn Sink>) -> Self {
        let pools = Arc::new(PoolSet::new(config.pool_capacity));
        let coordinator = FlushCoordinator::start(sink, Arc::clone(&pools));
        debug!(
            "tracer started: {} records/kind, {} slots/thread-buffer",
            config.pool_capacity, config.buffer_capacity
        );
        Self {
            inner: Arc::new(TracerShared {
                pools,
                state: ObjectStateTable::new(),
                coordinator,
                finalizing: AtomicBool::new(false),
                buffer_capacity: config.buffer_capacity,
            }),
        }
    }

    /// Registers the calling thread as a producer, allocating its buffer.
    /// The handle is the thread's sole entry point for recording events;
    /// dropping it is the thread-termination flush.
    pub fn register_thread(&self) -> ThreadHandle {
        let thread = std::thread::current().id();
        let handle = ThreadHandle {
            tracer: self.clone(),
            buffer: ThreadBuffer::new(thread, self.inner.buffer_capacity),
            thread,
            finalized: Cell::new(false),
            _not_send: PhantomData,
        };
        handle.emit(RecordKind::ThreadStart, Slot::Empty, Slot::Empty, 0);
        handle
    }

    /// The identity table, shared with the collector integration.
    pub fn identity_table(&self) -> &ObjectStateTable {
        &self.inner.state
    }

    /// Survivor visit from the collector: `obj` is still reachable in the
    /// current collection cycle. Allocation-free.
    pub fn survivor(&self, obj: &ObjectRef) {
        self.inner.state.increment_lifetime(obj);
    }

    pub(crate) fn flush_buffer(&self, buffer: &Arc<ThreadBuffer>) {
        self.inner.coordinator.flush(buffer);
    }
}

/// Per-thread recording handle. Bound to the thread that registered it
/// (deliberately `!Send`); its drop flushes whatever the thread buffered.
pub struct ThreadHandle {
    tracer: Tracer,
    buffer: Arc<ThreadBuffer>,
    thread: ThreadId,
    finalized: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

impl ThreadHandle {
    /// Hot path: claim, stamp, fill, append. No heap allocation; blocks
    /// only when this thread's own buffer or a record pool forces a flush.
    fn emit(&self, kind: RecordKind, payload_a: Slot, payload_b: Slot, packed: i32) {
        if self.tracer.inner.finalizing.load(Ordering::Acquire) {
            // Finalization starves further event generation rather than
            // risk deadlocking the final drain.
            return;
        }
        if self.buffer.is_full() {
            self.tracer.flush_buffer(&self.buffer);
        }
        let Some(mut record) = self.claim(kind) else {
            return;
        };
        record.timestamp = clock::timestamp();
        record.payload_a = payload_a;
        record.payload_b = payload_b;
        record.packed = packed;
        self.buffer.push(record);
    }

    /// `None` only when finalization began while this thread was stalled on
    /// an exhausted pool; the event is then dropped like any other event
    /// raced by shutdown.
    fn claim(&self, kind: RecordKind) -> Option<Record> {
        let pool = self.tracer.inner.pools.pool(kind);
        if let Some(record) = pool.try_claim(self.thread) {
            return Some(record);
        }
        for attempt in 1..=CLAIM_RETRIES {
            if self.tracer.inner.finalizing.load(Ordering::Acquire) {
                return None;
            }
            debug!(
                "pool for {:?} exhausted, flushing and waiting (attempt {attempt})",
                kind
            );
            // Our own buffer may be the one holding this pool's records.
            self.tracer.flush_buffer(&self.buffer);
            if let Some(record) = pool.claim_or_wait(self.thread, CLAIM_WAIT) {
                return Some(record);
            }
        }
        panic!("record pool for {kind:?} still exhausted after {CLAIM_RETRIES} flush rounds");
    }

    /// First-observation interposition: an object reached through a read or
    /// write without a tracked creation gets an unseen id and an `Unseen`
    /// record, once.
    fn ensure_seen(&self, obj: &ObjectRef) {
        if obj.id() == NO_ID
            && self
                .tracer
                .inner
                .state
                .assign_unseen_if_absent(obj)
                .is_some()
        {
            self.emit(RecordKind::Unseen, Slot::Object(obj.clone()), Slot::Empty, 0);
        }
    }

    // Creation events assign the positive identity.

    pub fn record_new(&self, obj: &ObjectRef) {
        self.tracer.inner.state.assign_id(obj);
        self.emit(RecordKind::New, Slot::Object(obj.clone()), Slot::Empty, 0);
    }

    pub fn record_new_array(&self, array: &ObjectRef, length: i32) {
        self.tracer.inner.state.assign_id(array);
        self.emit(
            RecordKind::NewArray,
            Slot::Object(array.clone()),
            Slot::Empty,
            length,
        );
    }

    // Field access.

    pub fn record_get_field(&self, obj: &ObjectRef, member: u16) {
        self.ensure_seen(obj);
        self.emit(
            RecordKind::GetField,
            Slot::Object(obj.clone()),
            Slot::Empty,
            member as i32,
        );
    }

    pub fn record_put_field_int(&self, obj: &ObjectRef, member: u16, value: i64) {
        self.ensure_seen(obj);
        self.emit(
            RecordKind::PutFieldInt,
            Slot::Object(obj.clone()),
            Slot::Int(value),
            member as i32,
        );
    }

    pub fn record_put_field_float(&self, obj: &ObjectRef, member: u16, value: f64) {
        self.ensure_seen(obj);
        self.emit(
            RecordKind::PutFieldFloat,
            Slot::Object(obj.clone()),
            Slot::Float(value),
            member as i32,
        );
    }

    pub fn record_put_field_object(&self, obj: &ObjectRef, member: u16, value: &ObjectRef) {
        self.ensure_seen(obj);
        self.ensure_seen(value);
        self.emit(
            RecordKind::PutFieldObject,
            Slot::Object(obj.clone()),
            Slot::Object(value.clone()),
            member as i32,
        );
    }

    // Static access. `holder` is the static tuple of the declaring type.

    pub fn record_get_static(&self, holder: &ObjectRef, member: u16) {
        self.ensure_seen(holder);
        self.emit(
            RecordKind::GetStatic,
            Slot::Object(holder.clone()),
            Slot::Empty,
            member as i32,
        );
    }

    pub fn record_put_static_int(&self, holder: &ObjectRef, member: u16, value: i64) {
        self.ensure_seen(holder);
        self.emit(
            RecordKind::PutStaticInt,
            Slot::Object(holder.clone()),
            Slot::Int(value),
            member as i32,
        );
    }

    pub fn record_put_static_float(&self, holder: &ObjectRef, member: u16, value: f64) {
        self.ensure_seen(holder);
        self.emit(
            RecordKind::PutStaticFloat,
            Slot::Object(holder.clone()),
            Slot::Float(value),
            member as i32,
        );
    }

    pub fn record_put_static_object(&self, holder: &ObjectRef, member: u16, value: &ObjectRef) {
        self.ensure_seen(holder);
        self.ensure_seen(value);
        self.emit(
            RecordKind::PutStaticObject,
            Slot::Object(holder.clone()),
            Slot::Object(value.clone()),
            member as i32,
        );
    }

    // Array access.

    pub fn record_array_load(&self, array: &ObjectRef, index: i32) {
        self.ensure_seen(array);
        self.emit(
            RecordKind::ArrayLoad,
            Slot::Object(array.clone()),
            Slot::Empty,
            index,
        );
    }

    pub fn record_array_store_int(&self, array: &ObjectRef, index: i32, value: i64) {
        self.ensure_seen(array);
        self.emit(
            RecordKind::ArrayStoreInt,
            Slot::Object(array.clone()),
            Slot::Int(value),
            index,
        );
    }

    pub fn record_array_store_float(&self, array: &ObjectRef, index: i32, value: f64) {
        self.ensure_seen(array);
        self.emit(
            RecordKind::ArrayStoreFloat,
            Slot::Object(array.clone()),
            Slot::Float(value),
            index,
        );
    }

    pub fn record_array_store_object(&self, array: &ObjectRef, index: i32, value: &ObjectRef) {
        self.ensure_seen(array);
        self.ensure_seen(value);
        self.emit(
            RecordKind::ArrayStoreObject,
            Slot::Object(array.clone()),
            Slot::Object(value.clone()),
            index,
        );
    }

    // Invocation and control transfer.

    pub fn record_invoke_before(&self, receiver: Option<&ObjectRef>, member: u16) {
        let slot = match receiver {
            Some(obj) => {
                self.ensure_seen(obj);
                Slot::Object(obj.clone())
            }
            None => Slot::Empty,
        };
        self.emit(RecordKind::InvokeBefore, slot, Slot::Empty, member as i32);
    }

    pub fn record_invoke_after(&self, receiver: Option<&ObjectRef>, member: u16) {
        let slot = match receiver {
            Some(obj) => {
                self.ensure_seen(obj);
                Slot::Object(obj.clone())
            }
            None => Slot::Empty,
        };
        self.emit(RecordKind::InvokeAfter, slot, Slot::Empty, member as i32);
    }

    pub fn record_return(&self) {
        self.emit(RecordKind::Return, Slot::Empty, Slot::Empty, 0);
    }

    pub fn record_branch(&self, target: i32) {
        self.emit(RecordKind::Branch, Slot::Empty, Slot::Empty, target);
    }

    // Monitors.

    pub fn record_monitor_enter(&self, obj: &ObjectRef) {
        self.ensure_seen(obj);
        self.emit(
            RecordKind::MonitorEnter,
            Slot::Object(obj.clone()),
            Slot::Empty,
            0,
        );
    }

    pub fn record_monitor_exit(&self, obj: &ObjectRef) {
        self.ensure_seen(obj);
        self.emit(
            RecordKind::MonitorExit,
            Slot::Object(obj.clone()),
            Slot::Empty,
            0,
        );
    }

    // Collector integration.

    /// Collection cycle boundary, driven by the thread running the
    /// collector. Every identity not marked as a survivor this cycle is
    /// reclaimed and recorded as a `Removal`, then the boundary itself is
    /// recorded.
    pub fn gc_cycle(&self) {
        self.tracer.inner.state.gc(|id| {
            self.emit(RecordKind::Removal, Slot::Empty, Slot::Int(id), 0);
        });
        self.emit(RecordKind::Gc, Slot::Empty, Slot::Empty, 0);
    }

    /// Forces this thread's buffered records through the sink. Blocks until
    /// the drain completes.
    pub fn flush(&self) {
        self.tracer.flush_buffer(&self.buffer);
    }

    /// Process shutdown from this (usually the main) thread: stop further
    /// event generation, deliver this thread's last buffer, let the sink
    /// finish and join the consumer.
    pub fn finalize(self) {
        self.tracer.inner.finalizing.store(true, Ordering::Release);
        self.tracer.flush_buffer(&self.buffer);
        self.tracer.inner.coordinator.shutdown();
        self.finalized.set(true);
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.finalized.get() {
            return;
        }
        self.emit(RecordKind::ThreadEnd, Slot::Empty, Slot::Empty, 0);
        self.tracer.flush_buffer(&self.buffer);
    }
}
