use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use crate::record::Record;

/// Per-producer-thread ordered buffer of claimed records awaiting a flush.
///
/// Only the owning thread appends; the flush consumer drains. The two never
/// touch the buffer at the same time outside the handoff protocol: during a
/// flush the owner is parked on `drained` (which releases the lock), and the
/// consumer holds the lock for the whole drain.
pub(crate) struct ThreadBuffer {
    thread: ThreadId,
    capacity: usize,
    records: Mutex<Vec<Record>>,
    drained: Condvar,
}

impl ThreadBuffer {
    pub(crate) fn new(thread: ThreadId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            thread,
            capacity,
            records: Mutex::new(Vec::with_capacity(capacity)),
            drained: Condvar::new(),
        })
    }

    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Appends a claimed record in strict arrival order. The caller must
    /// have flushed first if the buffer was full; capacity was reserved at
    /// creation so this never allocates.
    pub(crate) fn push(&self, record: Record) {
        let mut records = self.records.lock();
        assert!(
            records.len() < self.capacity,
            "append to a full buffer; flush must happen first"
        );
        records.push(record);
    }

    /// Drains every buffered record, in append order, into `consume`.
    /// Returns the number of records drained. Called only by the flush
    /// consumer; the lock is held across the whole drain.
    pub(crate) fn drain_with(&self, mut consume: impl FnMut(Record)) -> usize {
        let mut records = self.records.lock();
        let drained = records.len();
        for record in records.drain(..) {
            consume(record);
        }
        drained
    }

    /// Wakes the owner parked in [`wait_drained`].
    pub(crate) fn notify_drained(&self) {
        let _records = self.records.lock();
        self.drained.notify_all();
    }

    /// Blocks the owner until the consumer has drained the buffer back to
    /// empty. The wait is unbounded by design.
    pub(crate) fn wait_drained(&self) {
        let mut records = self.records.lock();
        while !records.is_empty() {
            self.drained.wait(&mut records);
        }
    }
}
