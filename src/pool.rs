use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::record::{Record, RecordKind};

/// Fixed-capacity, preallocated pools of reusable records, one per kind.
///
/// Every record the process will ever use is created here at startup. A
/// claim moves a record out of the pool's free list with the owner stamped;
/// a release verifies the claimed state, clears the payload and returns the
/// record. Moving the value through the free list makes "release" a checked
/// state transition rather than an in-place tag flip.

/// Pool of records of a single kind.
pub(crate) struct RecordPool {
    kind: RecordKind,
    capacity: usize,
    free: Mutex<Vec<Record>>,
    /// Signalled on every release; exhausted claimants park here until a
    /// record comes back.
    returned: Condvar,
}

impl RecordPool {
    pub(crate) fn new(kind: RecordKind, capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Record::free(kind));
        }
        Self {
            kind,
            capacity,
            free: Mutex::new(free),
            returned: Condvar::new(),
        }
    }

    /// Takes a free record and stamps `thread` as its owner. Returns `None`
    /// when the pool is exhausted; the caller is expected to force a flush
    /// of its own buffer and retry.
    pub(crate) fn try_claim(&self, thread: ThreadId) -> Option<Record> {
        let mut free = self.free.lock();
        free.pop().map(|mut record| {
            record.claim(thread);
            record
        })
    }

    /// Blocks until a record can be claimed, or until `timeout` passes with
    /// no release. Other threads' buffers may be holding every record of
    /// this pool; a release arrives when one of them flushes.
    pub(crate) fn claim_or_wait(&self, thread: ThreadId, timeout: Duration) -> Option<Record> {
        let mut free = self.free.lock();
        loop {
            if let Some(mut record) = free.pop() {
                record.claim(thread);
                return Some(record);
            }
            if self.returned.wait_for(&mut free, timeout).timed_out() {
                return None;
            }
        }
    }

    /// Returns a drained record to the free list. The record must have come
    /// from this pool and still be claimed.
    pub(crate) fn release(&self, mut record: Record) {
        assert_eq!(record.kind(), self.kind, "record released to wrong pool");
        record.release();
        let mut free = self.free.lock();
        debug_assert!(free.len() < self.capacity);
        free.push(record);
        self.returned.notify_one();
    }

    pub(crate) fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One pool per record kind, indexed by [`RecordKind::index`].
pub(crate) struct PoolSet {
    pools: Vec<RecordPool>,
}

impl PoolSet {
    pub(crate) fn new(capacity_per_kind: usize) -> Self {
        let pools = RecordKind::ALL
            .iter()
            .map(|&kind| RecordPool::new(kind, capacity_per_kind))
            .collect();
        Self { pools }
    }

    pub(crate) fn pool(&self, kind: RecordKind) -> &RecordPool {
        &self.pools[kind.index()]
    }

    pub(crate) fn release(&self, record: Record) {
        self.pool(record.kind()).release(record);
    }
}
