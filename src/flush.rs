use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::pool::PoolSet;
use crate::sink::Sink;
use crate::thread_buffer::ThreadBuffer;

/// Single-flight buffer handoff between producer threads and the one
/// long-lived flush consumer.
///
/// The shared cell holds at most one buffer at any instant. A producer that
/// wants to flush waits for the cell to free up, installs its buffer, then
/// parks on the buffer's own completion condition. The consumer drains the
/// installed buffer *while still holding the cell's mutex*: the drain itself
/// is the critical section that keeps flushing single-flight, so no two
/// threads' batches ever interleave at the sink.

struct HandoffCell {
    pending: Option<Arc<ThreadBuffer>>,
    shutdown: bool,
}

struct Handoff {
    cell: Mutex<HandoffCell>,
    changed: Condvar,
}

pub(crate) struct FlushCoordinator {
    handoff: Arc<Handoff>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl FlushCoordinator {
    /// Spawns the consumer thread. `sink` is moved onto it and is only ever
    /// touched from there.
    pub(crate) fn start(sink: Box<dyn Sink>, pools: Arc<PoolSet>) -> Self {
        let handoff = Arc::new(Handoff {
            cell: Mutex::new(HandoffCell {
                pending: None,
                shutdown: false,
            }),
            changed: Condvar::new(),
        });
        let consumer_handoff = Arc::clone(&handoff);
        let consumer = std::thread::Builder::new()
            .name("tracer-flush".into())
            .spawn(move || consume(consumer_handoff, pools, sink))
            .expect("failed to spawn flush consumer");
        Self {
            handoff,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Hands `buffer` to the consumer and blocks until it has been drained
    /// back to empty. No-op for an empty buffer. After shutdown the call is
    /// silently dropped; finalization starves further flushing by design.
    pub(crate) fn flush(&self, buffer: &Arc<ThreadBuffer>) {
        if buffer.len() == 0 {
            return;
        }
        {
            let mut cell = self.handoff.cell.lock();
            // Single-flight: wait out whichever buffer currently occupies
            // the cell.
            while cell.pending.is_some() {
                if cell.shutdown {
                    return;
                }
                self.handoff.changed.wait(&mut cell);
            }
            if cell.shutdown {
                return;
            }
            cell.pending = Some(Arc::clone(buffer));
            // notify_all: other producers waiting here must re-check the
            // cell state, not just the consumer.
            self.handoff.changed.notify_all();
        }
        buffer.wait_drained();
    }

    /// Lets the consumer finish any in-flight drain, finalize the sink and
    /// exit, then joins it. Flush requests arriving after this are dropped.
    pub(crate) fn shutdown(&self) {
        {
            let mut cell = self.handoff.cell.lock();
            cell.shutdown = true;
            self.handoff.changed.notify_all();
        }
        if let Some(consumer) = self.consumer.lock().take() {
            if consumer.join().is_err() {
                panic!("flush consumer terminated abnormally");
            }
        }
    }
}

fn consume(handoff: Arc<Handoff>, pools: Arc<PoolSet>, mut sink: Box<dyn Sink>) {
    debug!("flush consumer started");
    loop {
        let buffer;
        {
            let mut cell = handoff.cell.lock();
            loop {
                if let Some(pending) = cell.pending.clone() {
                    buffer = pending;
                    break;
                }
                if cell.shutdown {
                    drop(cell);
                    if let Err(err) = sink.finish() {
                        panic!("sink finalization failed: {err}");
                    }
                    debug!("flush consumer exiting");
                    return;
                }
                handoff.changed.wait(&mut cell);
            }

            // Drain while holding the cell mutex; producers stay parked for
            // the whole batch, not just the install.
            sink.begin_batch(buffer.thread());
            let drained = buffer.drain_with(|record| {
                // A dispatch failure is fatal for the pipeline; there is no
                // partial-batch retry.
                if let Err(err) = sink.dispatch(&record) {
                    panic!("record dispatch failed: {err}");
                }
                pools.release(record);
            });
            trace!("drained {} records for {:?}", drained, buffer.thread());

            cell.pending = None;
            handoff.changed.notify_all();
        }
        // Fill is back to zero; unblock the producer that installed it.
        buffer.notify_drained();
    }
}
