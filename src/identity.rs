use parking_lot::Mutex;

use crate::record::{ObjectRef, NO_ID};

/// Object identity assignment and reclamation, synchronized with the
/// collector's liveness tracking.
///
/// Positive ids are bit indices in the `live` vector; id 0 is reserved as
/// the "no identity" sentinel. Negative ids, strictly decreasing from -1,
/// go to objects first observed without a tracked creation event and are
/// not backed by the bit vectors at all.
///
/// `increment_lifetime` and `gc` are called from the collector and are
/// allocation-free and non-blocking by construction: pure bit operations
/// under the table mutex, which the flush consumer never takes. Reads of an
/// already-assigned id go straight to the object's atomic slot and never
/// touch the mutex.

const WORD_BITS: usize = u64::BITS as usize;

struct TableState {
    live: Vec<u64>,
    survivors: Vec<u64>,
    /// Bits below this index are known set; the free-bit scan starts here.
    lowest_free: usize,
    next_unseen: i64,
}

pub struct ObjectStateTable {
    state: Mutex<TableState>,
}

impl ObjectStateTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                live: vec![1], // bit 0 permanently taken: id 0 is reserved
                survivors: vec![0],
                lowest_free: 1,
                next_unseen: -1,
            }),
        }
    }

    /// Assigns the lowest free positive id, writes it into the object's
    /// identity slot and returns it. Never returns 0.
    pub fn assign_id(&self, obj: &ObjectRef) -> i64 {
        let mut state = self.state.lock();
        let bit = Self::find_clear(&state.live, state.lowest_free);
        Self::grow_to(&mut state.live, bit);
        Self::grow_to(&mut state.survivors, bit);
        state.live[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        state.lowest_free = bit + 1;
        let id = bit as i64;
        obj.store_id(id);
        id
    }

    /// Assigns the next unseen id (-1, -2, ...) for an object observed
    /// through a read or write rather than through its creation event.
    pub fn assign_unseen_id(&self, obj: &ObjectRef) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_unseen;
        state.next_unseen -= 1;
        obj.store_id(id);
        id
    }

    /// Like [`assign_unseen_id`](Self::assign_unseen_id), but only if the
    /// object still has no identity. Returns `None` when another thread won
    /// the race; exactly one unseen id is ever issued per object.
    pub fn assign_unseen_if_absent(&self, obj: &ObjectRef) -> Option<i64> {
        let mut state = self.state.lock();
        if obj.id() != NO_ID {
            return None;
        }
        let id = state.next_unseen;
        state.next_unseen -= 1;
        obj.store_id(id);
        Some(id)
    }

    /// 0 for a null object or one that has never been assigned an identity.
    /// Lock-free; never blocks tracing producers against each other.
    pub fn read_id(&self, obj: Option<&ObjectRef>) -> i64 {
        obj.map_or(NO_ID, ObjectRef::id)
    }

    /// Survivor visit: the collector determined `obj` is still reachable in
    /// the current cycle. Called once per object per cycle. Unseen
    /// (negative) ids are not tracked this way.
    pub fn increment_lifetime(&self, obj: &ObjectRef) {
        let id = obj.id();
        if id > 0 {
            let bit = id as usize;
            let mut state = self.state.lock();
            debug_assert!(bit < state.survivors.len() * WORD_BITS);
            state.survivors[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        }
    }

    /// Cycle boundary: every id live before the cycle but not visited as a
    /// survivor is reported to `removal`, cleared, and becomes reusable by
    /// a later [`assign_id`]. Survivor marks are reset for the next cycle.
    pub fn gc(&self, mut removal: impl FnMut(i64)) {
        let mut state = self.state.lock();
        for word_index in 0..state.live.len() {
            let mut dead = state.live[word_index] & !state.survivors[word_index];
            if word_index == 0 {
                // Bit 0 backs the reserved sentinel and is never reclaimed.
                dead &= !1;
            }
            let mut bits = dead;
            while bits != 0 {
                let bit = word_index * WORD_BITS + bits.trailing_zeros() as usize;
                removal(bit as i64);
                bits &= bits - 1;
            }
            state.live[word_index] &= !dead;
            state.survivors[word_index] = 0;
            if dead != 0 {
                let first = word_index * WORD_BITS + dead.trailing_zeros() as usize;
                if first < state.lowest_free {
                    state.lowest_free = first;
                }
            }
        }
    }

    /// Number of currently assigned positive ids.
    pub fn live_count(&self) -> usize {
        let state = self.state.lock();
        let set: u32 = state.live.iter().map(|w| w.count_ones()).sum();
        set as usize - 1 // discount the reserved bit 0
    }

    /// Lowest clear bit at or above `from`.
    fn find_clear(words: &[u64], from: usize) -> usize {
        let mut word_index = from / WORD_BITS;
        if word_index >= words.len() {
            return from;
        }
        // Treat bits below the hint as taken.
        let mut word = words[word_index] | ((1u64 << (from % WORD_BITS)) - 1);
        loop {
            if word != u64::MAX {
                return word_index * WORD_BITS + word.trailing_ones() as usize;
            }
            word_index += 1;
            if word_index >= words.len() {
                return word_index * WORD_BITS;
            }
            word = words[word_index];
        }
    }

    fn grow_to(words: &mut Vec<u64>, bit: usize) {
        let needed = bit / WORD_BITS + 1;
        if words.len() < needed {
            words.resize(needed, 0);
        }
    }
}

impl Default for ObjectStateTable {
    fn default() -> Self {
        Self::new()
    }
}
