use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Core data model of the tracing subsystem.
///
/// A `Record` is the in-memory representation of one observed runtime event.
/// Records are preallocated in fixed-size pools at startup and cycle between
/// a *free* state (no owner, available to any thread) and a *claimed* state
/// (owned by the producer thread that will deliver it) for the lifetime of
/// the process. Nothing on the recording path allocates.

/// Sentinel identity meaning "no identity assigned". Never issued by the
/// identity table.
pub const NO_ID: i64 = 0;

/// A handle to an object of the traced runtime.
///
/// The handle carries the object's identity slot, written once by the
/// identity table and read lock-free from any thread. Cloning is a
/// reference-count bump; records hold clones of the handles they observe so
/// an object stays addressable until every record mentioning it has been
/// drained.
#[derive(Clone, Debug)]
pub struct ObjectRef {
    slot: Arc<AtomicI64>,
}

impl ObjectRef {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(AtomicI64::new(NO_ID)),
        }
    }

    /// Reads the identity slot. Returns [`NO_ID`] until the identity table
    /// has assigned an id.
    pub fn id(&self) -> i64 {
        self.slot.load(Ordering::Acquire)
    }

    pub(crate) fn store_id(&self, id: i64) {
        self.slot.store(id, Ordering::Release);
    }

    /// Two handles are the same object iff they share an identity slot.
    pub fn same_object(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

/// The closed set of observable operation shapes.
///
/// One variant per event shape; each variant statically determines which
/// payload slots of a [`Record`] are meaningful. The set is fixed at compile
/// time so sink dispatch is an exhaustive `match`, not open-ended virtual
/// dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RecordKind {
    /// Object creation. `payload_a` = created object.
    New,
    /// Array creation. `payload_a` = created array, `packed` = length.
    NewArray,
    /// Instance field read. `payload_a` = object, `packed` = field id.
    GetField,
    /// Instance field write, integer-family value in `payload_b`.
    PutFieldInt,
    /// Instance field write, float-family value in `payload_b`.
    PutFieldFloat,
    /// Instance field write, object value in `payload_b`.
    PutFieldObject,
    /// Static field read. `payload_a` = static holder, `packed` = field id.
    GetStatic,
    PutStaticInt,
    PutStaticFloat,
    PutStaticObject,
    /// Array element read. `payload_a` = array, `packed` = index.
    ArrayLoad,
    ArrayStoreInt,
    ArrayStoreFloat,
    ArrayStoreObject,
    /// Invocation, before the call. `payload_a` = receiver (empty for
    /// static), `packed` = method id.
    InvokeBefore,
    /// Invocation, after the call returned.
    InvokeAfter,
    /// Method return (control transfer out).
    Return,
    /// Branch taken. `packed` = target offset.
    Branch,
    /// Monitor acquisition. `payload_a` = monitor object.
    MonitorEnter,
    MonitorExit,
    /// Garbage collection cycle boundary.
    Gc,
    /// Object first observed without a tracked creation event.
    /// `payload_a` = the object.
    Unseen,
    /// Identity reclaimed after a collection cycle. `payload_b` = the id.
    Removal,
    /// Producer thread registered with the tracer.
    ThreadStart,
    /// Producer thread terminating; emitted just before its final flush.
    ThreadEnd,
}

impl RecordKind {
    pub const ALL: [RecordKind; 25] = [
        RecordKind::New,
        RecordKind::NewArray,
        RecordKind::GetField,
        RecordKind::PutFieldInt,
        RecordKind::PutFieldFloat,
        RecordKind::PutFieldObject,
        RecordKind::GetStatic,
        RecordKind::PutStaticInt,
        RecordKind::PutStaticFloat,
        RecordKind::PutStaticObject,
        RecordKind::ArrayLoad,
        RecordKind::ArrayStoreInt,
        RecordKind::ArrayStoreFloat,
        RecordKind::ArrayStoreObject,
        RecordKind::InvokeBefore,
        RecordKind::InvokeAfter,
        RecordKind::Return,
        RecordKind::Branch,
        RecordKind::MonitorEnter,
        RecordKind::MonitorExit,
        RecordKind::Gc,
        RecordKind::Unseen,
        RecordKind::Removal,
        RecordKind::ThreadStart,
        RecordKind::ThreadEnd,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Stable index of this kind, used to select its record pool.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short mnemonic used by text sinks.
    pub fn mnemonic(self) -> &'static str {
        match self {
            RecordKind::New => "new",
            RecordKind::NewArray => "newarr",
            RecordKind::GetField => "getf",
            RecordKind::PutFieldInt => "putf-i",
            RecordKind::PutFieldFloat => "putf-f",
            RecordKind::PutFieldObject => "putf-o",
            RecordKind::GetStatic => "gets",
            RecordKind::PutStaticInt => "puts-i",
            RecordKind::PutStaticFloat => "puts-f",
            RecordKind::PutStaticObject => "puts-o",
            RecordKind::ArrayLoad => "aload",
            RecordKind::ArrayStoreInt => "astore-i",
            RecordKind::ArrayStoreFloat => "astore-f",
            RecordKind::ArrayStoreObject => "astore-o",
            RecordKind::InvokeBefore => "invoke<",
            RecordKind::InvokeAfter => "invoke>",
            RecordKind::Return => "ret",
            RecordKind::Branch => "br",
            RecordKind::MonitorEnter => "mon+",
            RecordKind::MonitorExit => "mon-",
            RecordKind::Gc => "gc",
            RecordKind::Unseen => "unseen",
            RecordKind::Removal => "removal",
            RecordKind::ThreadStart => "thread+",
            RecordKind::ThreadEnd => "thread-",
        }
    }
}

/// One payload slot of a record. Long and double payloads of the traced
/// runtime collapse into `Int`/`Float`.
#[derive(Clone, Debug, Default)]
pub enum Slot {
    #[default]
    Empty,
    Object(ObjectRef),
    Int(i64),
    Float(f64),
}

impl Slot {
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Slot::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

/// One buffered runtime event.
///
/// A record is either free (`owner == None`) or claimed (`owner` names the
/// producer thread, payload valid, pending delivery to a sink). The
/// free/claimed transitions are verified: claiming a claimed record or
/// releasing a free one is a bug in the pool, not a recoverable condition.
#[derive(Debug)]
pub struct Record {
    kind: RecordKind,
    owner: Option<ThreadId>,
    pub timestamp: u64,
    pub payload_a: Slot,
    pub payload_b: Slot,
    pub packed: i32,
}

impl Record {
    pub(crate) fn free(kind: RecordKind) -> Self {
        Self {
            kind,
            owner: None,
            timestamp: 0,
            payload_a: Slot::Empty,
            payload_b: Slot::Empty,
            packed: 0,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    pub(crate) fn claim(&mut self, thread: ThreadId) {
        debug_assert!(self.is_free(), "claimed a record that was not free");
        self.owner = Some(thread);
    }

    /// Clears the owner and payload, returning the record to its free state.
    /// Must only happen after a sink has fully consumed the payload.
    pub(crate) fn release(&mut self) {
        debug_assert!(!self.is_free(), "released a record that was not claimed");
        self.owner = None;
        self.timestamp = 0;
        self.payload_a = Slot::Empty;
        self.payload_b = Slot::Empty;
        self.packed = 0;
    }
}
