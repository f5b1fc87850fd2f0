//! # Runtime Tracer
//!
//! A runtime event-recording and flushing subsystem for tracing the
//! fine-grained execution of a managed runtime (allocations, field and
//! array accesses, invocations, GC lifecycle) with minimal overhead:
//!
//! * **Zero-allocation recording path**: every record is preallocated in a
//!   fixed pool at startup and reused via claim/release for the life of the
//!   process
//! * **Per-thread ordering**: each producer thread buffers its own events
//!   and they reach the sink in exact append order
//! * **Single-flight flushing**: one dedicated consumer thread drains one
//!   buffer at a time, so batches from different threads never interleave
//! * **GC-synchronized identity**: objects get stable unique ids that are
//!   reclaimed only after a collection cycle proves them unreachable
//!
//! ## Main Components
//!
//! * `Tracer` / `ThreadHandle`: the recording facade; one handle per
//!   producer thread, obtained at thread start and dropped at thread end
//! * `Sink`: pluggable consumer of drained records (counting, text,
//!   LZ4-compressed text)
//! * `ObjectStateTable`: identity assignment and reclamation driven by the
//!   collector's survivor visits
//! * `name_registry`: interning of member names into compact ids
//!
//! ## Quick Start
//!
//! ```
//! use runtime_tracer::{CountingSink, ObjectRef, RecordKind, Tracer, TracerConfig};
//!
//! let sink = CountingSink::new();
//! let counts = sink.counts();
//! let tracer = Tracer::new(TracerConfig::default(), Box::new(sink));
//!
//! let handle = tracer.register_thread();
//! let obj = ObjectRef::new();
//! handle.record_new(&obj);
//! handle.record_get_field(&obj, runtime_tracer::register_name("Point.x"));
//! handle.finalize();
//!
//! assert_eq!(counts.of(RecordKind::New), 1);
//! assert_eq!(counts.of(RecordKind::GetField), 1);
//! ```

pub mod clock;
pub mod config;
pub mod identity;
pub mod name_registry;
pub mod record;
pub mod sink;
pub mod tracer;

mod flush;
mod pool;
mod thread_buffer;

pub use config::TracerConfig;
pub use identity::ObjectStateTable;
pub use name_registry::{lookup_name, register_name};
pub use record::{ObjectRef, Record, RecordKind, Slot, NO_ID};
pub use sink::{CountingSink, Lz4TextSink, NullSink, RecordCounts, Sink, TextSink};
pub use tracer::{ThreadHandle, Tracer};
