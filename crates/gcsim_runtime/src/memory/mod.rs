//! Simulated heap and the garbage collectors that manage it
//!
//! Provides reference counting, mark-and-sweep and cascade deletion over a
//! shared identity-indexed heap.

pub mod arena;
pub mod cascade;
pub mod config;
pub mod events;
pub mod gc;
pub mod heap;
pub mod mark_sweep;
pub mod object;
pub mod rc;
pub mod recorder;

pub use cascade::CascadeDeletionGC;
pub use config::{GcConfig, GcStrategy};
pub use events::{EventSink, GcEvent, MemorySink, NullSink};
pub use gc::{GcCore, GcStats, GcStrategyTrait, GcSummary, create_collector};
pub use heap::{Heap, HeapSnapshot, ObjectSnapshot};
pub use mark_sweep::MarkSweepGC;
pub use object::{HeapObject, ObjectId};
pub use rc::RcGC;
pub use recorder::GcRecorder;
