pub mod error;
pub mod memory;

pub use error::{GcError, GcResult};
pub use memory::{
    CascadeDeletionGC, EventSink, GcConfig, GcEvent, GcStats, GcStrategy, GcStrategyTrait,
    GcSummary, HeapSnapshot, MarkSweepGC, MemorySink, NullSink, ObjectId, RcGC,
    create_collector,
};
