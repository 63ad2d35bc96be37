//! Per-collector bookkeeping: the operation log, the event sink and the
//! cumulative statistics.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::GcError;
use crate::memory::events::{EventSink, GcEvent, NullSink};
use crate::memory::gc::{GcStats, GcSummary};
use crate::memory::heap::Heap;
use crate::memory::object::HeapObject;

pub struct GcRecorder {
    step: u64,
    logs: Vec<String>,
    sink: Box<dyn EventSink>,
    collections: usize,
    objects_collected: usize,
    bytes_freed: usize,
    total_time: Duration,
    last: Option<GcStats>,
    allocations: usize,
    failed_allocations: usize,
    anomalies: usize,
}

impl GcRecorder {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            step: 0,
            logs: Vec::new(),
            sink,
            collections: 0,
            objects_collected: 0,
            bytes_freed: 0,
            total_time: Duration::ZERO,
            last: None,
            allocations: 0,
            failed_allocations: 0,
            anomalies: 0,
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(step = self.step, "{}", message);
        self.logs.push(format!("[{}] {}", self.step, message));
    }

    pub fn emit(&mut self, event: GcEvent) {
        self.sink.record(&event);
    }

    /// Logs a rejected operation. The heap is untouched.
    pub fn reject(&mut self, op: &str, err: &GcError) {
        warn!(step = self.step, kind = err.kind(), "{} rejected: {}", op, err);
        self.log(format!("{op} FAILED: {err}"));
    }

    pub fn record_allocation(&mut self, obj: &HeapObject) {
        self.allocations += 1;
        self.log(format!("ALLOCATE: {} (size={} bytes)", obj.id(), obj.size()));
        self.emit(GcEvent::Allocate {
            object_id: obj.id(),
        });
    }

    pub fn record_failed_allocation(&mut self, err: &GcError) {
        self.failed_allocations += 1;
        self.reject("ALLOCATE", err);
    }

    pub fn record_deleted(&mut self, obj: &HeapObject) {
        self.log(format!("DELETE: {} (freed {} bytes)", obj.id(), obj.size()));
        self.emit(GcEvent::Delete {
            object_id: obj.id(),
        });
    }

    /// Reports a bookkeeping defect that was clamped instead of propagated.
    pub fn anomaly(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(step = self.step, "{}", message);
        self.anomalies += 1;
        self.log(format!("ANOMALY: {message}"));
    }

    /// Counts objects reclaimed eagerly, outside a collection run.
    pub fn record_reclaimed(&mut self, objects: usize, bytes: usize) {
        self.objects_collected += objects;
        self.bytes_freed += bytes;
    }

    pub fn finish_collection(&mut self, stats: GcStats) {
        self.collections += 1;
        self.objects_collected += stats.objects_collected;
        self.bytes_freed += stats.bytes_freed;
        self.total_time += stats.duration;
        info!(
            collection = self.collections,
            objects = stats.objects_collected,
            bytes = stats.bytes_freed,
            "collection finished in {:?}",
            stats.duration
        );
        self.log(format!(
            "[COLLECTION #{}] freed {} objects, {} bytes",
            self.collections, stats.objects_collected, stats.bytes_freed
        ));
        self.last = Some(stats);
    }

    pub fn last_collection(&self) -> Option<&GcStats> {
        self.last.as_ref()
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn last_log(&self) -> Option<&str> {
        self.logs.last().map(String::as_str)
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    pub fn flush(&mut self) {
        self.sink.flush();
    }

    pub fn summary(&self, strategy: &'static str, heap: &Heap) -> GcSummary {
        GcSummary {
            strategy,
            collections: self.collections,
            objects_collected: self.objects_collected,
            bytes_freed: self.bytes_freed,
            total_time: self.total_time,
            last_time: self.last.as_ref().map(|stats| stats.duration),
            allocations: self.allocations,
            failed_allocations: self.failed_allocations,
            anomalies: self.anomalies,
            alive_objects: heap.len(),
            heap_used: heap.used(),
            heap_peak: heap.peak(),
            heap_capacity: heap.capacity(),
        }
    }
}

impl Default for GcRecorder {
    fn default() -> Self {
        Self::new(Box::new(NullSink))
    }
}

impl std::fmt::Debug for GcRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcRecorder")
            .field("step", &self.step)
            .field("logs", &self.logs.len())
            .field("collections", &self.collections)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::events::MemorySink;
    use crate::memory::object::ObjectId;

    #[test]
    fn test_logs_are_stamped_with_step() {
        let mut recorder = GcRecorder::default();
        recorder.set_step(4);
        recorder.log("hello");
        assert_eq!(recorder.last_log(), Some("[4] hello"));
        recorder.clear_logs();
        assert!(recorder.logs().is_empty());
    }

    #[test]
    fn test_collection_totals() {
        let sink = MemorySink::new();
        let mut recorder = GcRecorder::new(Box::new(sink.clone()));
        recorder.finish_collection(GcStats {
            objects_collected: 2,
            bytes_freed: 48,
            duration: Duration::from_micros(5),
            collected: vec![ObjectId::new(1), ObjectId::new(2)],
        });
        recorder.finish_collection(GcStats::default());

        let summary = recorder.summary("mark_sweep", &Heap::new(100));
        assert_eq!(summary.collections, 2);
        assert_eq!(summary.objects_collected, 2);
        assert_eq!(summary.bytes_freed, 48);
        assert_eq!(summary.last_time, Some(Duration::ZERO));
        assert!(sink.is_empty());
    }
}
