//! Garbage collection contract shared by every strategy

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use utils::Stopwatch;

use crate::error::{GcError, GcResult};
use crate::memory::cascade::CascadeDeletionGC;
use crate::memory::config::{GcConfig, GcStrategy};
use crate::memory::events::{EventSink, GcEvent};
use crate::memory::heap::{Heap, HeapSnapshot};
use crate::memory::mark_sweep::MarkSweepGC;
use crate::memory::object::{HeapObject, ObjectId};
use crate::memory::rc::RcGC;
use crate::memory::recorder::GcRecorder;

/// Trait for garbage collection strategies
///
/// Every strategy exposes the same operation set, so a driver can replay one
/// script against any of them. Root management is part of the contract.
pub trait GcStrategyTrait: Send {
    /// Get the strategy name
    fn name(&self) -> &'static str;

    fn strategy(&self) -> GcStrategy;

    /// Heap, configuration and recorder owned by this collector
    fn core(&self) -> &GcCore;

    fn core_mut(&mut self) -> &mut GcCore;

    /// Allocate an object, with an explicit identity or the next free one
    fn allocate_object(&mut self, id: Option<ObjectId>, size: usize) -> GcResult<ObjectId>;

    /// Add a root object
    fn add_root(&mut self, id: ObjectId) -> GcResult<()>;

    /// Remove a root object
    fn remove_root(&mut self, id: ObjectId) -> GcResult<()>;

    /// Add the edge `from -> to`. Adding an existing edge is a no-op.
    fn add_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()>;

    fn remove_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()>;

    /// Run garbage collection
    fn collect_with_stats(&mut self) -> GcStats;

    /// End-of-run leak pass. Emits one leak event per finding.
    fn detect_leaks(&mut self) -> Vec<ObjectId>;

    fn allocate(&mut self, size: usize) -> GcResult<ObjectId> {
        self.allocate_object(None, size)
    }

    fn allocate_with_id(&mut self, id: ObjectId, size: usize) -> GcResult<ObjectId> {
        self.allocate_object(Some(id), size)
    }

    /// Allocate with the configured default object size
    fn allocate_default(&mut self) -> GcResult<ObjectId> {
        let size = self.core().config.default_object_size;
        self.allocate_object(None, size)
    }

    /// Run garbage collection and return the bytes freed
    fn collect(&mut self) -> usize {
        self.collect_with_stats().bytes_freed
    }

    fn heap(&self) -> &Heap {
        &self.core().heap
    }

    fn config(&self) -> &GcConfig {
        &self.core().config
    }

    fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.heap().get(id)
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.heap().contains(id)
    }

    fn total_memory(&self) -> usize {
        self.heap().used()
    }

    fn free_memory(&self) -> usize {
        self.heap().free()
    }

    fn capacity(&self) -> usize {
        self.heap().capacity()
    }

    fn alive_objects(&self) -> usize {
        self.heap().len()
    }

    fn set_current_step(&mut self, step: u64) {
        self.core_mut().recorder.set_step(step);
    }

    fn current_step(&self) -> u64 {
        self.core().recorder.step()
    }

    fn logs(&self) -> &[String] {
        self.core().recorder.logs()
    }

    fn last_log(&self) -> Option<&str> {
        self.core().recorder.last_log()
    }

    fn clear_logs(&mut self) {
        self.core_mut().recorder.clear_logs();
    }

    fn flush_events(&mut self) {
        self.core_mut().recorder.flush();
    }

    fn summary(&self) -> GcSummary {
        let core = self.core();
        core.recorder.summary(self.name(), &core.heap)
    }

    fn last_collection(&self) -> Option<&GcStats> {
        self.core().recorder.last_collection()
    }

    /// Serializable heap dump. `ref_count` is the tracked counter under
    /// reference counting and the edge-derived count otherwise.
    fn snapshot(&self) -> HeapSnapshot {
        let mut snapshot = self.heap().snapshot(self.current_step());
        if self.strategy() != GcStrategy::ReferenceCounting {
            for obj in &mut snapshot.objects {
                obj.ref_count = obj.refs_from.len() + usize::from(obj.is_root);
            }
        }
        snapshot
    }

    /// Objects with incoming edges that no root reaches, i.e. objects kept
    /// alive only by a cycle or by another unreachable object.
    fn cycle_leaks(&self) -> Vec<ObjectId> {
        let heap = self.heap();
        heap.unreachable()
            .into_iter()
            .filter(|id| heap.get(*id).is_some_and(|obj| obj.incoming_count() > 0))
            .collect()
    }

    fn check_invariants(&self) -> Result<(), String> {
        self.heap().check_consistency()
    }
}

/// Statistics from a garbage collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    /// Number of objects collected
    pub objects_collected: usize,
    /// Bytes freed
    pub bytes_freed: usize,
    pub duration: Duration,
    /// Collected identities, sorted
    pub collected: Vec<ObjectId>,
}

impl GcStats {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Cumulative statistics of one collector instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcSummary {
    pub strategy: &'static str,
    pub collections: usize,
    pub objects_collected: usize,
    pub bytes_freed: usize,
    pub total_time: Duration,
    pub last_time: Option<Duration>,
    pub allocations: usize,
    pub failed_allocations: usize,
    pub anomalies: usize,
    pub alive_objects: usize,
    pub heap_used: usize,
    pub heap_peak: usize,
    pub heap_capacity: usize,
}

impl GcSummary {
    pub fn heap_utilization(&self) -> f64 {
        if self.heap_capacity == 0 {
            return 0.0;
        }
        self.heap_used as f64 / self.heap_capacity as f64
    }
}

impl fmt::Display for GcSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GC Summary ({})", self.strategy)?;
        writeln!(f, "  Collections:       {}", self.collections)?;
        writeln!(f, "  Objects collected: {}", self.objects_collected)?;
        writeln!(f, "  Bytes freed:       {}", self.bytes_freed)?;
        writeln!(
            f,
            "  GC time:           {:.3}ms total",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        if let Some(last) = self.last_time {
            writeln!(
                f,
                "  Last collection:   {:.3}ms",
                last.as_secs_f64() * 1000.0
            )?;
        }
        writeln!(
            f,
            "  Allocations:       {} ({} failed)",
            self.allocations, self.failed_allocations
        )?;
        if self.anomalies > 0 {
            writeln!(f, "  Anomalies:         {}", self.anomalies)?;
        }
        writeln!(f, "  Alive objects:     {}", self.alive_objects)?;
        write!(
            f,
            "  Heap:              {} / {} bytes ({:.1}%), peak {}",
            self.heap_used,
            self.heap_capacity,
            self.heap_utilization() * 100.0,
            self.heap_peak
        )
    }
}

/// State every collector owns: configuration, heap and recorder.
#[derive(Debug)]
pub struct GcCore {
    pub(crate) config: GcConfig,
    pub(crate) heap: Heap,
    pub(crate) recorder: GcRecorder,
}

impl GcCore {
    pub fn new(config: GcConfig, sink: Box<dyn EventSink>) -> Self {
        let heap = Heap::new(config.max_heap_size);
        Self {
            config,
            heap,
            recorder: GcRecorder::new(sink),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Logs a rejected operation and hands the error back.
    pub(crate) fn guard<T>(&mut self, op: &str, result: GcResult<T>) -> GcResult<T> {
        if let Err(err) = &result {
            self.recorder.reject(op, err);
        }
        result
    }

    /// Shared allocation path. `collect` runs the owning strategy's collection
    /// at most once: under memory pressure, or when the heap is full.
    pub(crate) fn allocate(
        &mut self,
        id: Option<ObjectId>,
        size: usize,
        collect: fn(&mut GcCore) -> GcStats,
    ) -> GcResult<ObjectId> {
        match self.try_allocate(id, size, collect) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.recorder.record_failed_allocation(&err);
                Err(err)
            }
        }
    }

    fn try_allocate(
        &mut self,
        id: Option<ObjectId>,
        size: usize,
        collect: fn(&mut GcCore) -> GcStats,
    ) -> GcResult<ObjectId> {
        self.heap.check_size(size)?;
        if let Some(id) = id {
            self.heap.check_new_identity(id)?;
        }

        // At most one collection per allocation.
        let mut collected = false;
        if self.config.auto_gc
            && !self.heap.is_empty()
            && self.heap.used() + size > self.config.pressure_limit()
        {
            self.recorder.log(format!(
                "MEMORY PRESSURE: {} + {} bytes exceeds threshold {}",
                self.heap.used(),
                size,
                self.config.pressure_limit()
            ));
            collect(self);
            collected = true;
        }

        if !self.heap.has_room_for(size) && !collected {
            self.recorder.log(format!(
                "HEAP FULL: {} bytes requested, {} free, collecting",
                size,
                self.heap.free()
            ));
            collect(self);
        }
        if !self.heap.has_room_for(size) {
            return Err(GcError::OutOfMemory {
                requested: size,
                free: self.heap.free(),
                capacity: self.heap.capacity(),
            });
        }

        let id = match id {
            Some(id) => id,
            None => self.heap.next_identity(),
        };
        let step = self.recorder.step();
        self.heap.insert(id, size, step);
        if let Some(obj) = self.heap.get(id) {
            self.recorder.record_allocation(obj);
        }
        Ok(id)
    }

    /// Toggles the root flag after checking the current state.
    pub(crate) fn set_root(&mut self, id: ObjectId, root: bool) -> GcResult<()> {
        let obj = self.heap.require_mut(id)?;
        match (obj.root, root) {
            (true, true) => return Err(GcError::AlreadyRoot(id)),
            (false, false) => return Err(GcError::NotRoot(id)),
            _ => obj.root = root,
        }
        if root {
            self.recorder.log(format!("ADD_ROOT: {id}"));
        } else {
            self.recorder.log(format!("REMOVE_ROOT: {id}"));
        }
        Ok(())
    }

    /// Inserts `from -> to`. Returns `false` for an edge that already existed.
    pub(crate) fn link(&mut self, from: ObjectId, to: ObjectId) -> GcResult<bool> {
        let added = self.heap.link(from, to)?;
        if added {
            self.recorder.log(format!("ADD_REF: {from} -> {to}"));
        } else {
            self.recorder
                .log(format!("ADD_REF: {from} -> {to} already exists, ignored"));
        }
        Ok(added)
    }

    pub(crate) fn unlink(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        self.heap.unlink(from, to)?;
        self.recorder.log(format!("REM_REF: {from} -X-> {to}"));
        Ok(())
    }

    /// Incoming edges plus the root contribution.
    pub(crate) fn derived_count(&self, id: ObjectId) -> usize {
        self.heap.get(id).map_or(0, HeapObject::derived_ref_count)
    }

    /// Emits an edge event carrying the edge-derived count of `to`.
    pub(crate) fn emit_edge(&mut self, added: bool, from: ObjectId, to: ObjectId) {
        let count = self.derived_count(to);
        self.emit_edge_with_count(added, from, to, count);
    }

    pub(crate) fn emit_edge_with_count(
        &mut self,
        added: bool,
        from: ObjectId,
        to: ObjectId,
        resulting_ref_count: usize,
    ) {
        let event = if added {
            GcEvent::AddRef {
                from_id: from,
                to_id: to,
                resulting_ref_count,
            }
        } else {
            GcEvent::RemoveRef {
                from_id: from,
                to_id: to,
                resulting_ref_count,
            }
        };
        self.recorder.emit(event);
    }

    /// Removes `id` from the heap and reports it. Returns the freed size.
    pub(crate) fn delete(&mut self, id: ObjectId) -> Option<usize> {
        let step = self.recorder.step();
        let obj = self.heap.remove(id, step)?;
        self.recorder.record_deleted(&obj);
        Some(obj.size())
    }

    /// Reports each leaked identity and returns them.
    pub(crate) fn report_leaks(&mut self, leaks: Vec<ObjectId>) -> Vec<ObjectId> {
        for id in &leaks {
            tracing::warn!(object = %id, "leak detected");
            self.recorder.log(format!("LEAK: {id}"));
            self.recorder.emit(GcEvent::Leak { object_id: *id });
        }
        leaks
    }

    /// Times `run`, turns the collected identities into stats and records
    /// the collection.
    pub(crate) fn timed_collection(
        &mut self,
        run: impl FnOnce(&mut GcCore) -> (Vec<ObjectId>, usize),
    ) -> GcStats {
        let stopwatch = Stopwatch::start_new();
        let (mut collected, bytes_freed) = run(self);
        collected.sort_unstable();
        let stats = GcStats {
            objects_collected: collected.len(),
            bytes_freed,
            duration: stopwatch.elapsed(),
            collected,
        };
        self.recorder.finish_collection(stats.clone());
        stats
    }
}

/// Create a collector for the configured strategy
pub fn create_collector(config: GcConfig, sink: Box<dyn EventSink>) -> Box<dyn GcStrategyTrait> {
    match config.strategy {
        GcStrategy::ReferenceCounting => Box::new(RcGC::new(config, sink)),
        GcStrategy::MarkSweep => Box::new(MarkSweepGC::new(config, sink)),
        GcStrategy::CascadeDeletion => Box::new(CascadeDeletionGC::new(config, sink)),
    }
}
