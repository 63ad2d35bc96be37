//! Reference counting collector
//!
//! Every edge and every root contributes one to the target's counter. An
//! object is deleted as soon as its counter drops to zero, and the deletion
//! cascades through its children. Unrooted cycles keep each other's counters
//! positive and are never reclaimed.

use std::collections::VecDeque;

use ahash::AHashSet;

use crate::error::{GcError, GcResult};
use crate::memory::config::{GcConfig, GcStrategy};
use crate::memory::events::{EventSink, NullSink};
use crate::memory::gc::{GcCore, GcStats, GcStrategyTrait};
use crate::memory::object::ObjectId;

/// Reference counting garbage collector
#[derive(Debug)]
pub struct RcGC {
    core: GcCore,
}

impl RcGC {
    pub fn new(config: GcConfig, sink: Box<dyn EventSink>) -> Self {
        Self {
            core: GcCore::new(config, sink),
        }
    }

    /// Reclamation is eager, so a collection run only records itself.
    fn run_collection(core: &mut GcCore) -> GcStats {
        core.recorder
            .log("RC COLLECT: reclamation is eager, nothing to sweep");
        core.timed_collection(|_| (Vec::new(), 0))
    }

    /// Decrements the counter of `id`. Returns `None` when the counter was
    /// already zero; the anomaly is reported and the counter stays at zero.
    fn release(core: &mut GcCore, id: ObjectId) -> Option<usize> {
        let obj = core.heap.get_mut(id)?;
        match obj.decrement_ref_count() {
            Some(count) => Some(count),
            None => {
                core.recorder
                    .anomaly(format!("ref_count of {id} would drop below zero"));
                None
            }
        }
    }

    /// Deletes `start` and every child whose counter reaches zero as a result.
    ///
    /// Works off an explicit queue; the processed set keeps cycles from being
    /// visited twice. Returns the deleted identities and freed bytes.
    fn cascade_delete(core: &mut GcCore, start: ObjectId) -> (Vec<ObjectId>, usize) {
        let mut queue = VecDeque::from([start]);
        let mut processed = AHashSet::new();
        let mut deleted = Vec::new();
        let mut freed = 0;

        while let Some(id) = queue.pop_front() {
            if !processed.insert(id) {
                continue;
            }
            let Some(obj) = core.heap.get(id) else {
                continue;
            };
            if obj.ref_count() != 0 {
                tracing::warn!(object = %id, ref_count = obj.ref_count(), "cascade refused");
                core.recorder.log(format!(
                    "CASCADE: {id} still has ref_count={}, skipped",
                    obj.ref_count()
                ));
                continue;
            }

            let children: Vec<ObjectId> = obj.outgoing().iter().copied().collect();
            for child in children {
                let Some(count) = Self::release(core, child) else {
                    continue;
                };
                core.emit_edge_with_count(false, id, child, count);
                if count == 0 {
                    queue.push_back(child);
                }
            }

            if let Some(size) = core.delete(id) {
                deleted.push(id);
                freed += size;
            }
        }

        if deleted.len() > 1 {
            core.recorder.log(format!(
                "CASCADE from {start}: {} objects, {} bytes",
                deleted.len(),
                freed
            ));
        }
        (deleted, freed)
    }

    fn try_add_root(&mut self, id: ObjectId) -> GcResult<()> {
        self.core.set_root(id, true)?;
        let count = self.core.heap.require_mut(id)?.increment_ref_count();
        self.core.emit_edge_with_count(true, ObjectId::ROOT, id, count);
        Ok(())
    }

    fn try_remove_root(&mut self, id: ObjectId) -> GcResult<()> {
        self.core.set_root(id, false)?;
        let Some(count) = Self::release(&mut self.core, id) else {
            return Ok(());
        };
        self.core.emit_edge_with_count(false, ObjectId::ROOT, id, count);
        if count == 0 {
            let (deleted, freed) = Self::cascade_delete(&mut self.core, id);
            self.core.recorder.record_reclaimed(deleted.len(), freed);
        }
        Ok(())
    }

    fn try_add_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        if !self.core.link(from, to)? {
            return Ok(());
        }
        let count = self.core.heap.require_mut(to)?.increment_ref_count();
        self.core.emit_edge_with_count(true, from, to, count);
        Ok(())
    }

    fn try_remove_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        self.core.heap.require(to)?;
        if !self.core.heap.contains(from) {
            if self.core.heap.is_retired(from) {
                // The source went away in an earlier cascade.
                self.core
                    .recorder
                    .log(format!("REM_REF: {from} already deleted, ignored"));
                return Ok(());
            }
            return Err(GcError::MissingObject(from));
        }

        self.core.unlink(from, to)?;
        let Some(count) = Self::release(&mut self.core, to) else {
            return Ok(());
        };
        self.core.emit_edge_with_count(false, from, to, count);
        if count == 0 {
            let (deleted, freed) = Self::cascade_delete(&mut self.core, to);
            self.core.recorder.record_reclaimed(deleted.len(), freed);
        }
        Ok(())
    }
}

impl GcStrategyTrait for RcGC {
    fn name(&self) -> &'static str {
        GcStrategy::ReferenceCounting.as_str()
    }

    fn strategy(&self) -> GcStrategy {
        GcStrategy::ReferenceCounting
    }

    fn core(&self) -> &GcCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut GcCore {
        &mut self.core
    }

    fn allocate_object(&mut self, id: Option<ObjectId>, size: usize) -> GcResult<ObjectId> {
        self.core.allocate(id, size, Self::run_collection)
    }

    fn add_root(&mut self, id: ObjectId) -> GcResult<()> {
        let result = self.try_add_root(id);
        self.core.guard("ADD_ROOT", result)
    }

    fn remove_root(&mut self, id: ObjectId) -> GcResult<()> {
        let result = self.try_remove_root(id);
        self.core.guard("REMOVE_ROOT", result)
    }

    fn add_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        let result = self.try_add_reference(from, to);
        self.core.guard("ADD_REF", result)
    }

    fn remove_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        let result = self.try_remove_reference(from, to);
        self.core.guard("REM_REF", result)
    }

    fn collect_with_stats(&mut self) -> GcStats {
        Self::run_collection(&mut self.core)
    }

    /// Flags every object whose counter is still positive, rooted or not.
    fn detect_leaks(&mut self) -> Vec<ObjectId> {
        let leaks: Vec<ObjectId> = self
            .core
            .heap
            .ids()
            .into_iter()
            .filter(|id| self.core.heap.get(*id).is_some_and(|obj| obj.ref_count() > 0))
            .collect();
        self.core.report_leaks(leaks)
    }

    fn check_invariants(&self) -> Result<(), String> {
        self.core.heap.check_consistency()?;
        for obj in self.core.heap.iter() {
            if obj.ref_count() != obj.derived_ref_count() {
                return Err(format!(
                    "{} has ref_count={} but {} incoming edges (root={})",
                    obj.id(),
                    obj.ref_count(),
                    obj.incoming_count(),
                    obj.is_root()
                ));
            }
        }
        Ok(())
    }
}

impl Default for RcGC {
    fn default() -> Self {
        Self::new(
            GcConfig::new(GcStrategy::ReferenceCounting),
            Box::new(NullSink),
        )
    }
}
