//! Mark-and-sweep collector
//!
//! Edges are plain bookkeeping until a collection runs. The mark phase walks
//! outgoing edges from every root, and the sweep phase removes every non-root
//! object the walk did not reach. Cycles without a root are reclaimed.

use crate::error::GcResult;
use crate::memory::config::{GcConfig, GcStrategy};
use crate::memory::events::{EventSink, NullSink};
use crate::memory::gc::{GcCore, GcStats, GcStrategyTrait};
use crate::memory::object::ObjectId;

/// Mark-and-sweep garbage collector
#[derive(Debug)]
pub struct MarkSweepGC {
    core: GcCore,
}

impl MarkSweepGC {
    pub fn new(config: GcConfig, sink: Box<dyn EventSink>) -> Self {
        Self {
            core: GcCore::new(config, sink),
        }
    }

    fn run_collection(core: &mut GcCore) -> GcStats {
        core.timed_collection(|core| {
            let marked = Self::mark(core);
            core.recorder
                .log(format!("MARK: {marked} objects reachable from roots"));
            Self::sweep(core)
        })
    }

    /// Mark phase: clear every mark bit, then mark everything reachable from
    /// the roots. The mark bit doubles as the visited set.
    fn mark(core: &mut GcCore) -> usize {
        for obj in core.heap.iter_mut() {
            obj.marked = false;
        }

        let mut marked = 0;
        let mut stack = core.heap.roots();
        while let Some(id) = stack.pop() {
            let Some(obj) = core.heap.get_mut(id) else {
                continue;
            };
            if obj.marked {
                continue;
            }
            obj.marked = true;
            marked += 1;
            stack.extend(obj.outgoing.iter().copied());
        }
        marked
    }

    /// Sweep phase: delete every alive, non-root, unmarked object.
    fn sweep(core: &mut GcCore) -> (Vec<ObjectId>, usize) {
        let garbage: Vec<ObjectId> = core
            .heap
            .ids()
            .into_iter()
            .filter(|id| {
                core.heap
                    .get(*id)
                    .is_some_and(|obj| obj.alive && !obj.root && !obj.marked)
            })
            .collect();

        let mut freed = 0;
        for id in &garbage {
            freed += core.delete(*id).unwrap_or(0);
        }
        core.recorder.log(format!(
            "SWEEP: {} objects deleted, {} bytes freed",
            garbage.len(),
            freed
        ));
        (garbage, freed)
    }

    fn try_add_root(&mut self, id: ObjectId) -> GcResult<()> {
        self.core.set_root(id, true)?;
        self.core.emit_edge(true, ObjectId::ROOT, id);
        Ok(())
    }

    fn try_remove_root(&mut self, id: ObjectId) -> GcResult<()> {
        self.core.set_root(id, false)?;
        self.core.emit_edge(false, ObjectId::ROOT, id);
        Ok(())
    }

    fn try_add_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        if self.core.link(from, to)? {
            self.core.emit_edge(true, from, to);
        }
        Ok(())
    }

    fn try_remove_reference(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        self.core.heap.require(from)?;
        self.core.unlink(from, to)?;
        self.core.emit_edge(false, from, to);
        Ok(())
    }
}

impl GcStrategyTrait for MarkSweepGC {
    fn name(&self) -> &'static str {
        GcStrategy::MarkSweep.as_str()
    }

    fn strategy(&self) -> GcStrategy {
        GcStrategy::MarkSweep
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

    /// Objects the next collection would sweep.
    fn detect_leaks(&mut self) -> Vec<ObjectId> {
        let leaks = self.core.heap.unreachable();
        self.core.report_leaks(leaks)
    }
}

impl Default for MarkSweepGC {
    fn default() -> Self {
        Self::new(GcConfig::new(GcStrategy::MarkSweep), Box::new(NullSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GcError;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    #[test]
    fn test_unrooted_cycle_is_reclaimed() {
        let mut gc = MarkSweepGC::default();
        gc.allocate_with_id(id(1), 10).unwrap();
        gc.allocate_with_id(id(2), 20).unwrap();
        gc.add_reference(id(1), id(2)).unwrap();
        gc.add_reference(id(2), id(1)).unwrap();

        let stats = gc.collect_with_stats();
        assert_eq!(stats.bytes_freed, 30);
        assert_eq!(stats.collected, vec![id(1), id(2)]);
        assert_eq!(gc.alive_objects(), 0);
        assert_eq!(gc.collect(), 0);
    }

    #[test]
    fn test_reachable_objects_are_marked() {
        let mut gc = MarkSweepGC::default();
        for raw in 1..=4 {
            gc.allocate_with_id(id(raw), 8).unwrap();
        }
        gc.add_root(id(1)).unwrap();
        gc.add_reference(id(1), id(2)).unwrap();
        gc.add_reference(id(2), id(3)).unwrap();
        gc.add_reference(id(3), id(2)).unwrap();
        gc.add_reference(id(4), id(3)).unwrap();

        assert_eq!(gc.collect(), 8);
        assert_eq!(gc.heap().ids(), vec![id(1), id(2), id(3)]);
        assert!(gc.object(id(2)).unwrap().is_marked());
        assert!(!gc.object(id(3)).unwrap().incoming().contains(&id(4)));
        gc.check_invariants().unwrap();
    }

    #[test]
    fn test_root_survives_without_incoming_edges() {
        let mut gc = MarkSweepGC::default();
        let a = gc.allocate(8).unwrap();
        gc.add_root(a).unwrap();
        assert_eq!(gc.collect(), 0);
        assert!(gc.contains(a));

        gc.remove_root(a).unwrap();
        assert!(gc.contains(a));
        assert_eq!(gc.collect(), 8);
    }

    #[test]
    fn test_remove_reference_defers_deletion() {
        let mut gc = MarkSweepGC::default();
        let a = gc.allocate(8).unwrap();
        let b = gc.allocate(8).unwrap();
        gc.add_reference(a, b).unwrap();
        gc.remove_reference(a, b).unwrap();
        assert!(gc.contains(b));
        assert_eq!(
            gc.remove_reference(a, b),
            Err(GcError::MissingEdge { from: a, to: b })
        );
        assert_eq!(gc.detect_leaks(), vec![a, b]);
    }

    #[test]
    fn test_deleted_id_is_missing() {
        let mut gc = MarkSweepGC::default();
        let a = gc.allocate(8).unwrap();
        let b = gc.allocate(8).unwrap();
        gc.add_root(a).unwrap();
        gc.collect();
        assert_eq!(gc.add_reference(a, b), Err(GcError::MissingObject(b)));
        assert_eq!(gc.allocate(8), Ok(id(3)));
    }
}
