//! Cascade deletion collector
//!
//! Removing an object's last incoming edge deletes it on the spot, and the
//! deletion spreads to every child that loses its last incoming edge in turn.
//! `collect` is the batch form: it seeds a cascade from every orphan on the
//! heap. Nothing here computes reachability, so an isolated cycle survives.

use std::collections::VecDeque;

use ahash::AHashSet;

use crate::error::GcResult;
use crate::memory::config::{GcConfig, GcStrategy};
use crate::memory::events::{EventSink, NullSink};
use crate::memory::gc::{GcCore, GcStats, GcStrategyTrait};
use crate::memory::object::{HeapObject, ObjectId};

/// Cascade deletion garbage collector
#[derive(Debug)]
pub struct CascadeDeletionGC {
    core: GcCore,
}

impl CascadeDeletionGC {
    pub fn new(config: GcConfig, sink: Box<dyn EventSink>) -> Self {
        Self {
            core: GcCore::new(config, sink),
        }
    }

    fn is_orphan(core: &GcCore, id: ObjectId) -> bool {
        core.heap.get(id).is_some_and(HeapObject::is_orphan)
    }

    fn run_collection(core: &mut GcCore) -> GcStats {
        core.timed_collection(|core| {
            let orphans = core.heap.orphans();
            core.recorder.log(format!(
                "SCAN: {} orphans [{}]",
                orphans.len(),
                orphans
                    .iter()
                    .map(ObjectId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));

            let mut collected = Vec::new();
            let mut freed = 0;
            for orphan in orphans {
                let (deleted, bytes) = Self::cascade_delete(core, orphan);
                collected.extend(deleted);
                freed += bytes;
            }
            (collected, freed)
        })
    }

    /// Deletes `start` and every object that becomes an orphan as a result.
    ///
    /// Works off an explicit queue with a processed set, so neither chain
    /// length nor cycles matter. A root ends the cascade at that node.
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
            if obj.root {
                core.recorder
                    .log(format!("CASCADE: stopping at root {id}"));
                continue;
            }

            let targets: Vec<ObjectId> = obj.outgoing.iter().copied().collect();
            let Some(size) = core.delete(id) else {
                continue;
            };
            deleted.push(id);
            freed += size;

            for target in targets {
                if Self::is_orphan(core, target) {
                    queue.push_back(target);
                }
            }
        }

        (deleted, freed)
    }

    fn try_add_root(&mut self, id: ObjectId) -> GcResult<()> {
        self.core.set_root(id, true)?;
        self.core.emit_edge(true, ObjectId::ROOT, id);
        Ok(())
    }

    /// Clears the root flag only. An object orphaned this way waits for the
    /// next `collect`.
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

        if Self::is_orphan(&self.core, to) {
            self.core
                .recorder
                .log(format!("CASCADE: {to} lost its last reference"));
            let (deleted, freed) = Self::cascade_delete(&mut self.core, to);
            self.core.recorder.record_reclaimed(deleted.len(), freed);
        }
        Ok(())
    }
}

impl GcStrategyTrait for CascadeDeletionGC {
    fn name(&self) -> &'static str {
        GcStrategy::CascadeDeletion.as_str()
    }

    fn strategy(&self) -> GcStrategy {
        GcStrategy::CascadeDeletion
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

    /// Objects no root reaches. After a `collect` these are cycle members
    /// and whatever hangs off them.
    fn detect_leaks(&mut self) -> Vec<ObjectId> {
        let leaks = self.core.heap.unreachable();
        self.core.report_leaks(leaks)
    }
}

impl Default for CascadeDeletionGC {
    fn default() -> Self {
        Self::new(GcConfig::new(GcStrategy::CascadeDeletion), Box::new(NullSink))
    }
}
