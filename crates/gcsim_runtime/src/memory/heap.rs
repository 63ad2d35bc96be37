//! Identity-indexed heap store shared by all collectors.
//!
//! The heap is the sole owner of every [`HeapObject`]. Edges and roots are
//! identity lookups into it. Deleted records are dropped from the store and
//! their identities retired, so lookups and aggregate queries only ever see
//! live objects.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::error::{GcError, GcResult};
use crate::memory::arena::{Arena, SlotIndex};
use crate::memory::object::{HeapObject, ObjectId};

#[derive(Debug, Clone)]
pub struct Heap {
    arena: Arena<HeapObject>,
    index: AHashMap<ObjectId, SlotIndex>,
    retired: AHashSet<ObjectId>,
    next_id: u64,
    capacity: usize,
    used: usize,
    peak: usize,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: Arena::new(),
            index: AHashMap::new(),
            retired: AHashSet::new(),
            next_id: 1,
            capacity,
            used: 0,
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held by live objects.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    /// Whether `id` was issued by this heap and has since been deleted.
    pub fn is_retired(&self, id: ObjectId) -> bool {
        self.retired.contains(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.index.get(&id).and_then(|slot| self.arena.get(*slot))
    }

    pub(crate) fn get_mut(&mut self, id: ObjectId) -> Option<&mut HeapObject> {
        let slot = *self.index.get(&id)?;
        self.arena.get_mut(slot)
    }

    pub(crate) fn require(&self, id: ObjectId) -> GcResult<&HeapObject> {
        self.get(id).ok_or(GcError::MissingObject(id))
    }

    pub(crate) fn require_mut(&mut self, id: ObjectId) -> GcResult<&mut HeapObject> {
        self.get_mut(id).ok_or(GcError::MissingObject(id))
    }

    /// Iterates live objects in storage order, which is not identity order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapObject> {
        self.arena.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut HeapObject> {
        self.arena.iter_mut()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots: Vec<ObjectId> = self
            .arena
            .iter()
            .filter(|obj| obj.root)
            .map(|obj| obj.id)
            .collect();
        roots.sort_unstable();
        roots
    }

    pub fn orphans(&self) -> Vec<ObjectId> {
        let mut orphans: Vec<ObjectId> = self
            .arena
            .iter()
            .filter(|obj| obj.is_orphan())
            .map(|obj| obj.id)
            .collect();
        orphans.sort_unstable();
        orphans
    }

    pub fn check_size(&self, size: usize) -> GcResult<()> {
        if size == 0 || size > self.capacity {
            return Err(GcError::InvalidSize {
                size,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn has_room_for(&self, size: usize) -> bool {
        self.free() >= size
    }

    pub(crate) fn next_identity(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn check_new_identity(&self, id: ObjectId) -> GcResult<()> {
        let raw = id.get() as i64;
        if id.is_root_sentinel() {
            return Err(GcError::InvalidIdentity {
                raw,
                reason: "identity 0 is reserved for the root sentinel",
            });
        }
        if self.contains(id) {
            return Err(GcError::InvalidIdentity {
                raw,
                reason: "already allocated",
            });
        }
        if self.is_retired(id) {
            return Err(GcError::InvalidIdentity {
                raw,
                reason: "identity was retired and cannot be reused",
            });
        }
        Ok(())
    }

    /// Stores a fresh record. The identity must have passed
    /// [`Heap::check_new_identity`] and the size [`Heap::check_size`].
    pub(crate) fn insert(&mut self, id: ObjectId, size: usize, step: u64) -> ObjectId {
        let slot = self.arena.insert(HeapObject::new(id, size, step));
        self.index.insert(id, slot);
        self.next_id = self.next_id.max(id.get() + 1);
        self.used += size;
        self.peak = self.peak.max(self.used);
        id
    }

    /// Adds `from -> to`. Returns `false` when the edge already existed.
    pub(crate) fn link(&mut self, from: ObjectId, to: ObjectId) -> GcResult<bool> {
        self.require(from)?;
        self.require(to)?;
        if from == to {
            return Err(GcError::SelfReference(from));
        }
        if !self.require_mut(from)?.outgoing.insert(to) {
            return Ok(false);
        }
        self.require_mut(to)?.incoming.insert(from);
        Ok(true)
    }

    /// Removes `from -> to` from both edge sets.
    pub(crate) fn unlink(&mut self, from: ObjectId, to: ObjectId) -> GcResult<()> {
        self.require(to)?;
        if !self.require_mut(from)?.outgoing.remove(&to) {
            return Err(GcError::MissingEdge { from, to });
        }
        self.require_mut(to)?.incoming.remove(&from);
        Ok(())
    }

    /// Drops a record from the store, purging its edges from every neighbour
    /// and retiring its identity.
    pub(crate) fn remove(&mut self, id: ObjectId, step: u64) -> Option<HeapObject> {
        let slot = self.index.remove(&id)?;
        let mut obj = self.arena.remove(slot)?;

        for source in &obj.incoming {
            if let Some(neighbour) = self.get_mut(*source) {
                neighbour.outgoing.remove(&id);
            }
        }
        for target in &obj.outgoing {
            if let Some(neighbour) = self.get_mut(*target) {
                neighbour.incoming.remove(&id);
            }
        }

        obj.mark_dead(step);
        self.used -= obj.size;
        self.retired.insert(id);
        Some(obj)
    }

    /// Objects reachable from the current roots, computed without touching
    /// mark bits.
    pub fn reachable_from_roots(&self) -> AHashSet<ObjectId> {
        let mut reachable = AHashSet::new();
        let mut stack = self.roots();

        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(obj) = self.get(id) {
                stack.extend(
                    obj.outgoing
                        .iter()
                        .copied()
                        .filter(|target| !reachable.contains(target)),
                );
            }
        }

        reachable
    }

    pub fn unreachable(&self) -> Vec<ObjectId> {
        let reachable = self.reachable_from_roots();
        let mut ids: Vec<ObjectId> = self
            .index
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Verifies symmetric edge bookkeeping and accounting.
    pub fn check_consistency(&self) -> Result<(), String> {
        let mut used = 0;
        for obj in self.arena.iter() {
            used += obj.size;
            if !obj.alive {
                return Err(format!("{} is stored but not alive", obj.id));
            }
            if obj.outgoing.contains(&obj.id) {
                return Err(format!("{} references itself", obj.id));
            }
            for target in &obj.outgoing {
                let problem = match self.get(*target) {
                    Some(t) if t.incoming.contains(&obj.id) => continue,
                    Some(_) => "missing from incoming",
                    None => "points at a dead object",
                };
                return Err(format!("{} -> {} {}", obj.id, target, problem));
            }
            for source in &obj.incoming {
                let problem = match self.get(*source) {
                    Some(s) if s.outgoing.contains(&obj.id) => continue,
                    Some(_) => "missing from outgoing",
                    None => "comes from a dead object",
                };
                return Err(format!("{} <- {} {}", obj.id, source, problem));
            }
        }
        if used != self.used {
            return Err(format!("accounted {} bytes but objects hold {}", self.used, used));
        }
        Ok(())
    }

    pub fn snapshot(&self, step: u64) -> HeapSnapshot {
        let objects = self
            .ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|obj| ObjectSnapshot {
                id: obj.id,
                size: obj.size,
                ref_count: obj.ref_count,
                marked: obj.marked,
                is_root: obj.root,
                refs_to: obj.outgoing.iter().copied().collect(),
                refs_from: obj.incoming.iter().copied().collect(),
                allocation_step: obj.allocation_step,
            })
            .collect();

        HeapSnapshot {
            step,
            alive_objects: self.len(),
            total_memory: self.used,
            free_memory: self.free(),
            capacity: self.capacity,
            roots: self.roots(),
            objects,
        }
    }
}

/// Serializable view of a heap, ordered by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapSnapshot {
    pub step: u64,
    pub alive_objects: usize,
    pub total_memory: usize,
    pub free_memory: usize,
    pub capacity: usize,
    pub roots: Vec<ObjectId>,
    pub objects: Vec<ObjectSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub size: usize,
    pub ref_count: usize,
    pub marked: bool,
    pub is_root: bool,
    pub refs_to: Vec<ObjectId>,
    pub refs_from: Vec<ObjectId>,
    pub allocation_step: u64,
}

impl fmt::Display for HeapSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== HEAP STATE (step {}) ===", self.step)?;
        write!(f, "ROOTS:")?;
        if self.roots.is_empty() {
            write!(f, " [none]")?;
        }
        for root in &self.roots {
            write!(f, " {root}")?;
        }
        writeln!(f)?;

        if self.objects.is_empty() {
            writeln!(f, "[empty]")?;
        }
        for obj in &self.objects {
            write!(
                f,
                "{} | size={} | ref_count={} | refs:",
                obj.id, obj.size, obj.ref_count
            )?;
            for target in &obj.refs_to {
                write!(f, " {target}")?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "{} objects, {} / {} bytes in use",
            self.alive_objects, self.total_memory, self.capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    fn heap_with(ids: &[u64]) -> Heap {
        let mut heap = Heap::new(1024);
        for raw in ids {
            heap.insert(id(*raw), 16, 0);
        }
        heap
    }

    #[test]
    fn test_link_is_symmetric_and_idempotent() {
        let mut heap = heap_with(&[1, 2]);
        assert_eq!(heap.link(id(1), id(2)), Ok(true));
        assert_eq!(heap.link(id(1), id(2)), Ok(false));
        assert!(heap.get(id(2)).unwrap().incoming().contains(&id(1)));
        assert_eq!(heap.link(id(1), id(1)), Err(GcError::SelfReference(id(1))));
        assert_eq!(heap.link(id(1), id(9)), Err(GcError::MissingObject(id(9))));
        heap.check_consistency().unwrap();
    }

    #[test]
    fn test_consistency_reports_one_sided_edge() {
        let mut heap = heap_with(&[1, 2]);
        heap.link(id(1), id(2)).unwrap();
        heap.get_mut(id(2)).unwrap().incoming.remove(&id(1));
        assert_eq!(
            heap.check_consistency(),
            Err("obj_1 -> obj_2 missing from incoming".to_string())
        );
    }

    #[test]
    fn test_remove_purges_neighbours_and_retires() {
        let mut heap = heap_with(&[1, 2, 3]);
        heap.link(id(1), id(2)).unwrap();
        heap.link(id(2), id(3)).unwrap();

        let removed = heap.remove(id(2), 5).unwrap();
        assert!(!removed.is_alive());
        assert_eq!(removed.collection_step(), Some(5));
        assert!(heap.get(id(1)).unwrap().outgoing().is_empty());
        assert!(heap.get(id(3)).unwrap().incoming().is_empty());
        assert!(heap.is_retired(id(2)));
        assert_eq!(heap.used(), 32);
        assert!(matches!(
            heap.check_new_identity(id(2)),
            Err(GcError::InvalidIdentity { .. })
        ));
        heap.check_consistency().unwrap();
    }

    #[test]
    fn test_identity_counter_skips_explicit_ids() {
        let mut heap = heap_with(&[5]);
        assert_eq!(heap.next_identity(), id(6));
        assert_eq!(heap.next_identity(), id(7));
    }

    #[test]
    fn test_unreachable_is_sorted() {
        let mut heap = heap_with(&[1, 2, 3, 4]);
        heap.get_mut(id(1)).unwrap().root = true;
        heap.link(id(1), id(2)).unwrap();
        heap.link(id(4), id(3)).unwrap();
        heap.link(id(3), id(4)).unwrap();
        assert_eq!(heap.unreachable(), vec![id(3), id(4)]);
        assert_eq!(heap.orphans(), Vec::<ObjectId>::new());
    }

    #[test]
    fn test_snapshot_display() {
        let mut heap = heap_with(&[2, 1]);
        heap.link(id(1), id(2)).unwrap();
        let snapshot = heap.snapshot(3);
        assert_eq!(snapshot.objects[0].id, id(1));
        let text = snapshot.to_string();
        assert!(text.contains("ROOTS: [none]"));
        assert!(text.contains("obj_1 | size=16 | ref_count=0 | refs: obj_2"));
    }
}
