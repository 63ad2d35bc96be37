//! Heap object records and their identities

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GcError, GcResult};

/// Identity of a simulated heap object.
///
/// Identity `0` never names an object: it is the sentinel source used for
/// root edges in the event stream and in scenario encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Sentinel source of root edges.
    pub const ROOT: ObjectId = ObjectId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Validate a signed identity coming from a driver or scenario file.
    pub fn from_raw(raw: i64) -> GcResult<Self> {
        if raw < 0 {
            return Err(GcError::InvalidIdentity {
                raw,
                reason: "identities are non-negative",
            });
        }
        if raw == 0 {
            return Err(GcError::InvalidIdentity {
                raw,
                reason: "identity 0 is reserved for the root sentinel",
            });
        }
        Ok(Self(raw as u64))
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_root_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root_sentinel() {
            write!(f, "root")
        } else {
            write!(f, "obj_{}", self.0)
        }
    }
}

/// A single record on the simulated heap.
///
/// The heap owns every record; the edge sets hold identities only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapObject {
    pub(crate) id: ObjectId,
    pub(crate) size: usize,
    pub(crate) alive: bool,
    pub(crate) root: bool,
    /// Only meaningful for mark-and-sweep.
    pub(crate) marked: bool,
    /// Only meaningful for reference counting: incoming edges plus one for a root.
    pub(crate) ref_count: usize,
    pub(crate) outgoing: BTreeSet<ObjectId>,
    pub(crate) incoming: BTreeSet<ObjectId>,
    pub(crate) allocation_step: u64,
    pub(crate) collection_step: Option<u64>,
}

impl HeapObject {
    pub(crate) fn new(id: ObjectId, size: usize, allocation_step: u64) -> Self {
        Self {
            id,
            size,
            alive: true,
            root: false,
            marked: false,
            ref_count: 0,
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
            allocation_step,
            collection_step: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn outgoing(&self) -> &BTreeSet<ObjectId> {
        &self.outgoing
    }

    pub fn incoming(&self) -> &BTreeSet<ObjectId> {
        &self.incoming
    }

    pub fn allocation_step(&self) -> u64 {
        self.allocation_step
    }

    pub fn collection_step(&self) -> Option<u64> {
        self.collection_step
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    /// Count derived from the edge sets: incoming edges plus the root edge.
    pub fn derived_ref_count(&self) -> usize {
        self.incoming.len() + usize::from(self.root)
    }

    /// Alive, non-root and without incoming edges.
    pub fn is_orphan(&self) -> bool {
        self.alive && !self.root && self.incoming.is_empty()
    }

    pub(crate) fn increment_ref_count(&mut self) -> usize {
        self.ref_count += 1;
        self.ref_count
    }

    /// Returns `None` when the counter was already zero; the counter stays at zero.
    pub(crate) fn decrement_ref_count(&mut self) -> Option<usize> {
        let next = self.ref_count.checked_sub(1)?;
        self.ref_count = next;
        Some(next)
    }

    pub(crate) fn mark_dead(&mut self, step: u64) {
        self.alive = false;
        self.marked = false;
        self.collection_step = Some(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_rejects_negative_and_sentinel() {
        assert!(matches!(
            ObjectId::from_raw(-3),
            Err(GcError::InvalidIdentity { raw: -3, .. })
        ));
        assert!(matches!(
            ObjectId::from_raw(0),
            Err(GcError::InvalidIdentity { raw: 0, .. })
        ));
        assert_eq!(ObjectId::from_raw(7).unwrap(), ObjectId::new(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(ObjectId::new(4).to_string(), "obj_4");
        assert_eq!(ObjectId::ROOT.to_string(), "root");
    }

    #[test]
    fn test_decrement_clamps_at_zero() {
        let mut obj = HeapObject::new(ObjectId::new(1), 8, 0);
        assert_eq!(obj.increment_ref_count(), 1);
        assert_eq!(obj.decrement_ref_count(), Some(0));
        assert_eq!(obj.decrement_ref_count(), None);
        assert_eq!(obj.ref_count(), 0);
    }

    #[test]
    fn test_orphan_and_derived_count() {
        let mut obj = HeapObject::new(ObjectId::new(1), 8, 0);
        assert!(obj.is_orphan());
        obj.root = true;
        assert!(!obj.is_orphan());
        assert_eq!(obj.derived_ref_count(), 1);
        obj.incoming.insert(ObjectId::new(2));
        assert_eq!(obj.derived_ref_count(), 2);
    }
}
