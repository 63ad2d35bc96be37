//! Slot arena backing the simulated heap.
//!
//! Records live in a flat vector of slots. Freed slots are recycled through a
//! free list, so slot indices are reused while object identities are not.

/// Index of a slot inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(usize);

#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> SlotIndex {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(value);
            SlotIndex(index)
        } else {
            self.slots.push(Some(value));
            SlotIndex(self.slots.len() - 1)
        }
    }

    pub fn get(&self, index: SlotIndex) -> Option<&T> {
        self.slots.get(index.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut T> {
        self.slots.get_mut(index.0).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, index: SlotIndex) -> Option<T> {
        let value = self.slots.get_mut(index.0)?.take()?;
        self.free.push(index.0);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever materialised, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
