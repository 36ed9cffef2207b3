//! Arena-backed disjoint sets.
//!
//! Elements are interned into dense slots; each slot stores a parent slot.
//! `union` always makes the lower slot the root so class roots are stable in
//! insertion order, and `find` compresses paths as it walks.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct DisjointSets<T> {
    slots: HashMap<T, usize>,
    items: Vec<T>,
    parent: Vec<usize>,
}

impl<T> Default for DisjointSets<T> {
    fn default() -> Self {
        Self { slots: HashMap::new(), items: Vec::new(), parent: Vec::new() }
    }
}

impl<T: Copy + Eq + Hash> DisjointSets<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, x: T) -> bool {
        self.slots.contains_key(&x)
    }

    /// Intern `x` as a singleton if it is new. Returns its slot.
    pub fn insert(&mut self, x: T) -> usize {
        if let Some(&slot) = self.slots.get(&x) {
            return slot;
        }
        let slot = self.items.len();
        self.slots.insert(x, slot);
        self.items.push(x);
        self.parent.push(slot);
        slot
    }

    fn find_slot(&mut self, slot: usize) -> usize {
        let p = self.parent[slot];
        if p == slot {
            return slot;
        }
        let root = self.find_slot(p);
        self.parent[slot] = root;
        root
    }

    fn find_slot_ro(&self, mut slot: usize) -> usize {
        loop {
            let p = self.parent[slot];
            if p == slot {
                return slot;
            }
            slot = p;
        }
    }

    /// Merge the classes of `a` and `b`, interning both. Returns whether
    /// anything changed.
    pub fn union(&mut self, a: T, b: T) -> bool {
        let sa = self.insert(a);
        let sb = self.insert(b);
        let ra = self.find_slot(sa);
        let rb = self.find_slot(sb);
        if ra == rb {
            return false;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
        true
    }

    /// Class root of `x`, or `None` if `x` was never inserted.
    pub fn root(&self, x: T) -> Option<T> {
        self.slots.get(&x).map(|&slot| self.items[self.find_slot_ro(slot)])
    }

    pub fn same_set(&self, a: T, b: T) -> bool {
        match (self.root(a), self.root(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    /// Point every slot directly at its root.
    pub fn compress(&mut self) {
        for slot in 0..self.parent.len() {
            self.find_slot(slot);
        }
    }

    /// Members of the class containing `x`, in insertion order.
    pub fn class_of(&self, x: T) -> Vec<T> {
        let Some(root) = self.root(x) else {
            return Vec::new();
        };
        self.items.iter().copied().filter(|&y| self.root(y) == Some(root)).collect()
    }

    /// All classes keyed by root, members in insertion order.
    pub fn classes(&self) -> Vec<(T, Vec<T>)> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut out: Vec<(T, Vec<T>)> = Vec::new();
        for (slot, &item) in self.items.iter().enumerate() {
            let root = self.find_slot_ro(slot);
            let idx = *by_root.entry(root).or_insert_with(|| {
                out.push((self.items[root], Vec::new()));
                out.len() - 1
            });
            out[idx].1.push(item);
        }
        out
    }
}
