//! LRU List Module
//!
//! Implements the recency list backing the in-memory tier: a hash index over
//! a slab of doubly-linked nodes, giving O(1) touch, insert, remove and
//! eviction.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

use crate::memory::MemoryEntry;

#[derive(Debug)]
struct Node<K, V> {
    entry: MemoryEntry<K, V>,
    prev: Option<usize>,
    next: Option<usize>,
}

// == LRU List ==
/// Orders entries by access recency.
///
/// - Head = Most recently used
/// - Tail = Least recently used
///
/// The index and the linked list always hold the same key set, and
/// `total_cost` is the exact sum of the costs of the linked entries. The sum
/// is kept in `u128` so no combination of `usize` costs can overflow it.
#[derive(Debug)]
pub struct LruList<K, V> {
    /// Key to slot position
    index: HashMap<K, usize>,
    /// Node storage, `None` marks a free slot
    slots: Vec<Option<Node<K, V>>>,
    /// Free slot positions available for reuse
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_cost: u128,
}

impl<K, V> Default for LruList<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            total_cost: 0,
        }
    }
}

impl<K, V> LruList<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self::default()
    }

    // == Length ==
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // == Total Cost ==
    /// Returns the sum of all entry costs, saturating at `usize::MAX`.
    pub fn total_cost(&self) -> usize {
        usize::try_from(self.total_cost).unwrap_or(usize::MAX)
    }

    // == Contains ==
    /// Checks membership without touching recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    // == Get ==
    /// Returns the entry for `key`, moving it to the head and refreshing its
    /// access time.
    pub fn get<Q>(&mut self, key: &Q, now: Instant) -> Option<&MemoryEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.unlink(idx);
        self.push_head(idx);
        let node = self.node_mut(idx);
        node.entry.touch(now);
        Some(&node.entry)
    }

    // == Peek ==
    /// Returns the entry for `key` without affecting recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&MemoryEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&idx| &self.node(idx).entry)
    }

    // == Insert ==
    /// Inserts or replaces an entry and moves it to the head.
    ///
    /// Returns the replaced value when the key already existed.
    pub fn insert(&mut self, key: K, value: V, cost: usize, now: Instant) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            let node = self.node_mut(idx);
            let old_cost = node.entry.cost;
            let old_value = std::mem::replace(&mut node.entry.value, value);
            node.entry.cost = cost;
            node.entry.touch(now);
            self.total_cost = self.total_cost - old_cost as u128 + cost as u128;
            self.unlink(idx);
            self.push_head(idx);
            return Some(old_value);
        }

        let node = Node {
            entry: MemoryEntry::new(key.clone(), value, cost, now),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.total_cost += cost as u128;
        self.index.insert(key, idx);
        self.push_head(idx);
        None
    }

    // == Remove ==
    /// Removes an entry by key.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<MemoryEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.remove(key)?;
        Some(self.release_slot(idx))
    }

    // == Pop Tail ==
    /// Removes and returns the least recently used entry.
    pub fn pop_tail(&mut self) -> Option<MemoryEntry<K, V>> {
        let idx = self.tail?;
        let key = self.node(idx).entry.key.clone();
        self.index.remove(&key);
        Some(self.release_slot(idx))
    }

    // == Peek Tail ==
    /// Returns the least recently used entry without removing it.
    pub fn peek_tail(&self) -> Option<&MemoryEntry<K, V>> {
        self.tail.map(|idx| &self.node(idx).entry)
    }

    // == Clear ==
    /// Empties the list, returning the removed entries' values.
    pub fn clear(&mut self) -> Vec<V> {
        let values = std::mem::take(&mut self.slots)
            .into_iter()
            .flatten()
            .map(|node| node.entry.value)
            .collect();
        *self = Self::default();
        values
    }

    // == Iter ==
    /// Iterates entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        self.slots[idx]
            .as_ref()
            .expect("linked slot must be occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.slots[idx]
            .as_mut()
            .expect("linked slot must be occupied")
    }

    fn release_slot(&mut self, idx: usize) -> MemoryEntry<K, V> {
        self.unlink(idx);
        let node = self.slots[idx]
            .take()
            .expect("linked slot must be occupied");
        self.free.push(idx);
        self.total_cost -= node.entry.cost as u128;
        node.entry
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_head(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

/// Iterator over entries from head to tail.
pub struct Iter<'a, K, V> {
    list: &'a LruList<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = &'a MemoryEntry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.list.slots[idx].as_ref()?;
        self.cursor = node.next;
        Some(&node.entry)
    }
}
