//! Stable minimum-priority queue.
//!
//! Items are identified by a key, so the queue can detect duplicates,
//! re-prioritise an item in place and remove a single item. Items with equal
//! rank come out in the order they were first inserted; a priority update
//! keeps the item's original insertion sequence.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::rank::Rank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    rank: Rank,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct StablePriorityQueue<K, V> {
    order: BTreeMap<Slot, (K, V)>,
    slots: HashMap<K, Slot>,
    next_seq: u64,
}

impl<K, V> Default for StablePriorityQueue<K, V> {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            slots: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K, V> StablePriorityQueue<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`. Returns `false` and leaves the queue
    /// untouched when the key is already present.
    pub fn enqueue(&mut self, key: K, value: V, rank: Rank) -> bool {
        if self.slots.contains_key(&key) {
            return false;
        }
        let slot = Slot {
            rank,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.slots.insert(key.clone(), slot);
        self.order.insert(slot, (key, value));
        true
    }

    /// Move an already queued item to `rank`. Returns `false` if the key is
    /// not queued.
    pub fn update_priority(&mut self, key: &K, rank: Rank) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        if slot.rank == rank {
            return true;
        }
        let old = *slot;
        slot.rank = rank;
        let new = *slot;
        if let Some(entry) = self.order.remove(&old) {
            self.order.insert(new, entry);
        }
        true
    }

    /// Pop the item with the lowest rank (earliest inserted among equals).
    pub fn dequeue(&mut self) -> Option<(K, V)> {
        let (_, (key, value)) = self.order.pop_first()?;
        self.slots.remove(&key);
        Some((key, value))
    }

    pub fn peek(&self) -> Option<(&K, &V)> {
        self.order.first_key_value().map(|(_, (k, v))| (k, v))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn rank(&self, key: &K) -> Option<Rank> {
        self.slots.get(key).map(|slot| slot.rank)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
    }

    /// Items in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order.values().map(|(k, v)| (k, v))
    }

    /// Items in dequeue order together with their rank.
    pub fn iter_ranked(&self) -> impl Iterator<Item = (Rank, &K, &V)> {
        self.order.iter().map(|(slot, (k, v))| (slot.rank, k, v))
    }
}
