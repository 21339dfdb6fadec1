//! Bounded table with least-recently-used ordering
//!
//! Recency is a monotonically increasing tick stamped on insert and touch.
//! Eviction is always explicit: callers decide when and how much to evict.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    tick: u64,
}

#[derive(Debug, Clone)]
pub struct LruTable<K, V> {
    capacity: usize,
    clock: u64,
    slots: HashMap<K, Slot<V>>,
}

impl<K, V> LruTable<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            slots: HashMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Insert as most recent; returns the replaced value, if any
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let tick = self.next_tick();
        self.slots
            .insert(key, Slot { value, tick })
            .map(|old| old.value)
    }

    /// Mark as most recent; false if absent
    pub fn touch(&mut self, key: &K) -> bool {
        let tick = self.next_tick();
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.tick = tick;
                true
            }
            None => false,
        }
    }

    /// Lookup without affecting recency
    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.slots.get_mut(key).map(|slot| &mut slot.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|slot| slot.value)
    }

    /// Keys, least recently used first
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keyed: Vec<(&K, u64)> = self.slots.iter().map(|(k, s)| (k, s.tick)).collect();
        keyed.sort_by_key(|(_, tick)| *tick);
        keyed.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Entries, least recently used first
    pub fn iter_by_recency(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut entries: Vec<(&K, &Slot<V>)> = self.slots.iter().collect();
        entries.sort_by_key(|(_, slot)| slot.tick);
        entries.into_iter().map(|(k, slot)| (k, &slot.value))
    }

    /// Remove the `n` least recently used entries
    pub fn evict_oldest(&mut self, n: usize) -> Vec<(K, V)> {
        self.keys_by_recency()
            .into_iter()
            .take(n)
            .filter_map(|key| self.slots.remove(&key).map(|slot| (key, slot.value)))
            .collect()
    }

    /// Evict until back within capacity
    pub fn evict_if_over_capacity(&mut self) -> Vec<(K, V)> {
        let excess = self.slots.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }
        self.evict_oldest(excess)
    }
}
