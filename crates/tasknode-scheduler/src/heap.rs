//! Binary min-heap with a key → slot index, so entries can be moved or
//! removed by key in O(log n).

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<K> {
    priority: i64,
    key: K,
}

/// Min-heap over `(priority, key)` holding at most one entry per key.
#[derive(Debug, Clone)]
pub struct TimerHeap<K> {
    slots: Vec<Slot<K>>,
    index: HashMap<K, usize>,
}

impl<K> Default for TimerHeap<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> TimerHeap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn priority_of(&self, key: &K) -> Option<i64> {
        self.index.get(key).map(|&i| self.slots[i].priority)
    }

    /// Insert `key`, or move its existing entry to `priority`.
    ///
    /// Returns the previous priority when the key was already present.
    pub fn upsert(&mut self, key: K, priority: i64) -> Option<i64> {
        if let Some(&i) = self.index.get(&key) {
            let old = self.slots[i].priority;
            self.slots[i].priority = priority;
            if priority < old {
                self.sift_up(i);
            } else if priority > old {
                self.sift_down(i);
            }
            return Some(old);
        }

        let i = self.slots.len();
        self.index.insert(key.clone(), i);
        self.slots.push(Slot { priority, key });
        self.sift_up(i);
        None
    }

    /// Remove `key`'s entry, returning its priority.
    pub fn remove(&mut self, key: &K) -> Option<i64> {
        let i = *self.index.get(key)?;
        Some(self.remove_at(i).priority)
    }

    pub fn peek(&self) -> Option<(&K, i64)> {
        self.slots.first().map(|s| (&s.key, s.priority))
    }

    pub fn pop(&mut self) -> Option<(K, i64)> {
        if self.slots.is_empty() {
            return None;
        }
        let slot = self.remove_at(0);
        Some((slot.key, slot.priority))
    }

    /// Pop the front entry only if its priority is `<= now`.
    pub fn pop_due(&mut self, now: i64) -> Option<(K, i64)> {
        match self.peek() {
            Some((_, priority)) if priority <= now => self.pop(),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    fn remove_at(&mut self, i: usize) -> Slot<K> {
        let slot = self.slots.swap_remove(i);
        self.index.remove(&slot.key);
        if i < self.slots.len() {
            self.index.insert(self.slots[i].key.clone(), i);
            self.sift_down(i);
            self.sift_up(i);
        }
        slot
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        self.index.insert(self.slots[a].key.clone(), a);
        self.index.insert(self.slots[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.slots[i].priority >= self.slots[parent].priority {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.slots.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < n && self.slots[left].priority < self.slots[smallest].priority {
                smallest = left;
            }
            if right < n && self.slots[right].priority < self.slots[smallest].priority {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }
}
