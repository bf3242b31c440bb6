//! Keyed min-heap of static roles ordered by next rotation time.
//!
//! A binary heap over a `Vec` paired with a key → slot index so items can be
//! updated or removed by name in `O(log n)`. All operations take one mutex
//! and never perform I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Queue errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Items must have a key
    #[error("item key must not be empty")]
    EmptyKey,

    /// Key already queued
    #[error("duplicate key {0:?} in queue")]
    Duplicate(String),

    /// Key not queued
    #[error("no item with key {0:?} in queue")]
    NotFound(String),
}

/// A queued value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<T> {
    /// Unique key
    pub key: String,
    /// Unix timestamp; lower pops first
    pub priority: i64,
    /// Payload
    pub value: T,
}

impl<T> Item<T> {
    /// Create an item.
    #[must_use]
    pub fn new(key: impl Into<String>, priority: i64, value: T) -> Self {
        Self {
            key: key.into(),
            priority,
            value,
        }
    }
}

#[derive(Debug)]
struct Heap<T> {
    items: Vec<Item<T>>,
    index: HashMap<String, usize>,
}

impl<T> Heap<T> {
    fn swap(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.index.insert(self.items[a].key.clone(), a);
        self.index.insert(self.items[b].key.clone(), b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.items[i].priority >= self.items[parent].priority {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.items.len();
        loop {
            let (left, right) = (2 * i + 1, 2 * i + 2);
            let mut smallest = i;
            if left < len && self.items[left].priority < self.items[smallest].priority {
                smallest = left;
            }
            if right < len && self.items[right].priority < self.items[smallest].priority {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn fix(&mut self, i: usize) {
        self.sift_up(i);
        self.sift_down(i);
    }

    fn remove_at(&mut self, i: usize) -> Item<T> {
        let last = self.items.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        let item = self.items.remove(last);
        self.index.remove(&item.key);
        if i < self.items.len() {
            self.fix(i);
        }
        item
    }
}

/// Thread-safe keyed priority queue.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Mutex<Heap<T>>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            heap: Mutex::new(Heap {
                items: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }
}

impl<T: Clone> PriorityQueue<T> {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item.
    ///
    /// # Errors
    ///
    /// Fails without mutating the queue if the key is empty or present.
    pub fn push(&self, item: Item<T>) -> Result<(), QueueError> {
        if item.key.is_empty() {
            return Err(QueueError::EmptyKey);
        }
        let mut heap = self.heap.lock();
        if heap.index.contains_key(&item.key) {
            return Err(QueueError::Duplicate(item.key));
        }
        let slot = heap.items.len();
        heap.index.insert(item.key.clone(), slot);
        heap.items.push(item);
        heap.sift_up(slot);
        Ok(())
    }

    /// Remove and return the lowest-priority item.
    pub fn pop(&self) -> Option<Item<T>> {
        let mut heap = self.heap.lock();
        if heap.items.is_empty() {
            return None;
        }
        Some(heap.remove_at(0))
    }

    /// Remove and return the lowest item if its priority is at most `now`.
    pub fn pop_due(&self, now: i64) -> Option<Item<T>> {
        let mut heap = self.heap.lock();
        match heap.items.first() {
            Some(first) if first.priority <= now => Some(heap.remove_at(0)),
            _ => None,
        }
    }

    /// Remove and return the item with `key`.
    pub fn pop_by_key(&self, key: &str) -> Option<Item<T>> {
        let mut heap = self.heap.lock();
        let slot = *heap.index.get(key)?;
        Some(heap.remove_at(slot))
    }

    /// Replace the priority and value of a queued item.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if the key is not queued.
    pub fn update(&self, item: Item<T>) -> Result<(), QueueError> {
        let mut heap = self.heap.lock();
        let Some(&slot) = heap.index.get(&item.key) else {
            return Err(QueueError::NotFound(item.key));
        };
        heap.items[slot] = item;
        heap.fix(slot);
        Ok(())
    }

    /// Insert or replace an item.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyKey`] for an empty key.
    pub fn upsert(&self, item: Item<T>) -> Result<(), QueueError> {
        if item.key.is_empty() {
            return Err(QueueError::EmptyKey);
        }
        let mut heap = self.heap.lock();
        if let Some(&slot) = heap.index.get(&item.key) {
            heap.items[slot] = item;
            heap.fix(slot);
        } else {
            let slot = heap.items.len();
            heap.index.insert(item.key.clone(), slot);
            heap.items.push(item);
            heap.sift_up(slot);
        }
        Ok(())
    }

    /// Copy of the lowest item.
    #[must_use]
    pub fn peek(&self) -> Option<Item<T>> {
        self.heap.lock().items.first().cloned()
    }

    /// Copy of the item with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Item<T>> {
        let heap = self.heap.lock();
        heap.index.get(key).map(|&slot| heap.items[slot].clone())
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> PriorityQueue<u32> {
        let q = PriorityQueue::new();
        q.push(Item::new("c", 30, 3)).unwrap();
        q.push(Item::new("a", 10, 1)).unwrap();
        q.push(Item::new("b", 20, 2)).unwrap();
        q
    }

    #[test]
    fn test_pop_in_priority_order() {
        let q = queue();
        let keys: Vec<String> = std::iter::from_fn(|| q.pop()).map(|i| i.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_rejects_empty_and_duplicate_keys() {
        let q = queue();
        assert_eq!(q.push(Item::new("", 1, 0)), Err(QueueError::EmptyKey));
        assert_eq!(q.push(Item::new("a", 1, 99)), Err(QueueError::Duplicate("a".to_string())));
        assert_eq!(q.len(), 3);
        assert_eq!(q.get("a").unwrap().value, 1);
        assert_eq!(q.peek().unwrap().priority, 10);
    }

    #[test]
    fn test_pop_by_key_keeps_heap_order() {
        let q = queue();
        assert_eq!(q.pop_by_key("b").unwrap().value, 2);
        assert!(q.pop_by_key("b").is_none());
        assert_eq!(q.pop().unwrap().key, "a");
        assert_eq!(q.pop().unwrap().key, "c");
    }

    #[test]
    fn test_update_reprioritizes() {
        let q = queue();
        q.update(Item::new("c", 5, 33)).unwrap();
        assert_eq!(q.peek().unwrap(), Item::new("c", 5, 33));
        q.update(Item::new("c", 50, 33)).unwrap();
        assert_eq!(q.peek().unwrap().key, "a");
        assert!(matches!(q.update(Item::new("zz", 1, 0)), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_pop_due() {
        let q = queue();
        assert!(q.pop_due(5).is_none());
        assert_eq!(q.pop_due(20).unwrap().key, "a");
        assert_eq!(q.pop_due(20).unwrap().key, "b");
        assert!(q.pop_due(20).is_none());
    }

    #[test]
    fn test_upsert() {
        let q = queue();
        q.upsert(Item::new("a", 40, 1)).unwrap();
        q.upsert(Item::new("d", 1, 4)).unwrap();
        assert_eq!(q.len(), 4);
        assert_eq!(q.pop().unwrap().key, "d");
        assert_eq!(q.pop().unwrap().key, "b");
    }
}
