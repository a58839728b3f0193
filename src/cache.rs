//! Fixed-capacity strict-LRU cache for dequantized hot vectors.
//!
//! Sized in entries, not bytes. Both hits and inserts refresh recency, and
//! inserting at capacity evicts exactly the least-recently-used entry. The
//! router keeps one of these in front of the dequantization path so repeat
//! scoring of popular records skips the reconstruction cost.

use std::collections::{HashMap, VecDeque};

/// Strict least-recently-used vector cache keyed by record id.
#[derive(Debug)]
pub struct HotVectorCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    /// Recency order, least recent at the front.
    order: VecDeque<String>,
}

impl HotVectorCache {
    /// `capacity == 0` disables the cache entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a vector, refreshing its recency on a hit.
    pub fn get(&mut self, id: &str) -> Option<&[f32]> {
        if !self.entries.contains_key(id) {
            return None;
        }
        self.touch(id);
        self.entries.get(id).map(|v| v.as_slice())
    }

    /// Insert or refresh an entry, evicting the least-recently-used one when
    /// at capacity.
    pub fn insert(&mut self, id: String, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&id) {
            self.entries.insert(id.clone(), vector);
            self.touch(&id);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(id.clone());
        self.entries.insert(id, vector);
    }

    /// Drop a single entry, if present.
    pub fn remove(&mut self, id: &str) {
        if self.entries.remove(id).is_some() {
            self.order.retain(|k| k != id);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            let key = self.order.remove(pos).unwrap_or_else(|| id.to_string());
            self.order.push_back(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = HotVectorCache::new(2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), vec![3.0]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_reinsert_refreshes_recency_and_value() {
        let mut cache = HotVectorCache::new(2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        cache.insert("a".into(), vec![9.0]);
        cache.insert("c".into(), vec![3.0]);
        assert_eq!(cache.get("a"), Some(&[9.0][..]));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = HotVectorCache::new(0);
        cache.insert("a".into(), vec![1.0]);
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = HotVectorCache::new(4);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        cache.remove("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
