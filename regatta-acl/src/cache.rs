//! 2Q cache backing the token resolver.
//!
//! Classic 2Q: first-touch entries land in a small recent queue, entries
//! seen again while ghosted are admitted to the larger frequent queue. This
//! keeps one-shot resolutions (CLI calls, short-lived workloads) from
//! flushing the hot set of long-running callers. Eviction behavior is
//! internal; callers only observe hit or miss.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

pub struct TwoQueueCache<K: Hash + Eq + Clone, V: Clone> {
    /// A1in: admission queue for first-time keys.
    recent: LruCache<K, V>,
    /// Am: the protected hot set.
    frequent: LruCache<K, V>,
    /// A1out: ghosts of keys evicted from `recent`; a hit here re-admits
    /// straight into `frequent`.
    ghost: LruCache<K, ()>,
}

impl<K: Hash + Eq + Clone, V: Clone> TwoQueueCache<K, V> {
    /// `size` bounds the frequent set; the recent and ghost queues are
    /// sized at the usual 1/4 and 1/2 ratios.
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let quarter = NonZeroUsize::new((size / 4).max(1)).expect("max(1) is non-zero");
        let half = NonZeroUsize::new((size / 2).max(1)).expect("max(1) is non-zero");
        let full = NonZeroUsize::new(size).expect("size is at least 2");
        TwoQueueCache {
            recent: LruCache::new(quarter),
            frequent: LruCache::new(full),
            ghost: LruCache::new(half),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.frequent.get(key) {
            return Some(value.clone());
        }
        // A second touch while still in the admission queue promotes.
        if let Some(value) = self.recent.pop(key) {
            self.admit_frequent(key.clone(), value.clone());
            return Some(value);
        }
        None
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.frequent.contains(&key) {
            self.frequent.put(key, value);
            return;
        }
        if self.recent.contains(&key) {
            self.recent.put(key, value);
            return;
        }
        if self.ghost.pop(&key).is_some() {
            self.admit_frequent(key, value);
            return;
        }
        if let Some((evicted, _)) = self.recent.push(key, value) {
            self.ghost.put(evicted, ());
        }
    }

    pub fn len(&self) -> usize {
        self.recent.len() + self.frequent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.frequent.is_empty()
    }

    fn admit_frequent(&mut self, key: K, value: V) {
        self.frequent.push(key, value);
    }
}
