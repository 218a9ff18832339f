//! Timestamp-gated throttles, pruned lazily

use std::hash::Hash;

use ahash::AHashMap;

use crate::core::types::Timestamp;

/// Last-use timestamps keyed by whoever is being throttled
#[derive(Debug, Clone)]
pub struct CooldownTable<K> {
    started: AHashMap<K, Timestamp>,
}

impl<K: Eq + Hash + Copy> CooldownTable<K> {
    pub fn new() -> Self {
        Self {
            started: AHashMap::new(),
        }
    }

    /// Start (or restart) the cooldown for `key`
    pub fn start(&mut self, key: K, now: Timestamp) {
        self.started.insert(key, now);
    }

    /// Milliseconds left in the window, or `None` if the key may act
    pub fn remaining(&self, key: K, now: Timestamp, window_ms: u64) -> Option<u64> {
        let started = *self.started.get(&key)?;
        let elapsed = now.saturating_sub(started);
        (elapsed < window_ms).then(|| window_ms - elapsed)
    }

    pub fn is_active(&self, key: K, now: Timestamp, window_ms: u64) -> bool {
        self.remaining(key, now, window_ms).is_some()
    }

    pub fn clear(&mut self, key: K) {
        self.started.remove(&key);
    }

    /// Drop entries whose window has elapsed. Returns how many were removed.
    pub fn prune(&mut self, now: Timestamp, window_ms: u64) -> usize {
        let before = self.started.len();
        self.started
            .retain(|_, started| now.saturating_sub(*started) < window_ms);
        before - self.started.len()
    }

    pub fn len(&self) -> usize {
        self.started.len()
    }

    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
    }
}

impl<K: Eq + Hash + Copy> Default for CooldownTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
