// Copyright 2025 vista Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    hash::Hash,
    sync::Arc,
};

use ahash::RandomState;
use parking_lot::Mutex;
use vista_common::event::{Event, EventListener};

use crate::lru::{Departures, Lru};

/// Estimates the memory footprint of an entry in bytes.
pub trait Weighter<K, V>: Fn(&K, &V) -> usize + Send + Sync + 'static {}
impl<K, V, T> Weighter<K, V> for T where T: Fn(&K, &V) -> usize + Send + Sync + 'static {}

/// Builder of the in-memory [`Cache`].
pub struct CacheBuilder<K, V> {
    capacity: usize,
    shards: usize,
    weighter: Arc<dyn Weighter<K, V>>,
    event_listener: Option<Arc<dyn EventListener<Key = K, Value = V>>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a builder for a cache holding at most `capacity` of total weight.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shards: 1,
            weighter: Arc::new(|_: &K, _: &V| 1),
            event_listener: None,
        }
    }

    /// Set in-memory cache sharding count. Entries will be distributed to different shards based on their hash.
    /// Operations on different shard can be parallelized.
    ///
    /// Capacity is split evenly between shards and the LRU order is maintained per shard.
    ///
    /// The default value is 1.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Set in-memory cache weighter.
    ///
    /// The default weighter counts every entry as 1.
    pub fn with_weighter(mut self, weighter: impl Weighter<K, V>) -> Self {
        self.weighter = Arc::new(weighter);
        self
    }

    /// Set in-memory cache event listener.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = K, Value = V>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Build in-memory cache with the given configuration.
    pub fn build(self) -> Cache<K, V> {
        let shards = (0..self.shards)
            .map(|i| Mutex::new(Lru::new(shard_capacity(self.capacity, self.shards, i))))
            .collect();
        Cache {
            inner: Arc::new(CacheInner {
                shards,
                hash_builder: RandomState::new(),
                weighter: self.weighter,
                event_listener: self.event_listener,
            }),
        }
    }
}

/// Split `capacity` between `shards`, handing the remainder to the first shards.
fn shard_capacity(capacity: usize, shards: usize, index: usize) -> usize {
    capacity / shards + usize::from(index < capacity % shards)
}

struct CacheInner<K, V> {
    shards: Vec<Mutex<Lru<K, V>>>,
    hash_builder: RandomState,
    weighter: Arc<dyn Weighter<K, V>>,
    event_listener: Option<Arc<dyn EventListener<Key = K, Value = V>>>,
}

/// Weighted in-memory cache with LRU eviction.
///
/// Values are handed out by clone, so `V` is expected to be cheap to clone (e.g. `Arc`-backed).
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for Cache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("shards", &self.inner.shards.len())
            .field("usage", &self.usage())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: 'static,
{
    fn shard(&self, key: &K) -> &Mutex<Lru<K, V>> {
        let hash = self.inner.hash_builder.hash_one(key);
        &self.inner.shards[hash as usize % self.inner.shards.len()]
    }

    fn notify(&self, departures: Departures<K, V>) {
        if departures.is_empty() {
            return;
        }
        if let Some(listener) = self.inner.event_listener.as_ref() {
            for (event, key, value) in departures.iter() {
                listener.on_leave(*event, key, value);
            }
        }
        tracing::trace!(count = departures.len(), "[memory]: entries left the cache");
    }

    /// Insert an entry, replacing any previous entry with the same key.
    ///
    /// Evicts least recently used entries until the shard is back under capacity. An entry heavier
    /// than the shard capacity is evicted right away.
    pub fn insert(&self, key: K, value: V) {
        let weight = (self.inner.weighter)(&key, &value);
        let mut departures = vec![];
        self.shard(&key).lock().insert(key, value, weight, &mut departures);
        self.notify(departures);
    }

    /// Remove an entry, returning its value if it was cached.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (key, value) = self.shard(key).lock().remove(key)?;
        if let Some(listener) = self.inner.event_listener.as_ref() {
            listener.on_leave(Event::Remove, &key, &value);
        }
        Some(value)
    }

    /// Check if an entry is cached without touching its recency.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).lock().contains(key)
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut departures = vec![];
        for shard in self.inner.shards.iter() {
            shard.lock().clear(&mut departures);
        }
        self.notify(departures);
    }

    /// Change the total capacity, evicting entries if the cache is over the new capacity.
    pub fn resize(&self, capacity: usize) {
        let shards = self.inner.shards.len();
        let mut departures = vec![];
        for (i, shard) in self.inner.shards.iter().enumerate() {
            shard.lock().resize(shard_capacity(capacity, shards, i), &mut departures);
        }
        self.notify(departures);
    }

    /// Total weight of the cached entries.
    pub fn usage(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().usage()).sum()
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().capacity()).sum()
    }

    /// Count of the cached entries.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Check if the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + 'static,
    V: Clone + 'static,
{
    /// Lookup an entry and mark it as the most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key).lock().get(key).cloned()
    }

    /// Lookup an entry without touching its recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.shard(key).lock().peek(key).cloned()
    }
}
