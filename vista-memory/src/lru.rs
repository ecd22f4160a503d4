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

use std::{collections::BTreeMap, hash::Hash};

use hashbrown::HashMap;
use vista_common::event::Event;

/// Entries that left the shard during one operation, reported after the shard lock is released.
pub type Departures<K, V> = Vec<(Event, K, V)>;

struct Slot<V> {
    value: V,
    weight: usize,
    tick: u64,
}

/// A single LRU shard.
///
/// Recency is a monotonically increasing tick per access. `order` maps ticks to keys, so the
/// first entry of `order` is always the least recently used one.
pub struct Lru<K, V> {
    slots: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,

    tick: u64,

    usage: usize,
    capacity: usize,
}

impl<K, V> Lru<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
            usage: 0,
            capacity,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn insert(&mut self, key: K, value: V, weight: usize, departures: &mut Departures<K, V>) {
        let tick = self.next_tick();
        let slot = Slot { value, weight, tick };
        if let Some(old) = self.slots.insert(key.clone(), slot) {
            self.order.remove(&old.tick);
            self.usage -= old.weight;
            departures.push((Event::Replace, key.clone(), old.value));
        }
        self.order.insert(tick, key);
        self.usage += weight;

        self.evict(departures);
    }

    fn evict(&mut self, departures: &mut Departures<K, V>) {
        while self.usage > self.capacity {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&key) {
                self.usage -= slot.weight;
                departures.push((Event::Evict, key, slot.value));
            }
        }
    }

    /// Lookup an entry and mark it as the most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = self.slots.get_mut(key)?;
        self.order.remove(&slot.tick);
        self.tick += 1;
        slot.tick = self.tick;
        self.order.insert(slot.tick, key.clone());
        Some(&slot.value)
    }

    /// Lookup an entry without touching its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let (key, slot) = self.slots.remove_entry(key)?;
        self.order.remove(&slot.tick);
        self.usage -= slot.weight;
        Some((key, slot.value))
    }

    pub fn clear(&mut self, departures: &mut Departures<K, V>) {
        self.order.clear();
        self.usage = 0;
        departures.extend(self.slots.drain().map(|(key, slot)| (Event::Clear, key, slot.value)));
    }

    pub fn resize(&mut self, capacity: usize, departures: &mut Departures<K, V>) {
        self.capacity = capacity;
        self.evict(departures);
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Keys from the least to the most recently used.
    #[cfg(test)]
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.values()
    }
}
