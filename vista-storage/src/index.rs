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

use std::collections::BTreeMap;

use hashbrown::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub size: usize,
    tick: u64,
}

/// Size accounting and access order of the entries of one format.
///
/// Entries are addressed by key hash, matching the file layout. Two keys with the same hash share
/// a file, so inserting one replaces the other.
#[derive(Debug)]
pub struct FormatIndex {
    records: HashMap<u64, Record>,
    order: BTreeMap<u64, u64>,
    tick: u64,

    usage: usize,
    capacity: usize,
}

impl FormatIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
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

    /// Insert or replace a record as the most recently accessed one.
    pub fn insert(&mut self, hash: u64, key: String, size: usize) -> Option<Record> {
        let tick = self.next_tick();
        let old = self.records.insert(hash, Record { key, size, tick });
        if let Some(old) = old.as_ref() {
            self.order.remove(&old.tick);
            self.usage -= old.size;
        }
        self.order.insert(tick, hash);
        self.usage += size;
        old
    }

    pub fn get(&self, hash: u64) -> Option<&Record> {
        self.records.get(&hash)
    }

    /// Mark a record as the most recently accessed one.
    pub fn touch(&mut self, hash: u64) -> bool {
        let tick = self.next_tick();
        let Some(record) = self.records.get_mut(&hash) else {
            return false;
        };
        self.order.remove(&record.tick);
        record.tick = tick;
        self.order.insert(tick, hash);
        true
    }

    pub fn remove(&mut self, hash: u64) -> Option<Record> {
        let record = self.records.remove(&hash)?;
        self.order.remove(&record.tick);
        self.usage -= record.size;
        Some(record)
    }

    /// Pop the least recently accessed records until the usage fits the capacity.
    pub fn evict(&mut self) -> Vec<(u64, Record)> {
        let mut victims = vec![];
        while self.usage > self.capacity {
            let Some((_, hash)) = self.order.pop_first() else {
                break;
            };
            if let Some(record) = self.records.remove(&hash) {
                self.usage -= record.size;
                victims.push((hash, record));
            }
        }
        victims
    }

    pub fn clear(&mut self) -> Vec<u64> {
        self.order.clear();
        self.usage = 0;
        self.records.drain().map(|(hash, _)| hash).collect()
    }

    /// Keys from the most to the least recently accessed.
    pub fn keys(&self) -> Vec<String> {
        self.order
            .values()
            .rev()
            .filter_map(|hash| self.records.get(hash))
            .map(|record| record.key.clone())
            .collect()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn is_over_capacity(&self) -> bool {
        self.usage > self.capacity
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lru() {
        let mut index = FormatIndex::new(30);
        index.insert(1, "a".to_string(), 10);
        index.insert(2, "b".to_string(), 10);
        index.insert(3, "c".to_string(), 10);
        assert!(!index.is_over_capacity());
        assert_eq!(index.keys(), vec!["c", "b", "a"]);

        assert!(index.touch(1));
        assert!(!index.touch(42));
        index.insert(4, "d".to_string(), 15);
        assert!(index.is_over_capacity());

        let victims = index.evict().into_iter().map(|(_, r)| r.key).collect::<Vec<_>>();
        assert_eq!(victims, vec!["b", "c"]);
        assert_eq!(index.usage(), 25);
        assert_eq!(index.keys(), vec!["d", "a"]);
    }

    #[test]
    fn test_index_replace_and_remove() {
        let mut index = FormatIndex::new(100);
        index.insert(1, "a".to_string(), 10);
        let old = index.insert(1, "a".to_string(), 20).unwrap();
        assert_eq!(old.size, 10);
        assert_eq!(index.usage(), 20);
        assert_eq!(index.len(), 1);

        assert_eq!(index.remove(1).unwrap().size, 20);
        assert!(index.remove(1).is_none());
        assert_eq!(index.usage(), 0);

        index.insert(2, "b".to_string(), 5);
        assert_eq!(index.clear(), vec![2]);
        assert_eq!(index.len(), 0);
    }
}
