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

//! Counters are updated with relaxed ordering; they are meant for observation and tests,
//! not for synchronization.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Operation counters of a cache engine.
#[derive(Debug, Default)]
pub struct Statistics {
    /// Requests served by the memory tier.
    pub memory_hits: AtomicUsize,
    /// Requests served by the disk tier.
    pub disk_hits: AtomicUsize,
    /// Requests that missed both tiers.
    pub misses: AtomicUsize,
    /// Calls into a fetcher.
    pub fetches: AtomicUsize,
    /// Requests attached to an already in-flight fetch.
    pub coalesced: AtomicUsize,
    /// Fetches or transforms that failed.
    pub failures: AtomicUsize,
    /// Completions discarded because their request was canceled or superseded.
    pub stale_completions: AtomicUsize,
    /// Entries persisted by the disk tier.
    pub disk_writes: AtomicUsize,
    /// Entries evicted from the disk tier.
    pub disk_evictions: AtomicUsize,
}

impl Statistics {
    /// Increase a counter by one.
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a plain snapshot of all counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            disk_evictions: self.disk_evictions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// See [`Statistics::memory_hits`].
    pub memory_hits: usize,
    /// See [`Statistics::disk_hits`].
    pub disk_hits: usize,
    /// See [`Statistics::misses`].
    pub misses: usize,
    /// See [`Statistics::fetches`].
    pub fetches: usize,
    /// See [`Statistics::coalesced`].
    pub coalesced: usize,
    /// See [`Statistics::failures`].
    pub failures: usize,
    /// See [`Statistics::stale_completions`].
    pub stale_completions: usize,
    /// See [`Statistics::disk_writes`].
    pub disk_writes: usize,
    /// See [`Statistics::disk_evictions`].
    pub disk_evictions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = Statistics::default();
        Statistics::incr(&stats.fetches);
        Statistics::incr(&stats.fetches);
        Statistics::incr(&stats.memory_hits);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.fetches, 2);
        assert_eq!(snapshot.memory_hits, 1);
        assert_eq!(snapshot.misses, 0);
    }
}
