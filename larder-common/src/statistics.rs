//  Copyright 2025 Larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

/// Operation counters for a single cache instance.
///
/// Owned and mutated only by the cache core that the counters describe;
/// callers receive clones via `statistics()` snapshots. Misses are counted
/// by kind: a key that was never stored is a "not found" miss, a key that
/// was stored but already expired or idled away is an "expired" miss.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    hits: u64,
    misses_not_found: u64,
    misses_expired: u64,
    put_count: u64,
    get_count: u64,
    current_size: usize,
}

impl Statistics {
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss_not_found(&mut self) {
        self.misses_not_found += 1;
    }

    pub fn record_miss_expired(&mut self) {
        self.misses_expired += 1;
    }

    pub fn record_put(&mut self) {
        self.put_count += 1;
    }

    pub fn record_get(&mut self) {
        self.get_count += 1;
    }

    pub fn set_current_size(&mut self, size: usize) {
        self.current_size = size;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses_not_found(&self) -> u64 {
        self.misses_not_found
    }

    pub fn misses_expired(&self) -> u64 {
        self.misses_expired
    }

    /// Total misses of both kinds.
    pub fn misses(&self) -> u64 {
        self.misses_not_found + self.misses_expired
    }

    pub fn put_count(&self) -> u64 {
        self.put_count
    }

    pub fn get_count(&self) -> u64 {
        self.get_count
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Hit rate in `[0, 1]`, `0.0` when no get has been served yet.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits;
        let misses = self.misses();
        if hits == 0 && misses == 0 {
            return 0.0;
        }
        hits as f64 / (hits + misses) as f64
    }

    pub fn reset(&mut self) {
        let size = self.current_size;
        *self = Self::default();
        self.current_size = size;
    }
}
