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

use std::fmt::Debug;

use larder_common::clock::now_millis;

/// Max idle time value that disables idle eviction.
pub const UNLIMITED_IDLE_TIME: i64 = 0;

/// Factor applied to every surviving entry's hit count after an eviction
/// sweep, so the ranking reflects recent rather than historical popularity.
pub const DECAY_FACTOR: f64 = 0.9;

/// Per-entry access statistics and lifetimes, as tracked by the in-memory
/// index.
pub trait Meta: Clone + Debug + Send + Sync + 'static {
    /// Creation timestamp in epoch milliseconds.
    fn created(&self) -> i64;

    /// Time to live in milliseconds, relative to `created`.
    fn time_to_live(&self) -> i64;

    /// Max idle time in milliseconds, [`UNLIMITED_IDLE_TIME`] to disable.
    fn max_idle_time(&self) -> i64;

    /// Last access timestamp in epoch milliseconds.
    fn last_access(&self) -> i64;

    fn hit_count(&self) -> u32;

    /// Records a hit: bumps the hit count and refreshes the last access.
    fn touch(&mut self);

    /// Shrinks the hit count by [`DECAY_FACTOR`].
    fn decay(&mut self);

    fn is_expired(&self, now: i64) -> bool {
        self.created().saturating_add(self.time_to_live()) < now
    }

    fn is_stale(&self, now: i64) -> bool {
        self.max_idle_time() != UNLIMITED_IDLE_TIME
            && self.last_access().saturating_add(self.max_idle_time()) < now
    }
}

/// Plain metadata for entries that live only in memory.
#[derive(Debug, Clone)]
pub struct SimpleMeta {
    created: i64,
    time_to_live: i64,
    max_idle_time: i64,
    last_access: i64,
    hit_count: u32,
}

impl SimpleMeta {
    pub fn new(time_to_live: i64, max_idle_time: i64) -> Self {
        let now = now_millis();
        Self {
            created: now,
            time_to_live,
            max_idle_time,
            last_access: now,
            hit_count: 1,
        }
    }

    /// Reconstructs metadata for an entry recovered from disk. The hit count
    /// and last access restart, only the lifetimes survive a reopen.
    pub fn restored(created: i64, time_to_live: i64, max_idle_time: i64) -> Self {
        Self {
            created,
            time_to_live,
            max_idle_time,
            last_access: now_millis(),
            hit_count: 1,
        }
    }

    pub(crate) fn with_parts(
        created: i64,
        time_to_live: i64,
        max_idle_time: i64,
        last_access: i64,
        hit_count: u32,
    ) -> Self {
        Self {
            created,
            time_to_live,
            max_idle_time,
            last_access,
            hit_count,
        }
    }
}

impl Meta for SimpleMeta {
    fn created(&self) -> i64 {
        self.created
    }

    fn time_to_live(&self) -> i64 {
        self.time_to_live
    }

    fn max_idle_time(&self) -> i64 {
        self.max_idle_time
    }

    fn last_access(&self) -> i64 {
        self.last_access
    }

    fn hit_count(&self) -> u32 {
        self.hit_count
    }

    fn touch(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_access = now_millis();
    }

    fn decay(&mut self) {
        self.hit_count = (self.hit_count as f64 * DECAY_FACTOR).floor() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let meta = SimpleMeta::with_parts(100, 50, UNLIMITED_IDLE_TIME, 100, 1);
        assert!(!meta.is_expired(150));
        assert!(meta.is_expired(151));
    }

    #[test]
    fn test_staleness() {
        let meta = SimpleMeta::with_parts(0, i64::MAX, 10, 100, 1);
        assert!(!meta.is_stale(110));
        assert!(meta.is_stale(111));

        let unlimited = SimpleMeta::with_parts(0, i64::MAX, UNLIMITED_IDLE_TIME, 100, 1);
        assert!(!unlimited.is_stale(i64::MAX));
    }

    #[test]
    fn test_decay_floors() {
        let mut meta = SimpleMeta::with_parts(0, 0, 0, 0, 15);
        meta.decay();
        assert_eq!(meta.hit_count(), 13);
        meta.decay();
        assert_eq!(meta.hit_count(), 11);

        let mut one = SimpleMeta::with_parts(0, 0, 0, 0, 1);
        one.decay();
        assert_eq!(one.hit_count(), 0);
    }

    #[test]
    fn test_touch_saturates() {
        let mut meta = SimpleMeta::with_parts(0, 0, 0, 0, u32::MAX);
        meta.touch();
        assert_eq!(meta.hit_count(), u32::MAX);
    }
}
