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

pub mod rank;

use std::cmp::Ordering;

use hashbrown::HashMap;
use larder_common::clock::now_millis;

use crate::metadata::Meta;

/// Decides when a sweep runs and which entries it removes.
///
/// Expired and idled-away entries are always fair game; strategies differ in
/// how they rank the live remainder.
pub trait ExpungeStrategy<K, M>: Send + 'static
where
    M: Meta,
{
    /// Whether a sweep should run, given the current entry count.
    fn triggers(&self, current_size: usize) -> bool;

    /// Selects the keys to remove. `now` is sampled once per sweep so the
    /// expired/live partition is consistent.
    fn select(&mut self, entries: &HashMap<K, M>, now: i64) -> Vec<K>;

    /// Whether surviving entries' hit counts decay after a sweep. Only
    /// recycling strategies decay: their ranking depends on hit counts and
    /// would otherwise fossilize historical popularity.
    fn decays(&self) -> bool {
        false
    }
}

/// Selects all expired or stale entries plus however many of the lowest
/// ranked live entries are needed to get back down to `max_size`.
fn select_bounded<K, M>(
    entries: &HashMap<K, M>,
    now: i64,
    max_size: usize,
    rank: fn(&M, &M) -> Ordering,
) -> Vec<K>
where
    K: Clone,
    M: Meta,
{
    let mut victims = Vec::new();
    let mut live = Vec::with_capacity(entries.len());

    for (key, meta) in entries {
        if meta.is_expired(now) || meta.is_stale(now) {
            victims.push(key.clone());
        } else {
            live.push((key, meta));
        }
    }

    let num_to_delete =
        (entries.len() as i64 - victims.len() as i64 + 1 - max_size as i64).max(0) as usize;
    if num_to_delete > 0 {
        live.sort_by(|a, b| rank(a.1, b.1));
        victims.extend(live.into_iter().take(num_to_delete).map(|(key, _)| key.clone()));
    }

    victims
}

/// Fraction of `max_size` used as recycle headroom when none is given.
pub const DEFAULT_RECYCLE_FACTOR: f64 = 0.5;

fn recycle_size_from_factor(max_size: usize, recycle_factor: f64) -> usize {
    (max_size as f64 * recycle_factor) as usize
}

/// How the recycle headroom of a recycling strategy is derived. Builders
/// keep this next to the max size so the two can be set in either order.
#[derive(Debug, Clone, Copy)]
pub enum Recycle {
    /// Fraction of the max size.
    Factor(f64),
    /// Absolute entry count.
    Size(usize),
}

impl Recycle {
    pub fn size_for(&self, max_size: usize) -> usize {
        match self {
            Recycle::Factor(factor) => recycle_size_from_factor(max_size, *factor),
            Recycle::Size(size) => *size,
        }
    }
}

/// Recycling strategy ranked by [`rank::lfu`]: triggers once the entry count
/// reaches `max_size + recycle_size` and shrinks back to `max_size`.
#[derive(Debug, Clone)]
pub struct LfuRecycling {
    max_size: usize,
    recycle_size: usize,
}

impl LfuRecycling {
    pub fn new(max_size: usize, recycle_size: usize) -> Self {
        Self {
            max_size,
            recycle_size,
        }
    }

    /// Derives the recycle size as a fraction of `max_size`.
    pub fn with_factor(max_size: usize, recycle_factor: f64) -> Self {
        Self::new(max_size, recycle_size_from_factor(max_size, recycle_factor))
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn recycle_size(&self) -> usize {
        self.recycle_size
    }
}

impl<K, M> ExpungeStrategy<K, M> for LfuRecycling
where
    K: Clone + Send + 'static,
    M: Meta,
{
    fn triggers(&self, current_size: usize) -> bool {
        current_size >= self.max_size.saturating_add(self.recycle_size)
    }

    fn select(&mut self, entries: &HashMap<K, M>, now: i64) -> Vec<K> {
        select_bounded(entries, now, self.max_size, rank::lfu)
    }

    fn decays(&self) -> bool {
        true
    }
}

/// Recycling strategy ranked by [`rank::lru`].
#[derive(Debug, Clone)]
pub struct LruRecycling {
    max_size: usize,
    recycle_size: usize,
}

impl LruRecycling {
    pub fn new(max_size: usize, recycle_size: usize) -> Self {
        Self {
            max_size,
            recycle_size,
        }
    }

    pub fn with_factor(max_size: usize, recycle_factor: f64) -> Self {
        Self::new(max_size, recycle_size_from_factor(max_size, recycle_factor))
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn recycle_size(&self) -> usize {
        self.recycle_size
    }
}

impl<K, M> ExpungeStrategy<K, M> for LruRecycling
where
    K: Clone + Send + 'static,
    M: Meta,
{
    fn triggers(&self, current_size: usize) -> bool {
        current_size >= self.max_size.saturating_add(self.recycle_size)
    }

    fn select(&mut self, entries: &HashMap<K, M>, now: i64) -> Vec<K> {
        select_bounded(entries, now, self.max_size, rank::lru)
    }

    fn decays(&self) -> bool {
        true
    }
}

/// Time-based sweep that removes only expired or stale entries, leaving the
/// entry count unbounded.
#[derive(Debug)]
pub struct ExpiredOnly {
    clean_up_interval: i64,
    last_clean_up: i64,
}

impl ExpiredOnly {
    /// `clean_up_interval` is how long to wait, in milliseconds, before the
    /// strategy triggers again.
    pub fn new(clean_up_interval: i64) -> Self {
        Self {
            clean_up_interval,
            last_clean_up: now_millis(),
        }
    }
}

impl<K, M> ExpungeStrategy<K, M> for ExpiredOnly
where
    K: Clone + Send + 'static,
    M: Meta,
{
    fn triggers(&self, _current_size: usize) -> bool {
        now_millis() - self.last_clean_up > self.clean_up_interval
    }

    fn select(&mut self, entries: &HashMap<K, M>, now: i64) -> Vec<K> {
        self.last_clean_up = now;
        entries
            .iter()
            .filter(|(_, meta)| meta.is_expired(now) || meta.is_stale(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Strategy that never triggers and never selects anything.
#[derive(Debug, Clone, Default)]
pub struct Noop;

impl<K, M> ExpungeStrategy<K, M> for Noop
where
    K: Clone + Send + 'static,
    M: Meta,
{
    fn triggers(&self, _current_size: usize) -> bool {
        false
    }

    fn select(&mut self, _entries: &HashMap<K, M>, _now: i64) -> Vec<K> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::metadata::SimpleMeta;

    fn live(last_access: i64, hit_count: u32) -> SimpleMeta {
        SimpleMeta::with_parts(0, i64::MAX, 0, last_access, hit_count)
    }

    fn expired() -> SimpleMeta {
        SimpleMeta::with_parts(0, 0, 0, 0, 100)
    }

    #[test]
    fn test_lfu_recycling_trigger() {
        let strategy = LfuRecycling::new(10, 5);
        assert!(!ExpungeStrategy::<u64, SimpleMeta>::triggers(&strategy, 14));
        assert!(ExpungeStrategy::<u64, SimpleMeta>::triggers(&strategy, 15));
    }

    #[test]
    fn test_recycle_factor() {
        let strategy = LfuRecycling::with_factor(100, 0.25);
        assert_eq!(strategy.recycle_size(), 25);
    }

    #[test]
    fn test_lfu_recycling_selects_expired_and_lowest_ranked() {
        // One expired entry and hit counts [3, 2, 1]; a sweep at
        // max_size = 3 runs ahead of an insert, so it removes the expired
        // entry plus the lowest hit count to leave room.
        let mut entries = HashMap::new();
        entries.insert("expired", expired());
        entries.insert("three", live(10, 3));
        entries.insert("two", live(10, 2));
        entries.insert("one", live(10, 1));

        let mut strategy = LfuRecycling::new(3, 1);
        let victims = strategy
            .select(&entries, now_millis())
            .into_iter()
            .sorted()
            .collect::<Vec<_>>();
        assert_eq!(victims, vec!["expired", "one"]);
    }

    #[test]
    fn test_select_no_victims_under_capacity() {
        let mut entries = HashMap::new();
        entries.insert("a", live(1, 1));
        entries.insert("b", live(2, 2));

        let mut strategy = LfuRecycling::new(10, 5);
        assert!(strategy.select(&entries, now_millis()).is_empty());
    }

    #[test]
    fn test_expired_only_ignores_live() {
        let mut entries = HashMap::new();
        entries.insert("gone", expired());
        entries.insert("kept", live(now_millis(), 1));

        let mut strategy = ExpiredOnly::new(1000);
        let victims = strategy.select(&entries, now_millis());
        assert_eq!(victims, vec!["gone"]);
    }

    #[test]
    fn test_noop_never_triggers() {
        let strategy = Noop;
        assert!(!ExpungeStrategy::<u64, SimpleMeta>::triggers(
            &strategy,
            usize::MAX
        ));
    }
}
