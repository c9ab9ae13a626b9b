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

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

use hashbrown::HashMap;
use larder_common::statistics::Statistics;
use parking_lot::Mutex;

use crate::{
    core::{Backend, CacheCore},
    expunge::{ExpungeStrategy, LfuRecycling, Recycle, DEFAULT_RECYCLE_FACTOR},
    metadata::{SimpleMeta, UNLIMITED_IDLE_TIME},
};

#[derive(thiserror::Error, Debug)]
pub enum MemoryError {
    #[error("no value stored for entry")]
    ValueMissing,
}

/// Keeps values in a plain map next to the core's metadata index.
pub struct MemoryBackend<K, V> {
    values: HashMap<K, V>,
}

impl<K, V> Default for MemoryBackend<K, V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<K, V> Backend<K, V> for MemoryBackend<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    type Meta = SimpleMeta;
    type Error = MemoryError;

    fn store(
        &mut self,
        key: &K,
        value: &V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<SimpleMeta, MemoryError> {
        self.values.insert(key.clone(), value.clone());
        Ok(SimpleMeta::new(time_to_live, max_idle_time))
    }

    fn load(&mut self, key: &K, _meta: &SimpleMeta) -> Result<V, MemoryError> {
        self.values
            .get(key)
            .cloned()
            .ok_or(MemoryError::ValueMissing)
    }

    fn discard(&mut self, key: &K, _meta: &SimpleMeta) -> Result<(), MemoryError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Thread-safe in-memory cache with size-bounded recycling, useful on its
/// own and as the non-durable sibling of the disk cache in tests.
pub struct MemoryCache<K, V, S = LfuRecycling>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
    S: ExpungeStrategy<K, SimpleMeta>,
{
    core: Mutex<CacheCore<K, V, MemoryBackend<K, V>, S>>,
}

impl<K, V> MemoryCache<K, V, LfuRecycling>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    V: Clone,
{
    pub fn builder(name: impl Into<String>) -> MemoryCacheBuilder<K, V, LfuRecycling> {
        MemoryCacheBuilder::new(name)
    }
}

impl<K, V, S> MemoryCache<K, V, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
    S: ExpungeStrategy<K, SimpleMeta>,
{
    pub fn put(&self, key: K, value: V) -> V {
        self.core.lock().put(key, value)
    }

    pub fn put_with(&self, key: K, value: V, time_to_live: i64, max_idle_time: i64) -> V {
        self.core
            .lock()
            .put_with(key, value, time_to_live, max_idle_time)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.core.lock().get(key)
    }

    pub fn metadata(&self, key: &K) -> Option<SimpleMeta> {
        let mut core = self.core.lock();
        match core.metadata(key) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("{}: reading metadata failed: {}", core.name(), e);
                None
            }
        }
    }

    pub fn delete(&self, key: &K) {
        let mut core = self.core.lock();
        if let Err(e) = core.delete(key) {
            tracing::warn!("{}: deleting from cache failed: {}", core.name(), e);
        }
    }

    pub fn clean_up(&self) {
        let mut core = self.core.lock();
        if let Err(e) = core.clean_up() {
            tracing::warn!("{}: clean up failed: {}", core.name(), e);
        }
    }

    pub fn len(&self) -> usize {
        self.core.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock().is_empty()
    }

    pub fn statistics(&self) -> Statistics {
        self.core.lock().statistics()
    }
}

pub struct MemoryCacheBuilder<K, V, S = LfuRecycling> {
    name: String,
    default_time_to_live: i64,
    default_max_idle_time: i64,
    max_size: usize,
    recycle: Recycle,
    strategy: S,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> MemoryCacheBuilder<K, V, LfuRecycling> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_time_to_live: i64::MAX,
            default_max_idle_time: UNLIMITED_IDLE_TIME,
            max_size: usize::MAX,
            recycle: Recycle::Factor(DEFAULT_RECYCLE_FACTOR),
            // Effectively unbounded until a max size is set.
            strategy: LfuRecycling::new(usize::MAX, 0),
            _marker: PhantomData,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self.rebuild_strategy();
        self
    }

    pub fn with_recycle_size(mut self, recycle_size: usize) -> Self {
        self.recycle = Recycle::Size(recycle_size);
        self.rebuild_strategy();
        self
    }

    fn rebuild_strategy(&mut self) {
        self.strategy = LfuRecycling::new(self.max_size, self.recycle.size_for(self.max_size));
    }
}

impl<K, V, S> MemoryCacheBuilder<K, V, S> {
    pub fn with_time_to_live(mut self, time_to_live: i64) -> Self {
        self.default_time_to_live = time_to_live;
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: i64) -> Self {
        self.default_max_idle_time = max_idle_time;
        self
    }

    pub fn with_strategy<S2>(self, strategy: S2) -> MemoryCacheBuilder<K, V, S2> {
        MemoryCacheBuilder {
            name: self.name,
            default_time_to_live: self.default_time_to_live,
            default_max_idle_time: self.default_max_idle_time,
            max_size: self.max_size,
            recycle: self.recycle,
            strategy,
            _marker: PhantomData,
        }
    }

    pub fn build(self) -> MemoryCache<K, V, S>
    where
        K: Hash + Eq + Clone + Debug,
        V: Clone,
        S: ExpungeStrategy<K, SimpleMeta>,
    {
        MemoryCache {
            core: Mutex::new(CacheCore::new(
                self.name,
                self.default_time_to_live,
                self.default_max_idle_time,
                MemoryBackend::default(),
                self.strategy,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> MemoryCache<String, String> {
        MemoryCache::builder("test").with_max_size(max_size).build()
    }

    #[test_log::test]
    fn put_get_delete_round_trip() {
        let cache = cache(16);
        cache.put("a".to_owned(), "alpha".to_owned());
        assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));
        cache.delete(&"a".to_owned());
        assert_eq!(cache.get(&"a".to_owned()), None);
        assert!(cache.is_empty());
    }

    #[test_log::test]
    fn reput_replaces_value() {
        let cache = cache(16);
        cache.put("a".to_owned(), "one".to_owned());
        cache.put("a".to_owned(), "two".to_owned());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a".to_owned()), Some("two".to_owned()));
    }

    #[test_log::test]
    fn expired_entry_counts_as_expired_miss() {
        let cache = cache(16);
        cache.put_with("a".to_owned(), "alpha".to_owned(), -1, UNLIMITED_IDLE_TIME);
        assert_eq!(cache.get(&"a".to_owned()), None);
        let statistics = cache.statistics();
        assert_eq!(statistics.misses_expired(), 1);
        assert_eq!(statistics.misses_not_found(), 0);
        assert_eq!(statistics.current_size(), 0);
    }

    #[test_log::test]
    fn recycling_keeps_size_bounded() {
        let cache = cache(8);
        for i in 0..100 {
            cache.put(format!("key-{i}"), format!("value-{i}"));
        }
        // The count may float up to max_size + recycle_size between sweeps.
        assert!(cache.len() <= 12, "len was {}", cache.len());
    }

    #[test_log::test]
    fn frequently_hit_entries_survive_recycling() {
        let cache = cache(4);
        cache.put("hot".to_owned(), "v".to_owned());
        for _ in 0..50 {
            assert!(cache.get(&"hot".to_owned()).is_some());
        }
        for i in 0..20 {
            cache.put(format!("cold-{i}"), "v".to_owned());
        }
        assert_eq!(cache.get(&"hot".to_owned()), Some("v".to_owned()));
    }

    #[test_log::test]
    fn builder_settings_apply_in_any_order() {
        // The recycle size set first must survive the later max size.
        let cache: MemoryCache<String, String> = MemoryCache::builder("test")
            .with_recycle_size(2)
            .with_max_size(8)
            .build();
        for i in 0..11 {
            cache.put(format!("key-{i}"), format!("value-{i}"));
        }
        // The sweep at 8 + 2 entries brings the count back to the max size
        // before the triggering insert lands.
        assert_eq!(cache.len(), 8);
    }

    #[test_log::test]
    fn statistics_track_hits_and_misses() {
        let cache = cache(16);
        cache.put("a".to_owned(), "alpha".to_owned());
        cache.get(&"a".to_owned());
        cache.get(&"missing".to_owned());
        let statistics = cache.statistics();
        assert_eq!(statistics.hits(), 1);
        assert_eq!(statistics.misses(), 1);
        assert_eq!(statistics.put_count(), 1);
        assert_eq!(statistics.get_count(), 2);
    }
}
