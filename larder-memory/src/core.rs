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
use larder_common::{clock::now_millis, statistics::Statistics};

use crate::{expunge::ExpungeStrategy, metadata::Meta};

/// Storage seam between the map-backed core and the place values actually
/// live (disk engine, plain map, ...).
///
/// The core owns the key to metadata index and all bookkeeping; a backend
/// only moves values in and out and frees whatever it allocated for them.
pub trait Backend<K, V> {
    type Meta: Meta;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stores a value and returns fresh metadata for it. The core inserts
    /// the metadata into its index right after, so the value must be
    /// readable through [`Backend::load`] as soon as this returns, even if
    /// it is not durable yet.
    fn store(
        &mut self,
        key: &K,
        value: &V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<Self::Meta, Self::Error>;

    /// Loads the value belonging to a live index entry.
    fn load(&mut self, key: &K, meta: &Self::Meta) -> Result<V, Self::Error>;

    /// Releases whatever the backend holds for the entry. Called before the
    /// core drops the metadata from its index.
    fn discard(&mut self, key: &K, meta: &Self::Meta) -> Result<(), Self::Error>;
}

/// Map-backed cache core: authoritative key to metadata index, statistics,
/// and the expunge strategy, generic over the value [`Backend`].
///
/// Disk caches never overwrite a record in place; a re-put of a known key
/// deletes the old entry first, because variable-length values make
/// in-place update unsafe. The core enforces that for every backend.
pub struct CacheCore<K, V, B, S>
where
    K: Hash + Eq + Clone + Debug,
    B: Backend<K, V>,
    S: ExpungeStrategy<K, B::Meta>,
{
    name: String,
    default_time_to_live: i64,
    default_max_idle_time: i64,
    entries: HashMap<K, B::Meta>,
    backend: B,
    strategy: S,
    statistics: Statistics,
    _value: PhantomData<fn(V) -> V>,
}

impl<K, V, B, S> CacheCore<K, V, B, S>
where
    K: Hash + Eq + Clone + Debug,
    B: Backend<K, V>,
    S: ExpungeStrategy<K, B::Meta>,
{
    pub fn new(
        name: impl Into<String>,
        default_time_to_live: i64,
        default_max_idle_time: i64,
        backend: B,
        strategy: S,
    ) -> Self {
        Self {
            name: name.into(),
            default_time_to_live,
            default_max_idle_time,
            entries: HashMap::new(),
            backend,
            strategy,
            statistics: Statistics::default(),
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_time_to_live(&self) -> i64 {
        self.default_time_to_live
    }

    pub fn default_max_idle_time(&self) -> i64 {
        self.default_max_idle_time
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot.
    pub fn statistics(&self) -> Statistics {
        let mut statistics = self.statistics.clone();
        statistics.set_current_size(self.entries.len());
        statistics
    }

    /// Stores a value under the default lifetimes. The value is handed back
    /// on success so call sites can keep using it.
    pub fn try_put(&mut self, key: K, value: V) -> Result<V, B::Error> {
        self.try_put_with(
            key,
            value,
            self.default_time_to_live,
            self.default_max_idle_time,
        )
    }

    /// Stores a value with explicit time to live and max idle time.
    pub fn try_put_with(
        &mut self,
        key: K,
        value: V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<V, B::Error> {
        self.put_inner(&key, &value, time_to_live, max_idle_time)?;
        Ok(value)
    }

    /// Best-effort variant of [`CacheCore::try_put`]: failures are logged
    /// and the unmodified value is returned, caching never being a
    /// reliability guarantee.
    pub fn put(&mut self, key: K, value: V) -> V {
        let (time_to_live, max_idle_time) = (self.default_time_to_live, self.default_max_idle_time);
        if let Err(e) = self.put_inner(&key, &value, time_to_live, max_idle_time) {
            tracing::warn!("{}: putting {:?} to cache failed: {}", self.name, key, e);
        }
        value
    }

    /// Best-effort variant of [`CacheCore::try_put_with`].
    pub fn put_with(&mut self, key: K, value: V, time_to_live: i64, max_idle_time: i64) -> V {
        if let Err(e) = self.put_inner(&key, &value, time_to_live, max_idle_time) {
            tracing::warn!("{}: putting {:?} to cache failed: {}", self.name, key, e);
        }
        value
    }

    fn put_inner(
        &mut self,
        key: &K,
        value: &V,
        time_to_live: i64,
        max_idle_time: i64,
    ) -> Result<(), B::Error> {
        tracing::trace!("{}: putting {:?} to cache", self.name, key);

        // Delete-then-insert on a known key, never overwrite.
        if self.entries.contains_key(key) {
            self.delete_entry(key)?;
        }

        if self.strategy.triggers(self.entries.len()) {
            self.clean_up()?;
        }

        let meta = self
            .backend
            .store(key, value, time_to_live, max_idle_time)?;
        self.entries.insert(key.clone(), meta);

        self.statistics.record_put();
        self.statistics.set_current_size(self.entries.len());
        Ok(())
    }

    /// Inserts recovered metadata without going through the backend or the
    /// put counters. Used when rebuilding the index from durable state.
    pub fn restore(&mut self, key: K, meta: B::Meta) {
        self.entries.insert(key, meta);
        self.statistics.set_current_size(self.entries.len());
    }

    pub fn try_get(&mut self, key: &K) -> Result<Option<V>, B::Error> {
        let now = now_millis();

        let Some(meta) = self.entries.get(key) else {
            self.statistics.record_miss_not_found();
            self.statistics.record_get();
            tracing::trace!("{}: cache miss for {:?}", self.name, key);
            return Ok(None);
        };

        if meta.is_expired(now) || meta.is_stale(now) {
            self.statistics.record_miss_expired();
            self.statistics.record_get();
            tracing::trace!("{}: cache miss expired for {:?}", self.name, key);
            self.delete_entry(key)?;
            self.statistics.set_current_size(self.entries.len());
            return Ok(None);
        }

        let meta = meta.clone();
        match self.backend.load(key, &meta) {
            Ok(value) => {
                self.statistics.record_hit();
                self.statistics.record_get();
                tracing::trace!("{}: cache hit for {:?}", self.name, key);
                if let Some(meta) = self.entries.get_mut(key) {
                    meta.touch();
                }
                Ok(Some(value))
            }
            Err(e) => {
                // Self-heal: a record that cannot be loaded is dropped so
                // the next get misses cleanly instead of failing again.
                self.delete_entry(key)?;
                self.statistics.set_current_size(self.entries.len());
                Err(e)
            }
        }
    }

    /// Best-effort variant of [`CacheCore::try_get`]: failures are logged
    /// and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("{}: getting {:?} from cache failed: {}", self.name, key, e);
                None
            }
        }
    }

    pub fn delete(&mut self, key: &K) -> Result<(), B::Error> {
        if self.entries.contains_key(key) {
            self.delete_entry(key)?;
            self.statistics.set_current_size(self.entries.len());
        }
        Ok(())
    }

    /// Runs one sweep of the expunge strategy, then decays survivors if the
    /// strategy ranks by hit count.
    pub fn clean_up(&mut self) -> Result<(), B::Error> {
        let now = now_millis();
        let victims = self.strategy.select(&self.entries, now);
        let expunged = victims.len();

        for key in &victims {
            self.delete_entry(key)?;
        }

        if self.strategy.decays() {
            for meta in self.entries.values_mut() {
                meta.decay();
            }
        }

        self.statistics.set_current_size(self.entries.len());
        if expunged > 0 {
            tracing::debug!("{}: expunged {} entries", self.name, expunged);
        }
        Ok(())
    }

    /// Metadata snapshot for a key, deleting and reporting nothing if the
    /// entry is already expired or stale.
    pub fn metadata(&mut self, key: &K) -> Result<Option<B::Meta>, B::Error> {
        let now = now_millis();
        match self.entries.get(key) {
            None => Ok(None),
            Some(meta) if meta.is_expired(now) || meta.is_stale(now) => {
                self.delete_entry(key)?;
                self.statistics.set_current_size(self.entries.len());
                Ok(None)
            }
            Some(meta) => Ok(Some(meta.clone())),
        }
    }

    /// Metadata without any side effects, for layers that track the core's
    /// entries (the in-memory buffer).
    pub fn peek(&self, key: &K) -> Option<&B::Meta> {
        self.entries.get(key)
    }

    /// Records a hit without touching the backend. Returns false if the key
    /// is absent, expired, or stale, in which case nothing is recorded.
    ///
    /// Used by front layers that serve a buffered value but still need the
    /// authoritative hit accounting and metadata refresh.
    pub fn touch(&mut self, key: &K) -> bool {
        let now = now_millis();
        match self.entries.get_mut(key) {
            Some(meta) if !meta.is_expired(now) && !meta.is_stale(now) => {
                meta.touch();
                self.statistics.record_hit();
                self.statistics.record_get();
                true
            }
            _ => false,
        }
    }

    /// Deletes the entry through the backend first, then drops it from the
    /// index; a failing backend leaves the index entry in place.
    fn delete_entry(&mut self, key: &K) -> Result<(), B::Error> {
        if let Some(meta) = self.entries.get(key) {
            self.backend.discard(key, meta)?;
            self.entries.remove(key);
        }
        Ok(())
    }
}

impl<K, V, B, S> Debug for CacheCore<K, V, B, S>
where
    K: Hash + Eq + Clone + Debug,
    B: Backend<K, V>,
    S: ExpungeStrategy<K, B::Meta>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCore")
            .field("name", &self.name)
            .field("len", &self.entries.len())
            .finish()
    }
}
