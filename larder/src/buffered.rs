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

use std::cmp::Ordering;

use hashbrown::HashMap;
use larder_common::{
    code::{StorageKey, StorageValue},
    statistics::Statistics,
};
use larder_memory::expunge::{rank, ExpungeStrategy, LfuRecycling};
use larder_storage::{meta::BlockMeta, store::IndexedDiskCache, Result};
use parking_lot::Mutex;

/// Front cache over an [`IndexedDiskCache`] that keeps recently used values
/// in memory, bounded independently of the disk store.
///
/// The buffer holds no metadata of its own: liveness and eviction ranking
/// both come from the disk cache's authoritative index, so a buffered value
/// is never served past its expiry and buffer eviction follows the same
/// ordering as the disk sweep, scoped to buffer-resident keys. Values are
/// returned by value, so callers mutating a returned value can never
/// corrupt the buffered copy.
pub struct BufferedCache<K, V, S = LfuRecycling>
where
    K: StorageKey,
    V: StorageValue + Clone,
    S: ExpungeStrategy<K, BlockMeta>,
{
    disk: IndexedDiskCache<K, V, S>,
    buffer: Mutex<Buffer<K, V>>,
    buffer_size: usize,
    rank: fn(&BlockMeta, &BlockMeta) -> Ordering,
    copy_on_read: bool,
    copy_on_write: bool,
}

struct Buffer<K, V> {
    entries: HashMap<K, V>,
    statistics: Statistics,
}

impl<K, V, S> BufferedCache<K, V, S>
where
    K: StorageKey,
    V: StorageValue + Clone,
    S: ExpungeStrategy<K, BlockMeta>,
{
    pub fn new(disk: IndexedDiskCache<K, V, S>, buffer_size: usize) -> Self {
        Self {
            disk,
            buffer: Mutex::new(Buffer {
                entries: HashMap::new(),
                statistics: Statistics::default(),
            }),
            buffer_size,
            rank: rank::lfu,
            copy_on_read: false,
            copy_on_write: false,
        }
    }

    /// Ranks buffer victims by recency instead of frequency.
    pub fn with_lru_buffer(mut self) -> Self {
        self.rank = rank::lru;
        self
    }

    /// Returns codec round-trip copies from the buffer instead of clones.
    /// Plain clones already yield independent values for owned payloads;
    /// the round trip additionally detaches values with shared interior
    /// state.
    pub fn with_copy_on_read(mut self) -> Self {
        self.copy_on_read = true;
        self
    }

    /// Buffers codec round-trip copies of put values instead of clones.
    pub fn with_copy_on_write(mut self) -> Self {
        self.copy_on_write = true;
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// The wrapped disk cache.
    pub fn disk(&self) -> &IndexedDiskCache<K, V, S> {
        &self.disk
    }

    pub fn put(&self, key: K, value: V) -> V {
        let value = self.disk.put(key.clone(), value);
        self.add_to_buffer(key, self.write_value(&value));
        value
    }

    pub fn put_with(&self, key: K, value: V, time_to_live: i64, max_idle_time: i64) -> V {
        let value = self
            .disk
            .put_with(key.clone(), value, time_to_live, max_idle_time);
        self.add_to_buffer(key, self.write_value(&value));
        value
    }

    /// Serves from the buffer when the disk index still knows the entry;
    /// otherwise falls back to the disk cache and re-buffers the value.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let mut buffer = self.buffer.lock();
            buffer.statistics.record_get();

            if buffer.entries.contains_key(key) {
                // touch() validates liveness and keeps the authoritative
                // hit accounting on the disk index.
                if self.disk.touch(key) {
                    buffer.statistics.record_hit();
                    return buffer.entries.get(key).map(|value| self.read_value(value));
                }
                // Expired or deleted underneath the buffer; the disk path
                // below records the proper miss kind.
                buffer.entries.remove(key);
            }
            buffer.statistics.record_miss_not_found();
        }

        let value = self.disk.get(key)?;
        let returned = self.read_value(&value);
        self.add_to_buffer(key.clone(), value);
        Some(returned)
    }

    pub fn delete(&self, key: &K) -> Result<()> {
        self.buffer.lock().entries.remove(key);
        self.disk.delete(key)
    }

    pub fn clean_up(&self) -> Result<()> {
        self.disk.clean_up()
    }

    pub fn metadata(&self, key: &K) -> Result<Option<BlockMeta>> {
        self.disk.metadata(key)
    }

    pub fn statistics(&self) -> Statistics {
        self.disk.statistics()
    }

    /// Counters of the buffer itself: a hit means the entry was live and
    /// buffered, a miss means live but only on disk.
    pub fn buffer_statistics(&self) -> Statistics {
        let buffer = self.buffer.lock();
        let mut statistics = buffer.statistics.clone();
        statistics.set_current_size(buffer.entries.len());
        statistics
    }

    pub fn len(&self) -> usize {
        self.disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disk.is_empty()
    }

    pub fn flush(&self) {
        self.disk.flush();
    }

    pub fn close(&self) -> Result<()> {
        self.disk.close()
    }

    fn read_value(&self, value: &V) -> V {
        if self.copy_on_read {
            codec_copy(self.disk.name(), value)
        } else {
            value.clone()
        }
    }

    fn write_value(&self, value: &V) -> V {
        if self.copy_on_write {
            codec_copy(self.disk.name(), value)
        } else {
            value.clone()
        }
    }

    /// Inserts into the buffer, first shrinking it below the bound by
    /// evicting the lowest-ranked buffered keys. Ranking uses the disk
    /// index's metadata; buffered keys the disk no longer knows are
    /// dropped with a warning.
    fn add_to_buffer(&self, key: K, value: V) {
        let mut buffer = self.buffer.lock();

        if buffer.entries.len() >= self.buffer_size {
            let to_delete = buffer.entries.len() - self.buffer_size + 1;

            let mut ranked = Vec::with_capacity(buffer.entries.len());
            let mut vanished = Vec::new();
            for key in buffer.entries.keys() {
                match self.disk.peek(key) {
                    Some(meta) => ranked.push((key.clone(), meta)),
                    None => {
                        tracing::warn!(
                            "{}: metadata for buffered {:?} vanished",
                            self.disk.name(),
                            key
                        );
                        vanished.push(key.clone());
                    }
                }
            }
            for key in &vanished {
                buffer.entries.remove(key);
            }

            ranked.sort_by(|a, b| (self.rank)(&a.1, &b.1));
            for (key, _) in ranked.iter().take(to_delete) {
                buffer.entries.remove(key);
            }
        }

        buffer.statistics.record_put();
        buffer.entries.insert(key, value);
    }
}

/// Deep copy through the serialization codec. A failing round trip is
/// logged and falls back to a plain clone.
fn codec_copy<V>(name: &str, value: &V) -> V
where
    V: StorageValue + Clone,
{
    match bincode::serialize(value).and_then(|bytes| bincode::deserialize(&bytes)) {
        Ok(copy) => copy,
        Err(e) => {
            tracing::warn!("{}: codec copy failed, cloning instead: {}", name, e);
            value.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &std::path::Path, buffer_size: usize) -> BufferedCache<String, String> {
        let disk = IndexedDiskCache::builder("test", dir)
            .with_max_size(64)
            .build()
            .unwrap();
        BufferedCache::new(disk, buffer_size)
    }

    #[test_log::test]
    fn test_buffer_hit_skips_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 8);

        cache.put("a".to_owned(), "alpha".to_owned());
        assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));

        let buffer_statistics = cache.buffer_statistics();
        assert_eq!(buffer_statistics.hits(), 1);
        assert_eq!(buffer_statistics.current_size(), 1);

        // The disk index still records the hit.
        assert_eq!(cache.statistics().hits(), 1);

        cache.close().unwrap();
    }

    #[test_log::test]
    fn test_get_falls_back_to_disk_after_buffer_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 2);

        for i in 0..5 {
            cache.put(format!("key-{i}"), format!("value-{i}"));
        }
        assert!(cache.buffer_statistics().current_size() <= 2);

        // All five are still served, buffered or not.
        for i in 0..5 {
            assert_eq!(cache.get(&format!("key-{i}")), Some(format!("value-{i}")));
        }

        cache.close().unwrap();
    }

    #[test_log::test]
    fn test_delete_clears_buffer_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 8);

        cache.put("a".to_owned(), "alpha".to_owned());
        cache.delete(&"a".to_owned()).unwrap();

        assert_eq!(cache.get(&"a".to_owned()), None);
        assert_eq!(cache.buffer_statistics().current_size(), 0);
        assert_eq!(cache.statistics().misses_not_found(), 1);

        cache.close().unwrap();
    }

    #[test_log::test]
    fn test_codec_copies_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let disk = IndexedDiskCache::builder("test", dir.path())
            .with_max_size(64)
            .build()
            .unwrap();
        let cache: BufferedCache<String, Vec<u8>> = BufferedCache::new(disk, 8)
            .with_copy_on_read()
            .with_copy_on_write();

        cache.put("a".to_owned(), vec![1, 2, 3]);
        assert_eq!(cache.get(&"a".to_owned()), Some(vec![1, 2, 3]));
        assert_eq!(cache.buffer_statistics().hits(), 1);

        cache.close().unwrap();
    }

    #[test_log::test]
    fn test_expired_entry_is_not_served_from_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 8);

        cache.put_with("a".to_owned(), "alpha".to_owned(), -1, 0);
        assert_eq!(cache.get(&"a".to_owned()), None);
        assert_eq!(cache.statistics().misses_expired(), 1);

        cache.close().unwrap();
    }
}
