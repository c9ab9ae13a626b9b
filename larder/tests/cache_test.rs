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

use larder::{
    BufferedCache, Error, IndexedDiskCache, LfuRecycling, MemoryCache, UNLIMITED_IDLE_TIME,
};
use rand::Rng;

fn open(dir: &std::path::Path) -> IndexedDiskCache<String, String> {
    IndexedDiskCache::builder("cache", dir)
        .with_max_size(256)
        .build()
        .unwrap()
}

#[test_log::test]
fn test_round_trip_survives_flush_and_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let cache = open(dir.path());
        cache.put("a".to_owned(), "alpha".to_owned());
        // Visible before the writer flushed it.
        assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));
        cache.flush();
        assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));
        cache.close().unwrap();
    }

    let cache = open(dir.path());
    assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));
    cache.close().unwrap();
}

#[test_log::test]
fn test_reput_keeps_exactly_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path());

    cache.put("a".to_owned(), "first!!".to_owned());
    cache.flush();
    let index_allocated = cache.index_allocated();
    let data_len = cache.data_len().unwrap();

    cache.put("a".to_owned(), "second!".to_owned());
    cache.flush();

    assert_eq!(cache.get(&"a".to_owned()), Some("second!".to_owned()));
    assert_eq!(cache.index_allocated(), index_allocated);
    // Same-length value: the freed blocks are reused, nothing leaks.
    assert_eq!(cache.data_len().unwrap(), data_len);

    cache.close().unwrap();
}

#[test_log::test]
fn test_expired_get_is_an_expired_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path());

    cache.put_with("a".to_owned(), "alpha".to_owned(), 0, UNLIMITED_IDLE_TIME);
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(cache.get(&"a".to_owned()), None);

    let statistics = cache.statistics();
    assert_eq!(statistics.misses_expired(), 1);
    assert_eq!(statistics.misses_not_found(), 0);

    cache.close().unwrap();
}

#[test_log::test]
fn test_size_stays_bounded_under_churn() {
    let dir = tempfile::tempdir().unwrap();
    let cache: IndexedDiskCache<String, String> = IndexedDiskCache::builder("cache", dir.path())
        .with_max_size(32)
        .with_recycle_size(8)
        .build()
        .unwrap();

    for i in 0..500 {
        cache.put(format!("key-{i}"), format!("value-{i}"));
    }
    assert!(cache.len() <= 40, "len was {}", cache.len());

    cache.flush();
    assert_eq!(cache.index_allocated(), cache.len());
    assert_eq!(cache.data_allocated(), cache.len() * 2);

    cache.close().unwrap();
}

#[test_log::test]
fn test_eviction_keeps_frequent_entries_and_purges_expired() {
    let dir = tempfile::tempdir().unwrap();
    // Large recycle headroom so only the explicit clean_up sweeps.
    let cache: IndexedDiskCache<String, String> = IndexedDiskCache::builder("cache", dir.path())
        .with_strategy(LfuRecycling::new(3, 64))
        .build()
        .unwrap();

    cache.put("hot".to_owned(), "v".to_owned());
    cache.put("warm".to_owned(), "v".to_owned());
    cache.put("cold".to_owned(), "v".to_owned());
    cache.put_with("expired".to_owned(), "v".to_owned(), -1, UNLIMITED_IDLE_TIME);

    cache.get(&"hot".to_owned());
    cache.get(&"hot".to_owned());
    cache.get(&"warm".to_owned());

    cache.clean_up().unwrap();

    // The expired entry always goes; among the live ones the least
    // frequently hit one is evicted to get back down to the bound.
    assert_eq!(cache.len(), 2);
    assert!(cache.get(&"hot".to_owned()).is_some());
    assert!(cache.get(&"warm".to_owned()).is_some());
    assert!(cache.get(&"cold".to_owned()).is_none());

    cache.close().unwrap();
}

#[test_log::test]
fn test_rebuild_recovers_exactly_the_survivors() {
    let dir = tempfile::tempdir().unwrap();

    {
        let cache = open(dir.path());
        for i in 0..20 {
            cache.put(format!("key-{i}"), format!("some longer value {i}"));
        }
        for i in (0..20).step_by(3) {
            cache.delete(&format!("key-{i}")).unwrap();
        }
        cache.close().unwrap();
    }

    let cache = open(dir.path());
    let survivors: Vec<usize> = (0..20).filter(|i| i % 3 != 0).collect();
    assert_eq!(cache.len(), survivors.len());
    assert_eq!(cache.index_allocated(), survivors.len());
    assert_eq!(cache.data_allocated(), survivors.len() * 2);

    for i in survivors {
        assert_eq!(
            cache.get(&format!("key-{i}")),
            Some(format!("some longer value {i}"))
        );
    }

    cache.close().unwrap();
}

#[test_log::test]
fn test_second_instance_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();

    let cache = open(dir.path());
    match IndexedDiskCache::<String, String>::builder("cache", dir.path()).build() {
        Err(Error::LockConflict { .. }) => {}
        other => panic!("expected lock conflict, got {:?}", other.map(|_| ())),
    }
    cache.close().unwrap();

    // A clean close releases the lock.
    let reopened = open(dir.path());
    reopened.close().unwrap();
}

#[test_log::test]
fn test_buffered_cache_random_churn_stays_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let disk: IndexedDiskCache<u32, Vec<u8>> = IndexedDiskCache::builder("cache", dir.path())
        .with_max_size(64)
        .build()
        .unwrap();
    let cache = BufferedCache::new(disk, 16);

    let mut rng = rand::rng();
    for _ in 0..2000 {
        let key = rng.random_range(0..128u32);
        match rng.random_range(0..10) {
            0..=5 => {
                cache.put(key, vec![key as u8; (key % 32 + 1) as usize]);
            }
            6..=8 => {
                if let Some(value) = cache.get(&key) {
                    assert_eq!(value, vec![key as u8; (key % 32 + 1) as usize]);
                }
            }
            _ => {
                cache.delete(&key).unwrap();
            }
        }
    }

    cache.flush();
    assert_eq!(cache.disk().index_allocated(), cache.len());
    assert_eq!(cache.disk().data_allocated(), cache.len() * 2);

    cache.close().unwrap();
}

#[test_log::test]
fn test_memory_cache_matches_disk_semantics() {
    let cache: MemoryCache<String, String> =
        MemoryCache::builder("memory").with_max_size(16).build();

    cache.put("a".to_owned(), "alpha".to_owned());
    assert_eq!(cache.get(&"a".to_owned()), Some("alpha".to_owned()));

    cache.put_with("b".to_owned(), "beta".to_owned(), -1, UNLIMITED_IDLE_TIME);
    assert_eq!(cache.get(&"b".to_owned()), None);
    assert_eq!(cache.statistics().misses_expired(), 1);
}
