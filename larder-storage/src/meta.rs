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

use std::sync::Arc;

use larder_common::{clock::now_millis, code::StorageKey};
use larder_memory::metadata::{Meta, DECAY_FACTOR};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{error::Result, index::IndexEntry};

/// Envelope persisted in each entry's key meta block. Holds everything
/// needed to re-register the entry on reopen; access statistics are
/// deliberately not part of it, they restart with the process.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyedMetadata<K> {
    pub key: K,
    pub created: i64,
    pub time_to_live: i64,
    pub max_idle_time: i64,
}

impl<K> KeyedMetadata<K>
where
    K: StorageKey,
{
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// In-memory metadata of a disk-backed entry.
///
/// The durable location starts out empty: a freshly put entry lives only in
/// the write queue until the background writer flushes it and back-fills
/// the [`IndexEntry`] through the shared cell. Clones share the cell, so
/// the writer never needs to reach into the cache core's map.
#[derive(Debug, Clone)]
pub struct BlockMeta {
    created: i64,
    time_to_live: i64,
    max_idle_time: i64,
    last_access: i64,
    hit_count: u32,
    location: Arc<Mutex<Option<IndexEntry>>>,
}

impl BlockMeta {
    pub fn new(time_to_live: i64, max_idle_time: i64) -> Self {
        let now = now_millis();
        Self {
            created: now,
            time_to_live,
            max_idle_time,
            last_access: now,
            hit_count: 1,
            location: Arc::new(Mutex::new(None)),
        }
    }

    /// Metadata for an entry recovered from disk: the location is known,
    /// the access statistics restart.
    pub fn restored(created: i64, time_to_live: i64, max_idle_time: i64, entry: IndexEntry) -> Self {
        Self {
            created,
            time_to_live,
            max_idle_time,
            last_access: now_millis(),
            hit_count: 1,
            location: Arc::new(Mutex::new(Some(entry))),
        }
    }

    /// Durable location, `None` while the entry is only queued.
    pub fn location(&self) -> Option<IndexEntry> {
        *self.location.lock()
    }

    pub fn set_location(&self, entry: IndexEntry) {
        *self.location.lock() = Some(entry);
    }
}

impl Meta for BlockMeta {
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
        self.hit_count = (f64::from(self.hit_count) * DECAY_FACTOR) as u32;
    }
}

#[cfg(test)]
mod tests {
    use crate::block::BlockDescriptor;

    use super::*;

    #[test]
    fn test_keyed_metadata_round_trip() {
        let keyed = KeyedMetadata {
            key: "some key".to_owned(),
            created: 12345,
            time_to_live: 1000,
            max_idle_time: 0,
        };
        let bytes = keyed.encode().unwrap();
        let decoded = KeyedMetadata::<String>::decode(&bytes).unwrap();
        assert_eq!(decoded.key, keyed.key);
        assert_eq!(decoded.created, keyed.created);
        assert_eq!(decoded.time_to_live, keyed.time_to_live);
        assert_eq!(decoded.max_idle_time, keyed.max_idle_time);
    }

    #[test]
    fn test_location_is_shared_across_clones() {
        let meta = BlockMeta::new(1000, 0);
        let clone = meta.clone();
        assert!(clone.location().is_none());

        let entry = IndexEntry {
            slot: 3,
            key_meta_block: BlockDescriptor::new(0, 9),
            value_block: BlockDescriptor::new(10, 19),
        };
        meta.set_location(entry);
        assert_eq!(clone.location(), Some(entry));
    }
}
