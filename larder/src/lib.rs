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

//! larder is an embeddable disk-backed key-value cache.
//!
//! Values live in a block-allocated record file indexed by a fixed-slot
//! index file. Puts are acknowledged immediately and written behind by a
//! background thread; reads see queued entries before they become durable.
//! The in-memory index bounds the entry count with a frequency-based
//! recycling sweep that decays hit counts over time.
//!
//! # Example
//!
//! ```ignore
//! use larder::IndexedDiskCache;
//!
//! let cache: IndexedDiskCache<String, String> =
//!     IndexedDiskCache::builder("answers", "/var/cache/app")
//!         .with_max_size(10_000)
//!         .build()?;
//!
//! cache.put("q".to_owned(), "42".to_owned());
//! assert_eq!(cache.get(&"q".to_owned()), Some("42".to_owned()));
//! cache.close()?;
//! ```

pub mod buffered;
pub mod prelude;

pub use buffered::BufferedCache;
pub use larder_common::{
    code::{StorageKey, StorageValue},
    statistics::Statistics,
};
pub use larder_memory::{
    expunge::{ExpiredOnly, ExpungeStrategy, LfuRecycling, LruRecycling, Noop},
    memory::MemoryCache,
    metadata::{Meta, UNLIMITED_IDLE_TIME},
};
pub use larder_storage::{
    store::{IndexedDiskCache, IndexedDiskCacheBuilder},
    Error, Result,
};
