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

//! Victim orderings for the recycling strategies. Entries that sort first
//! are evicted first.

use std::cmp::Ordering;

use crate::metadata::Meta;

/// Frequency ranking with a recency bias: fewest hits first, ties broken by
/// least recent access, then by age.
pub fn lfu<M: Meta>(a: &M, b: &M) -> Ordering {
    a.hit_count()
        .cmp(&b.hit_count())
        .then(a.last_access().cmp(&b.last_access()))
        .then(a.created().cmp(&b.created()))
}

/// Recency ranking: least recently accessed first, ties broken by fewest
/// hits, then by age.
pub fn lru<M: Meta>(a: &M, b: &M) -> Ordering {
    a.last_access()
        .cmp(&b.last_access())
        .then(a.hit_count().cmp(&b.hit_count()))
        .then(a.created().cmp(&b.created()))
}
