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

use std::{fmt::Debug, hash::Hash};

use serde::{de::DeserializeOwned, Serialize};

/// Key bound for caches that persist entries on disk.
///
/// Keys are serialized next to each value so the index can be rebuilt from
/// the record file on reopen.
pub trait StorageKey:
    Serialize + DeserializeOwned + Hash + Eq + Clone + Debug + Send + Sync + 'static
{
}
impl<T> StorageKey for T where
    T: Serialize + DeserializeOwned + Hash + Eq + Clone + Debug + Send + Sync + 'static
{
}

/// Value bound for caches that persist entries on disk.
pub trait StorageValue: Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> StorageValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
