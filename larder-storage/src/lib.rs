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

//! Disk engine for larder.
//!
//! A cache instance owns two files: the record file, an unstructured byte
//! space managed by a first-fit block allocator, and the index file, a table
//! of fixed-width slots pairing each entry's metadata block with its value
//! block. Puts are acknowledged before their bytes reach disk; a background
//! writer drains the pending queue and back-fills the durable location into
//! the in-memory metadata.

pub mod block;
pub mod data;
pub mod error;
pub mod index;
pub mod meta;
pub mod store;
pub mod writer;

pub mod prelude;

pub use error::{Error, Result};
