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

//! In-memory cache core for larder.
//!
//! This crate owns the authoritative key to metadata index, the expunge
//! strategies that bound the entry count, and the generic get/put/delete
//! flow shared by all cache variants. Durable backends plug in through the
//! [`core::Backend`] trait.

pub mod core;
pub mod expunge;
pub mod memory;
pub mod metadata;

pub mod prelude;
