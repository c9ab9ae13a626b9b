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

use std::path::PathBuf;

use crate::block::BlockDescriptor;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] bincode::Error),
    /// A block surfaced twice during rebuild. Signals record file
    /// corruption; the entry carrying the duplicate is discarded.
    #[error("block {block} is already allocated")]
    AllocationConflict { block: BlockDescriptor },
    /// Read or delete against a block the allocator does not know.
    #[error("block {block} not found")]
    BlockNotFound { block: BlockDescriptor },
    #[error("index slot {slot} is already allocated")]
    SlotOccupied { slot: u32 },
    #[error(
        "lock file found at {}, this usually means that another cache was already opened \
         under the same name or was not shut down correctly. In the latter case you can delete \
         the lock file and reopen the cache.",
        path.display()
    )]
    LockConflict { path: PathBuf },
    #[error("inconsistent state: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
