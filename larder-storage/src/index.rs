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

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut};

use crate::{
    block::BlockDescriptor,
    error::{Error, Result},
};

/// Width of one slot: allocation flag plus two block descriptors.
pub const SLOT_LEN: u64 = 1 + 4 * 8;

/// Growth factor for the in-memory slot map.
pub const GOLDEN_RATIO: f64 = 1.618_033_99;

/// Durable location of one cache record: the index slot it occupies and the
/// record file blocks holding its keyed metadata and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub slot: u32,
    pub key_meta_block: BlockDescriptor,
    pub value_block: BlockDescriptor,
}

impl IndexEntry {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(1);
        buf.put_u64(self.key_meta_block.start());
        buf.put_u64(self.key_meta_block.end());
        buf.put_u64(self.value_block.start());
        buf.put_u64(self.value_block.end());
    }

    /// `None` for a free slot, `Err` for a slot holding garbage ranges.
    fn decode(slot: u32, mut buf: impl Buf) -> Result<Option<Self>> {
        if buf.get_u8() == 0 {
            return Ok(None);
        }

        let key_meta_block = BlockDescriptor::try_new(buf.get_u64(), buf.get_u64())
            .ok_or(Error::Inconsistent("malformed key meta block"))?;
        let value_block = BlockDescriptor::try_new(buf.get_u64(), buf.get_u64())
            .ok_or(Error::Inconsistent("malformed value block"))?;

        Ok(Some(Self {
            slot,
            key_meta_block,
            value_block,
        }))
    }
}

/// Index file: a table of fixed-width slots, each mapping a slot number to
/// the record file blocks of one entry.
///
/// A vector of booleans mirrors the allocation flags on disk so the first
/// free slot is found without touching the file. The file only ever grows;
/// slots freed by deletes are reused but the table is never compacted,
/// since compaction would renumber the slots held by live in-memory
/// metadata.
pub struct IndexFile {
    file: File,
    path: PathBuf,
    slot_map: Vec<bool>,
    num_allocated: usize,
}

impl IndexFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            slot_map: vec![false; 2],
            num_allocated: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn num_allocated(&self) -> usize {
        self.num_allocated
    }

    /// Writes the block pair into the first free slot, appending a new slot
    /// if the table is full.
    pub fn write(
        &mut self,
        key_meta_block: BlockDescriptor,
        value_block: BlockDescriptor,
    ) -> Result<IndexEntry> {
        let slot = self.allocate_first_free()?;
        let entry = IndexEntry {
            slot,
            key_meta_block,
            value_block,
        };

        let mut buf = Vec::with_capacity(SLOT_LEN as usize);
        entry.encode(&mut buf);
        self.file.write_all_at(&buf, u64::from(slot) * SLOT_LEN)?;

        Ok(entry)
    }

    /// Clears the allocation flag of a slot, on disk and in the mirror.
    pub fn delete(&mut self, slot: u32) -> Result<()> {
        self.file.write_all_at(&[0], u64::from(slot) * SLOT_LEN)?;
        if let Some(allocated) = self.slot_map.get_mut(slot as usize) {
            if *allocated {
                *allocated = false;
                self.num_allocated -= 1;
            }
        }
        tracing::debug!("invalidated slot {}, {} allocated", slot, self.num_allocated);
        Ok(())
    }

    /// Scans every possible slot on open, rebuilding the slot map and
    /// returning the entries found. Unreadable or malformed slots are
    /// logged and skipped so one corrupt slot does not lose the rest.
    pub fn initialize(&mut self) -> Result<Vec<IndexEntry>> {
        let num_slots = self.len()?.div_ceil(SLOT_LEN);
        let mut entries = Vec::new();

        for slot in 0..num_slots {
            let slot = slot as u32;
            match self.read_slot(slot) {
                Ok(Some(entry)) => match self.allocate(slot) {
                    Ok(()) => entries.push(entry),
                    Err(e) => tracing::error!("allocating slot {} failed: {}", slot, e),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!("reading slot {} failed: {}", slot, e),
            }
        }

        Ok(entries)
    }

    fn read_slot(&self, slot: u32) -> Result<Option<IndexEntry>> {
        let mut buf = [0u8; SLOT_LEN as usize];
        self.file.read_exact_at(&mut buf, u64::from(slot) * SLOT_LEN)?;
        IndexEntry::decode(slot, &buf[..])
    }

    fn allocate_first_free(&mut self) -> Result<u32> {
        let slot = self
            .slot_map
            .iter()
            .position(|allocated| !allocated)
            .unwrap_or(self.slot_map.len());
        self.allocate(slot as u32)?;
        Ok(slot as u32)
    }

    fn allocate(&mut self, slot: u32) -> Result<()> {
        let slot = slot as usize;
        if slot >= self.slot_map.len() {
            self.enlarge_slot_map(slot);
        }

        if self.slot_map[slot] {
            return Err(Error::SlotOccupied { slot: slot as u32 });
        }

        self.slot_map[slot] = true;
        self.num_allocated += 1;
        tracing::debug!("allocated slot {}, {} allocated", slot, self.num_allocated);
        Ok(())
    }

    fn enlarge_slot_map(&mut self, needed_slot: usize) {
        let new_len = (needed_slot + 1).max((self.slot_map.len() as f64 * GOLDEN_RATIO) as usize);
        self.slot_map.resize(new_len, false);
    }
}
