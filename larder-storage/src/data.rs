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
    collections::BTreeSet,
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use crate::{block::BlockDescriptor, error::Error, error::Result};

/// Record file: one flat byte space plus a first-fit allocator over it.
///
/// The used-block set is ordered by start offset, so allocation walks the
/// gaps between consecutive blocks front to back and extends the file when
/// no gap fits. All mutating operations are linear in the number of used
/// blocks, acceptable because entry counts are bounded by the configured
/// cache size.
pub struct DataFile {
    file: File,
    path: PathBuf,
    used: BTreeSet<BlockDescriptor>,
    last_block: Option<BlockDescriptor>,
}

impl DataFile {
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
            used: BTreeSet::new(),
            last_block: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the underlying file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn num_allocated(&self) -> usize {
        self.used.len()
    }

    /// Allocates a block via first fit and writes the bytes there.
    pub fn write(&mut self, bytes: &[u8]) -> Result<BlockDescriptor> {
        if bytes.is_empty() {
            return Err(anyhow::anyhow!("cannot write zero length data").into());
        }

        let block = self.allocate(bytes.len() as u64)?;
        self.file.write_all_at(bytes, block.start())?;
        Ok(block)
    }

    pub fn read(&self, block: &BlockDescriptor) -> Result<Vec<u8>> {
        self.check_exists(block)?;

        let mut bytes = vec![0u8; block.len() as usize];
        self.file.read_exact_at(&mut bytes, block.start())?;
        Ok(bytes)
    }

    /// Releases a block. With `truncate` set and the block being the last
    /// one in the file, the file shrinks to the new last block's end; a
    /// failing truncation is logged, reclaiming space is best effort.
    pub fn delete(&mut self, block: &BlockDescriptor, truncate: bool) -> Result<()> {
        self.check_exists(block)?;
        tracing::debug!("releasing {}", block);

        self.used.remove(block);

        if truncate && self.last_block.as_ref() == Some(block) {
            self.last_block = self.used.last().copied();
            let new_len = self.last_block.map_or(0, |last| last.end() + 1);
            tracing::debug!("truncating record file to {}", new_len);
            if let Err(e) = self.file.set_len(new_len) {
                tracing::error!("truncating record file to {} failed: {}", new_len, e);
            }
        }

        Ok(())
    }

    /// Re-registers a block already present on disk, without writing.
    /// Only used while rebuilding the index on open.
    pub fn allocate_space(&mut self, block: BlockDescriptor) -> Result<()> {
        self.check_not_exists(&block)?;
        tracing::debug!("allocating {}", block);
        self.add_block(block);
        Ok(())
    }

    /// Whether no two adjacent used blocks overlap. Startup sanity gate.
    pub fn check_consistency(&self) -> bool {
        for (last, current) in self.used.iter().zip(self.used.iter().skip(1)) {
            if last.overlaps(current) {
                return false;
            }
        }
        true
    }

    fn allocate(&mut self, length: u64) -> Result<BlockDescriptor> {
        // First fit: walk the gaps between used blocks, extend past the
        // last block when none is wide enough.
        let mut start = 0u64;
        for used in &self.used {
            if used.start().saturating_sub(start) >= length {
                break;
            }
            start = used.end() + 1;
        }

        let block = BlockDescriptor::new(start, start + length - 1);
        tracing::debug!("allocating {}", block);

        self.check_not_exists(&block)?;
        self.add_block(block);
        Ok(block)
    }

    fn add_block(&mut self, block: BlockDescriptor) {
        match self.last_block {
            Some(last) if block <= last => {}
            _ => self.last_block = Some(block),
        }
        self.used.insert(block);
    }

    fn check_exists(&self, block: &BlockDescriptor) -> Result<()> {
        if !self.used.contains(block) {
            return Err(Error::BlockNotFound { block: *block });
        }
        Ok(())
    }

    fn check_not_exists(&self, block: &BlockDescriptor) -> Result<()> {
        if self.used.contains(block) {
            return Err(Error::AllocationConflict { block: *block });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, DataFile) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataFile::open(dir.path().join("test.data")).unwrap();
        (dir, data)
    }

    #[test_log::test]
    fn test_read_write_delete() {
        let (_dir, mut data) = open();

        let b1 = data.write(b"asdkfhge aasdf asdf").unwrap();
        assert_eq!(data.read(&b1).unwrap(), b"asdkfhge aasdf asdf");
        assert!(data.check_consistency());

        let b2 = data.write(b"dgd  hisefiosuhf").unwrap();
        assert_eq!(data.read(&b1).unwrap(), b"asdkfhge aasdf asdf");
        assert_eq!(data.read(&b2).unwrap(), b"dgd  hisefiosuhf");
        assert!(data.check_consistency());

        let b3 = data.write(b"asdf ijhas dfp f").unwrap();
        assert_eq!(data.read(&b3).unwrap(), b"asdf ijhas dfp f");
        assert!(data.check_consistency());

        data.delete(&b1, true).unwrap();
        assert!(matches!(
            data.read(&b1),
            Err(Error::BlockNotFound { .. })
        ));
        assert!(data.check_consistency());

        // A shorter record reuses the freed gap at the front.
        let b4 = data.write(b"short").unwrap();
        assert_eq!(data.read(&b4).unwrap(), b"short");
        assert_eq!(data.read(&b2).unwrap(), b"dgd  hisefiosuhf");
        assert_eq!(data.read(&b3).unwrap(), b"asdf ijhas dfp f");
        assert!(b4 < b2);
        assert!(data.check_consistency());

        assert!(data.write(&[]).is_err());
    }

    #[test_log::test]
    fn test_truncation() {
        let (_dir, mut data) = open();

        let b1 = data.write(b"asdf").unwrap();
        let b2 = data.write(b"asdf sdf sdf").unwrap();
        let b3 = data.write(b"asdf gfsdf").unwrap();
        let len_full = data.len().unwrap();

        // Deleting a middle block must not shrink the file.
        data.delete(&b2, true).unwrap();
        assert_eq!(data.read(&b1).unwrap(), b"asdf");
        assert_eq!(data.read(&b3).unwrap(), b"asdf gfsdf");
        assert_eq!(data.len().unwrap(), len_full);

        // Deleting the last block shrinks past the hole too.
        data.delete(&b3, true).unwrap();
        assert!(data.len().unwrap() < len_full);

        data.delete(&b1, true).unwrap();
        assert_eq!(data.len().unwrap(), 0);
    }

    #[test_log::test]
    fn test_allocate_space() {
        let (_dir, mut data) = open();

        data.allocate_space(BlockDescriptor::new(0, 4)).unwrap();
        assert!(data.check_consistency());

        assert!(matches!(
            data.allocate_space(BlockDescriptor::new(0, 4)),
            Err(Error::AllocationConflict { .. })
        ));
        assert!(data.check_consistency());

        data.allocate_space(BlockDescriptor::new(5, 9)).unwrap();
        assert!(data.check_consistency());

        // Overlap is only caught by the consistency check, exact duplicates
        // by allocation.
        data.allocate_space(BlockDescriptor::new(2, 8)).unwrap();
        assert!(!data.check_consistency());
    }

    #[test_log::test]
    fn test_first_fit_reuses_exact_gap() {
        let (_dir, mut data) = open();

        let b1 = data.write(b"aaaa").unwrap();
        let _b2 = data.write(b"bbbb").unwrap();
        data.delete(&b1, false).unwrap();

        let b3 = data.write(b"cccc").unwrap();
        assert_eq!(b3, BlockDescriptor::new(0, 3));
        assert_eq!(data.num_allocated(), 2);
    }
}
