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

use std::fmt::{self, Display};

/// Inclusive byte range `[start, end]` in the record file.
///
/// Ordered by `(start, end)` so an ordered set of descriptors walks the file
/// front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockDescriptor {
    start: u64,
    end: u64,
}

impl BlockDescriptor {
    /// # Panics
    ///
    /// Panics if `end < start`.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(end >= start, "end {end} < start {start}");
        Self { start, end }
    }

    /// Fallible variant for ranges read from disk, where `end < start`
    /// means the bytes are garbage rather than a bug.
    pub fn try_new(start: u64, end: u64) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered, never zero.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether either range's start falls within the other's span.
    pub fn overlaps(&self, other: &Self) -> bool {
        let before = self.start <= other.start && other.start <= self.end;
        let after = other.start <= self.start && self.start <= other.end;
        before || after
    }
}

impl Display for BlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.start, self.end, self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_start_then_end() {
        let mut blocks = vec![
            BlockDescriptor::new(10, 20),
            BlockDescriptor::new(0, 5),
            BlockDescriptor::new(10, 15),
        ];
        blocks.sort();
        assert_eq!(
            blocks,
            vec![
                BlockDescriptor::new(0, 5),
                BlockDescriptor::new(10, 15),
                BlockDescriptor::new(10, 20),
            ]
        );
    }

    #[test]
    fn test_length_is_inclusive() {
        assert_eq!(BlockDescriptor::new(0, 0).len(), 1);
        assert_eq!(BlockDescriptor::new(5, 9).len(), 5);
    }

    #[test]
    fn test_overlap() {
        let block = BlockDescriptor::new(10, 20);
        assert!(block.overlaps(&BlockDescriptor::new(15, 25)));
        assert!(block.overlaps(&BlockDescriptor::new(5, 10)));
        assert!(block.overlaps(&BlockDescriptor::new(12, 18)));
        assert!(block.overlaps(&BlockDescriptor::new(0, 30)));
        assert!(!block.overlaps(&BlockDescriptor::new(0, 9)));
        assert!(!block.overlaps(&BlockDescriptor::new(21, 30)));
    }

    #[test]
    fn test_rejects_inverted_range() {
        assert!(BlockDescriptor::try_new(10, 9).is_none());
        assert!(BlockDescriptor::try_new(10, 10).is_some());
    }
}
