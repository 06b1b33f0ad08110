//! Sparse key index over segment blocks.
//!
//! Level 0 holds the first key of every block. While a level is longer than
//! the fanout, the next level samples every `fanout`-th entry, so a lookup
//! touches a small top array first and narrows the binary-search span as it
//! descends. Only level 0 is persisted; upper levels are rebuilt at load.

use crate::error::{QuaverError, Result};
use crate::storage::{StructReader, StructWriter};

/// Default sampling fanout between index levels.
pub const DEFAULT_INDEX_FANOUT: usize = 32;

/// In-memory sparse index of one segment.
#[derive(Debug)]
pub struct SegmentIndex {
    /// `levels[0]` is the per-block first-key array; each higher level
    /// samples the one below.
    levels: Vec<Vec<u32>>,
    fanout: usize,
}

impl SegmentIndex {
    /// Build the index from the per-block first keys.
    pub fn new(first_keys: Vec<u32>, fanout: usize) -> Self {
        assert!(fanout >= 2);
        let mut levels = vec![first_keys];
        while levels.last().map_or(0, |level| level.len()) > fanout {
            let below = levels.last().unwrap();
            let sampled: Vec<u32> = below.iter().step_by(fanout).copied().collect();
            levels.push(sampled);
        }
        SegmentIndex { levels, fanout }
    }

    /// Number of blocks covered by the index.
    pub fn block_count(&self) -> usize {
        self.levels[0].len()
    }

    /// The per-block first keys (level 0).
    pub fn first_keys(&self) -> &[u32] {
        &self.levels[0]
    }

    /// Number of index levels.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Find the range of blocks that may contain `key`, as a half-open
    /// interval of block ordinals. Returns `None` when no block can match.
    ///
    /// The lower bound is the block before the first block whose first key
    /// reaches `key` (a run for `key` can begin inside it); the upper bound
    /// extends over the blocks whose first key equals `key`.
    pub fn locate(&self, key: u32) -> Option<(usize, usize)> {
        let keys = &self.levels[0];
        if keys.is_empty() || key < keys[0] {
            return None;
        }

        // Descend the levels to find the first entry >= key at level 0.
        let top = self.levels.len() - 1;
        let mut lo = 0usize;
        let mut hi = self.levels[top].len();
        for level in (0..=top).rev() {
            let entries = &self.levels[level][lo..hi];
            let first_ge = lo + entries.partition_point(|&k| k < key);
            if level == 0 {
                let begin = first_ge.saturating_sub(1);
                let mut end = first_ge;
                while end < keys.len() && keys[end] == key {
                    end += 1;
                }
                return Some((begin, end.max(begin + 1)));
            }
            lo = first_ge.saturating_sub(1) * self.fanout;
            hi = (first_ge * self.fanout + 1).min(self.levels[level - 1].len());
        }
        unreachable!()
    }

    /// Serialize in the `.fii` layout: block size, block count, then one
    /// big-endian first key per block.
    pub fn write_to<W: std::io::Write>(
        &self,
        writer: &mut StructWriter<W>,
        block_size: u32,
    ) -> Result<()> {
        writer.write_u32(block_size)?;
        writer.write_u32(self.levels[0].len() as u32)?;
        for &key in &self.levels[0] {
            writer.write_u32(key)?;
        }
        Ok(())
    }

    /// Parse the `.fii` layout, returning the block size and the rebuilt
    /// multi-level index.
    pub fn read_from<R: std::io::Read>(reader: &mut StructReader<R>) -> Result<(u32, Self)> {
        let block_size = reader.read_u32()?;
        if block_size == 0 {
            return Err(QuaverError::corrupt("segment index with zero block size"));
        }
        let block_count = reader.read_u32()? as usize;
        let mut first_keys = Vec::with_capacity(block_count);
        let mut prev = 0u32;
        for i in 0..block_count {
            let key = reader.read_u32()?;
            if i > 0 && key < prev {
                return Err(QuaverError::corrupt("segment index keys out of order"));
            }
            prev = key;
            first_keys.push(key);
        }
        Ok((block_size, SegmentIndex::new(first_keys, DEFAULT_INDEX_FANOUT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn index(keys: &[u32], fanout: usize) -> SegmentIndex {
        SegmentIndex::new(keys.to_vec(), fanout)
    }

    #[test]
    fn test_single_level() {
        let idx = index(&[5, 10, 20], 32);
        assert_eq!(idx.level_count(), 1);

        assert_eq!(idx.locate(4), None);
        assert_eq!(idx.locate(5), Some((0, 1)));
        assert_eq!(idx.locate(7), Some((0, 1)));
        assert_eq!(idx.locate(10), Some((0, 2)));
        assert_eq!(idx.locate(19), Some((1, 2)));
        assert_eq!(idx.locate(25), Some((2, 3)));
    }

    #[test]
    fn test_run_spanning_blocks() {
        // A run of key 10 starting inside block 0 and spanning blocks 1-2.
        let idx = index(&[5, 10, 10, 12], 32);
        assert_eq!(idx.locate(10), Some((0, 3)));
        assert_eq!(idx.locate(11), Some((2, 3)));
    }

    #[test]
    fn test_multi_level_matches_flat_search() {
        let keys: Vec<u32> = (0..1000).map(|i| i * 7).collect();
        let flat = index(&keys, 2000);
        let tiered = index(&keys, 4);
        assert!(tiered.level_count() > 2);

        for q in [0, 1, 6, 7, 350, 3499, 3500, 6993, 10000] {
            assert_eq!(tiered.locate(q), flat.locate(q), "query {q}");
        }
    }

    #[test]
    fn test_empty_index() {
        let idx = index(&[], 32);
        assert_eq!(idx.block_count(), 0);
        assert_eq!(idx.locate(1), None);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let idx = index(&[3, 8, 8, 40], 32);
        let mut writer = StructWriter::new(Vec::new());
        idx.write_to(&mut writer, 512).unwrap();
        let buffer = writer.into_inner();

        // u32 block size + u32 count + 4 keys
        assert_eq!(buffer.len(), 4 + 4 + 16);

        let mut reader = StructReader::new(Cursor::new(buffer));
        let (block_size, decoded) = SegmentIndex::read_from(&mut reader).unwrap();
        assert_eq!(block_size, 512);
        assert_eq!(decoded.first_keys(), idx.first_keys());
    }

    #[test]
    fn test_unsorted_keys_are_corrupt() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u32(512).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u32(9).unwrap();
        writer.write_u32(3).unwrap();
        let buffer = writer.into_inner();

        let mut reader = StructReader::new(Cursor::new(buffer));
        assert!(SegmentIndex::read_from(&mut reader).is_err());
    }
}
