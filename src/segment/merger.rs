//! K-way segment merger.
//!
//! Merges the sorted pair streams of several segments into one new segment
//! through a min-heap, resolving per-document state so that the newest
//! mention among the sources wins and dead postings are compacted away.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::error::Result;
use crate::segment::docs::SegmentDocs;
use crate::segment::info::SegmentInfo;
use crate::segment::searcher::SegmentDataReader;
use crate::segment::writer::SegmentWriter;
use crate::storage::Directory;

/// Streaming enumerator over all pairs of one segment, in `(key, doc_id)`
/// order.
pub struct SegmentPairs {
    data: SegmentDataReader,
    block_count: usize,
    next_block: usize,
    buffer: Vec<(u32, u32)>,
    position: usize,
}

impl SegmentPairs {
    /// Open an enumerator over the segment's data file.
    pub fn open(dir: &dyn Directory, info: &SegmentInfo) -> Result<Self> {
        let input = dir.open_input(&info.data_file_name())?;
        Ok(SegmentPairs {
            data: SegmentDataReader::new(input, info.block_size() as usize),
            block_count: info.block_count() as usize,
            next_block: 0,
            buffer: Vec::new(),
            position: 0,
        })
    }

    /// Return the next pair, or `None` at the end of the segment.
    pub fn next_pair(&mut self) -> Result<Option<(u32, u32)>> {
        while self.position >= self.buffer.len() {
            if self.next_block >= self.block_count {
                return Ok(None);
            }
            self.buffer = self.data.block(self.next_block)?.to_vec();
            self.position = 0;
            self.next_block += 1;
        }
        let pair = self.buffer[self.position];
        self.position += 1;
        Ok(Some(pair))
    }
}

/// One input segment of a merge.
pub struct MergeSource {
    segment_id: u32,
    pairs: SegmentPairs,
    docs: Arc<SegmentDocs>,
}

impl MergeSource {
    /// Open a source over a segment.
    pub fn open(dir: &dyn Directory, info: &SegmentInfo) -> Result<Self> {
        Ok(MergeSource {
            segment_id: info.id(),
            pairs: SegmentPairs::open(dir, info)?,
            docs: Arc::clone(info.docs()),
        })
    }
}

/// K-way merger over segment pair streams.
#[derive(Default)]
pub struct SegmentMerger {
    sources: Vec<MergeSource>,
}

impl SegmentMerger {
    pub fn new() -> Self {
        SegmentMerger::default()
    }

    /// Add an input segment.
    pub fn add_source(&mut self, source: MergeSource) {
        self.sources.push(source);
    }

    /// Merge all sources into `writer`.
    ///
    /// `masked` holds doc ids whose authoritative mention lives in a
    /// segment outside the merge; they are dropped entirely so the merge
    /// does not steal authority from a newer surviving segment. When
    /// `gc_tombstones` is set (the merge covers the whole index) tombstones
    /// are dropped instead of carried forward.
    pub fn merge(
        mut self,
        dir: &dyn Directory,
        writer: SegmentWriter,
        masked: &AHashSet<u32>,
        gc_tombstones: bool,
    ) -> Result<SegmentInfo> {
        self.sources.sort_by_key(|s| s.segment_id);

        // Final per-doc state among the sources: the highest-id mention wins.
        let mut doc_state: AHashMap<u32, (u32, bool)> = AHashMap::new();
        for source in &self.sources {
            for (doc_id, deleted) in source.docs.iter() {
                doc_state.insert(doc_id, (source.segment_id, deleted));
            }
        }

        let mut writer = writer;
        let mut heap: BinaryHeap<Reverse<(u32, u32, usize)>> = BinaryHeap::new();
        for (idx, source) in self.sources.iter_mut().enumerate() {
            if let Some((key, doc_id)) = source.pairs.next_pair()? {
                heap.push(Reverse((key, doc_id, idx)));
            }
        }

        let mut previous = None;
        while let Some(Reverse((key, doc_id, idx))) = heap.pop() {
            let segment_id = self.sources[idx].segment_id;
            let authoritative = doc_state
                .get(&doc_id)
                .map_or(true, |&(owner, deleted)| owner == segment_id && !deleted);
            if authoritative && !masked.contains(&doc_id) && previous != Some((key, doc_id)) {
                writer.add(key, doc_id)?;
                previous = Some((key, doc_id));
            }
            if let Some((key, doc_id)) = self.sources[idx].pairs.next_pair()? {
                heap.push(Reverse((key, doc_id, idx)));
            }
        }

        let mut entries: Vec<(u32, bool)> = doc_state
            .into_iter()
            .filter(|(doc_id, (_, deleted))| {
                !masked.contains(doc_id) && !(*deleted && gc_tombstones)
            })
            .map(|(doc_id, (_, deleted))| (doc_id, deleted))
            .collect();
        entries.sort_unstable_by_key(|&(doc_id, _)| doc_id);

        writer.finish(dir, SegmentDocs::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::block::DEFAULT_BLOCK_SIZE;
    use crate::storage::RamDirectory;

    fn build_segment(
        dir: &RamDirectory,
        id: u32,
        pairs: &[(u32, u32)],
        docs: Vec<(u32, bool)>,
    ) -> SegmentInfo {
        let mut writer = SegmentWriter::new(dir, id, DEFAULT_BLOCK_SIZE).unwrap();
        for &(key, doc_id) in pairs {
            writer.add(key, doc_id).unwrap();
        }
        writer.finish(dir, SegmentDocs::new(docs)).unwrap()
    }

    fn all_pairs(dir: &RamDirectory, info: &SegmentInfo) -> Vec<(u32, u32)> {
        let mut pairs = SegmentPairs::open(dir, info).unwrap();
        let mut out = Vec::new();
        while let Some(pair) = pairs.next_pair().unwrap() {
            out.push(pair);
        }
        out
    }

    #[test]
    fn test_merge_two_segments() {
        let dir = RamDirectory::new();
        let a = build_segment(&dir, 1, &[(7, 1), (9, 1)], vec![(1, false)]);
        let b = build_segment(&dir, 2, &[(7, 2), (12, 2)], vec![(2, false)]);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());
        merger.add_source(MergeSource::open(&dir, &b).unwrap());

        let writer = SegmentWriter::new(&dir, 3, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger
            .merge(&dir, writer, &AHashSet::new(), true)
            .unwrap();

        assert_eq!(all_pairs(&dir, &merged), vec![(7, 1), (7, 2), (9, 1), (12, 2)]);
        assert_eq!(
            merged.docs().iter().collect::<Vec<_>>(),
            vec![(1, false), (2, false)]
        );
    }

    #[test]
    fn test_merge_drops_tombstoned_postings() {
        let dir = RamDirectory::new();
        let a = build_segment(&dir, 1, &[(7, 1), (9, 1)], vec![(1, false)]);
        // Doc 1 deleted in the newer segment.
        let b = build_segment(&dir, 2, &[(5, 2)], vec![(1, true), (2, false)]);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());
        merger.add_source(MergeSource::open(&dir, &b).unwrap());

        let writer = SegmentWriter::new(&dir, 3, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger
            .merge(&dir, writer, &AHashSet::new(), true)
            .unwrap();

        assert_eq!(all_pairs(&dir, &merged), vec![(5, 2)]);
        assert_eq!(
            merged.docs().iter().collect::<Vec<_>>(),
            vec![(2, false)]
        );
    }

    #[test]
    fn test_merge_keeps_tombstones_for_older_segments() {
        let dir = RamDirectory::new();
        let a = build_segment(&dir, 2, &[(5, 2)], vec![(1, true), (2, false)]);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());

        let writer = SegmentWriter::new(&dir, 3, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger
            .merge(&dir, writer, &AHashSet::new(), false)
            .unwrap();

        assert_eq!(
            merged.docs().iter().collect::<Vec<_>>(),
            vec![(1, true), (2, false)]
        );
    }

    #[test]
    fn test_merge_update_within_sources() {
        let dir = RamDirectory::new();
        // Doc 1 has old terms in segment 1 and was re-inserted in segment 2.
        let a = build_segment(&dir, 1, &[(7, 1), (9, 1)], vec![(1, false)]);
        let b = build_segment(&dir, 2, &[(20, 1)], vec![(1, false)]);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());
        merger.add_source(MergeSource::open(&dir, &b).unwrap());

        let writer = SegmentWriter::new(&dir, 3, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger
            .merge(&dir, writer, &AHashSet::new(), true)
            .unwrap();

        // Only the newer postings survive.
        assert_eq!(all_pairs(&dir, &merged), vec![(20, 1)]);
    }

    #[test]
    fn test_merge_masks_docs_owned_elsewhere() {
        let dir = RamDirectory::new();
        let a = build_segment(&dir, 1, &[(7, 1), (9, 2)], vec![(1, false), (2, false)]);
        let b = build_segment(&dir, 2, &[(8, 3)], vec![(3, false)]);

        // Doc 2 was re-inserted in a segment that is not part of the merge.
        let mut masked = AHashSet::new();
        masked.insert(2);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());
        merger.add_source(MergeSource::open(&dir, &b).unwrap());

        let writer = SegmentWriter::new(&dir, 4, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger.merge(&dir, writer, &masked, false).unwrap();

        assert_eq!(all_pairs(&dir, &merged), vec![(7, 1), (8, 3)]);
        assert_eq!(
            merged.docs().iter().collect::<Vec<_>>(),
            vec![(1, false), (3, false)]
        );
    }

    #[test]
    fn test_merge_dedupes_identical_pairs() {
        let dir = RamDirectory::new();
        // The same doc listed live in both segments with overlapping terms;
        // the newer segment owns it, so pairs are emitted once.
        let a = build_segment(&dir, 1, &[(7, 1)], vec![(1, false)]);
        let b = build_segment(&dir, 2, &[(7, 1), (9, 1)], vec![(1, false)]);

        let mut merger = SegmentMerger::new();
        merger.add_source(MergeSource::open(&dir, &a).unwrap());
        merger.add_source(MergeSource::open(&dir, &b).unwrap());

        let writer = SegmentWriter::new(&dir, 3, DEFAULT_BLOCK_SIZE).unwrap();
        let merged = merger
            .merge(&dir, writer, &AHashSet::new(), true)
            .unwrap();

        assert_eq!(all_pairs(&dir, &merged), vec![(7, 1), (9, 1)]);
    }
}
