//! Index reader bound to one snapshot.

use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::error::Result;
use crate::index::index::IndexShared;
use crate::index::info::IndexInfo;
use crate::index::search::{SearchResult, TopHitsCollector};
use crate::segment::SegmentSearcher;
use crate::util::Deadline;

/// A reader over a fixed [`IndexInfo`] snapshot.
///
/// The snapshot's files stay alive (via the file deleter's reference
/// counts) until the reader is dropped, so searches are never affected by
/// concurrent commits.
pub struct IndexReader {
    shared: Arc<IndexShared>,
    info: IndexInfo,
}

impl IndexReader {
    pub(crate) fn new(shared: Arc<IndexShared>) -> Result<Self> {
        let info = shared.acquire_info()?;
        Ok(IndexReader { shared, info })
    }

    /// The snapshot this reader observes.
    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    /// Whether the snapshot contains the document (and it is not
    /// tombstoned).
    pub fn contains_document(&self, doc_id: u32) -> bool {
        matches!(self.info.doc_state(doc_id), Some((_, false)))
    }

    /// Count matching terms per document across all segments. `terms` must
    /// be sorted and unique. Segments are scanned in parallel; each stops
    /// at the deadline, so results past it are best-effort.
    ///
    /// A hit only counts when it comes from the document's authoritative
    /// segment (the newest one mentioning it), which filters both
    /// tombstoned documents and stale postings of updated ones.
    pub fn search_counts(
        &self,
        terms: &[u32],
        deadline: &Deadline,
    ) -> Result<AHashMap<u32, u32>> {
        let per_segment: Vec<(u32, AHashMap<u32, u32>)> = self
            .info
            .segments()
            .par_iter()
            .map(|segment| {
                let mut searcher = SegmentSearcher::open(self.shared.dir.as_ref(), segment)?;
                let mut hits = AHashMap::new();
                searcher.search(terms, &mut hits, deadline)?;
                Ok((segment.id(), hits))
            })
            .collect::<Result<_>>()?;

        let mut merged = AHashMap::new();
        for (segment_id, hits) in per_segment {
            for (doc_id, count) in hits {
                if self.info.doc_state(doc_id) == Some((segment_id, false)) {
                    merged.insert(doc_id, count);
                }
            }
        }
        Ok(merged)
    }

    /// Search this snapshot alone, returning ranked results.
    pub fn search(&self, terms: &[u32], timeout_ms: i64) -> Result<Vec<SearchResult>> {
        let deadline = Deadline::from_millis(timeout_ms);
        let mut sorted = terms.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let hits = self.search_counts(&sorted, &deadline)?;
        let collector = TopHitsCollector::new(self.shared.config.search.clone());
        Ok(collector.collect(hits))
    }
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        self.shared.release_info(&self.info);
    }
}
