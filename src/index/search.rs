//! Search results and the top-hits collector.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// One search hit: a document and the number of query terms it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub doc_id: u32,
    pub score: u32,
}

/// Result shaping knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Hard cap on the number of returned results.
    pub max_results: usize,

    /// Results scoring below this percentage of the best score are
    /// dropped.
    pub top_score_percent: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            max_results: 100,
            top_score_percent: 10,
        }
    }
}

/// Ranks raw hit counts into the final result list.
#[derive(Debug)]
pub struct TopHitsCollector {
    options: SearchOptions,
}

impl TopHitsCollector {
    pub fn new(options: SearchOptions) -> Self {
        TopHitsCollector { options }
    }

    /// Order hits by score descending (doc id ascending as tiebreak),
    /// apply the top-score-percent cutoff, and cap the count.
    pub fn collect(&self, hits: AHashMap<u32, u32>) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|(doc_id, score)| SearchResult { doc_id, score })
            .collect();
        results.sort_unstable_by(|a, b| b.score.cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));

        if let Some(top) = results.first().map(|r| r.score) {
            let threshold = top as u64 * self.options.top_score_percent as u64;
            results.retain(|r| r.score as u64 * 100 >= threshold);
        }
        results.truncate(self.options.max_results);
        results
    }
}
