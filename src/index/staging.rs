//! In-memory staging index.
//!
//! Absorbs recent operations between segment flushes. Every entry remembers
//! the op-log id that produced it, so a commit can drop exactly the entries
//! it materialized.

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::index::ops::{OpBatch, OpLogEntry, Operation};
use crate::util::Deadline;

#[derive(Debug, Default)]
struct StagingData {
    /// doc id -> (op-log id, sorted terms or tombstone)
    docs: AHashMap<u32, (u64, Option<Vec<u32>>)>,
    /// attribute name -> (op-log id, value)
    attributes: AHashMap<String, (u64, String)>,
    max_applied_id: u64,
}

/// The staging front of the index.
#[derive(Debug, Default)]
pub struct StagingIndex {
    data: RwLock<StagingData>,
}

impl StagingIndex {
    pub fn new() -> Self {
        StagingIndex::default()
    }

    /// Apply a batch whose first operation was assigned `first_id` by the
    /// op-log. The batch becomes visible to readers atomically.
    pub fn apply_updates(&self, first_id: u64, batch: &OpBatch) {
        let mut data = self.data.write();
        for (i, op) in batch.iter().enumerate() {
            Self::apply_op(&mut data, first_id + i as u64, op);
        }
    }

    /// Apply replayed op-log entries with their original ids.
    pub fn apply_entries(&self, entries: &[OpLogEntry]) {
        let mut data = self.data.write();
        for entry in entries {
            Self::apply_op(&mut data, entry.id, &entry.op);
        }
    }

    fn apply_op(data: &mut StagingData, id: u64, op: &Operation) {
        match op {
            Operation::InsertOrUpdateDocument { doc_id, terms } => {
                let mut terms = terms.clone();
                terms.sort_unstable();
                terms.dedup();
                data.docs.insert(*doc_id, (id, Some(terms)));
            }
            Operation::DeleteDocument { doc_id } => {
                data.docs.insert(*doc_id, (id, None));
            }
            Operation::SetAttribute { name, value } => {
                data.attributes.insert(name.clone(), (id, value.clone()));
            }
        }
        data.max_applied_id = data.max_applied_id.max(id);
    }

    /// Definitive answer for staged documents: `Some(deleted)` when staging
    /// has an opinion, `None` otherwise.
    pub fn contains_document(&self, doc_id: u32) -> Option<bool> {
        self.data
            .read()
            .docs
            .get(&doc_id)
            .map(|(_, terms)| terms.is_none())
    }

    /// Count matching terms per staged document. `terms` must be sorted and
    /// unique. Returns the hit counts and whether the scan completed before
    /// the deadline.
    pub fn search(&self, terms: &[u32], deadline: &Deadline) -> (AHashMap<u32, u32>, bool) {
        let data = self.data.read();
        let mut hits = AHashMap::new();
        for (i, (&doc_id, (_, doc_terms))) in data.docs.iter().enumerate() {
            if i % 64 == 0 && deadline.expired() {
                return (hits, false);
            }
            let Some(doc_terms) = doc_terms else {
                continue;
            };
            let count = sorted_intersection_count(terms, doc_terms);
            if count > 0 {
                hits.insert(doc_id, count);
            }
        }
        (hits, true)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.data.read().attributes.contains_key(name)
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.data
            .read()
            .attributes
            .get(name)
            .map(|(_, value)| value.clone())
    }

    /// Snapshot all entries with op-log id `<= up_to` for materialization:
    /// doc states sorted by doc id, and attribute updates.
    pub fn collect_up_to(&self, up_to: u64) -> (Vec<(u32, Option<Vec<u32>>)>, Vec<(String, String)>) {
        let data = self.data.read();
        let mut docs: Vec<(u32, Option<Vec<u32>>)> = data
            .docs
            .iter()
            .filter(|(_, (id, _))| *id <= up_to)
            .map(|(&doc_id, (_, terms))| (doc_id, terms.clone()))
            .collect();
        docs.sort_unstable_by_key(|&(doc_id, _)| doc_id);

        let attributes = data
            .attributes
            .iter()
            .filter(|(_, (id, _))| *id <= up_to)
            .map(|(name, (_, value))| (name.clone(), value.clone()))
            .collect();
        (docs, attributes)
    }

    /// Drop entries already covered by a durable segment flush.
    pub fn clear_up_to(&self, up_to: u64) {
        let mut data = self.data.write();
        data.docs.retain(|_, (id, _)| *id > up_to);
        data.attributes.retain(|_, (id, _)| *id > up_to);
    }

    /// Highest op-log id applied so far.
    pub fn max_applied_id(&self) -> u64 {
        self.data.read().max_applied_id
    }

    /// Whether staging holds no entries.
    pub fn is_empty(&self) -> bool {
        let data = self.data.read();
        data.docs.is_empty() && data.attributes.is_empty()
    }
}

/// Count of elements common to two sorted, deduplicated slices.
fn sorted_intersection_count(a: &[u32], b: &[u32]) -> u32 {
    let mut count = 0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(batch: &OpBatch, first_id: u64) -> StagingIndex {
        let staging = StagingIndex::new();
        staging.apply_updates(first_id, batch);
        staging
    }

    #[test]
    fn test_insert_and_delete() {
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(1, vec![12, 7, 9]);
        batch.delete_document(2);
        let staging = stage(&batch, 1);

        assert_eq!(staging.contains_document(1), Some(false));
        assert_eq!(staging.contains_document(2), Some(true));
        assert_eq!(staging.contains_document(3), None);
        assert_eq!(staging.max_applied_id(), 2);
    }

    #[test]
    fn test_delete_shadows_insert() {
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(1, vec![1, 2, 3]);
        batch.delete_document(1);
        let staging = stage(&batch, 1);

        assert_eq!(staging.contains_document(1), Some(true));
        let (hits, completed) = staging.search(&[1], &Deadline::never());
        assert!(completed);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_counts_overlap() {
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(1, vec![7, 9, 12]);
        batch.insert_or_update_document(2, vec![9, 40]);
        let staging = stage(&batch, 1);

        let (hits, _) = staging.search(&[7, 9], &Deadline::never());
        assert_eq!(hits.get(&1), Some(&2));
        assert_eq!(hits.get(&2), Some(&1));
    }

    #[test]
    fn test_attributes() {
        let mut batch = OpBatch::new();
        batch.set_attribute("max_document_id", "7");
        let staging = stage(&batch, 1);

        assert!(staging.has_attribute("max_document_id"));
        assert_eq!(staging.get_attribute("max_document_id").as_deref(), Some("7"));
        assert!(!staging.has_attribute("other"));
    }

    #[test]
    fn test_clear_up_to_is_selective() {
        let staging = StagingIndex::new();
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(1, vec![7]);
        staging.apply_updates(1, &batch);

        let mut batch = OpBatch::new();
        batch.insert_or_update_document(2, vec![9]);
        staging.apply_updates(2, &batch);

        staging.clear_up_to(1);
        assert_eq!(staging.contains_document(1), None);
        assert_eq!(staging.contains_document(2), Some(false));
        // The high-water mark is not rewound by clearing.
        assert_eq!(staging.max_applied_id(), 2);
    }

    #[test]
    fn test_collect_up_to() {
        let staging = StagingIndex::new();
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(5, vec![9, 7]);
        batch.delete_document(3);
        batch.set_attribute("a", "1");
        staging.apply_updates(1, &batch);

        let (docs, attrs) = staging.collect_up_to(2);
        assert_eq!(docs, vec![(3, None), (5, Some(vec![7, 9]))]);
        assert!(attrs.is_empty());

        let (_, attrs) = staging.collect_up_to(3);
        assert_eq!(attrs, vec![("a".to_string(), "1".to_string())]);
    }
}
