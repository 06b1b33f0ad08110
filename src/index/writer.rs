//! Index writer and the commit path.
//!
//! The writer handle holds the exclusive writer lock; committing
//! materializes everything staged so far into a new segment, runs the merge
//! policy, and publishes the next index revision.

use std::sync::Arc;

use ahash::AHashSet;
use log::{debug, error, info, warn};

use crate::error::Result;
use crate::index::index::IndexShared;
use crate::index::info::IndexInfo;
use crate::index::ops::OpBatch;
use crate::segment::{
    MergeSource, SegmentDocs, SegmentInfo, SegmentMerger, SegmentWriter, TieredMergePolicy,
};

/// The exclusive writer over an index.
///
/// Created through `Index::open_writer`; the writer lock is released when
/// the handle is dropped. Update calls are logged and staged immediately;
/// [`IndexWriter::commit`] materializes them into segments.
pub struct IndexWriter {
    shared: Arc<IndexShared>,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter").finish_non_exhaustive()
    }
}

impl IndexWriter {
    pub(crate) fn new(shared: Arc<IndexShared>) -> Self {
        IndexWriter { shared }
    }

    /// The current snapshot.
    pub fn info(&self) -> IndexInfo {
        self.shared.state.lock().info.clone()
    }

    /// Replace all terms of `doc_id`.
    pub fn insert_or_update_document(&self, doc_id: u32, terms: Vec<u32>) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(doc_id, terms);
        self.apply_updates(&batch)
    }

    /// Delete `doc_id`.
    pub fn delete_document(&self, doc_id: u32) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.delete_document(doc_id);
        self.apply_updates(&batch)
    }

    /// Set a named attribute.
    pub fn set_attribute<S: Into<String>>(&self, name: S, value: S) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.set_attribute(name.into(), value.into());
        self.apply_updates(&batch)
    }

    /// Log and stage a batch, durable on return.
    pub fn apply_updates(&self, batch: &OpBatch) -> Result<()> {
        self.shared.log_and_stage(batch)
    }

    /// Materialize staged operations and publish a new revision. A no-op
    /// when nothing is staged and no merge is pending.
    pub fn commit(&self) -> Result<()> {
        materialize(&self.shared)?;
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        self.shared.release_writer_lock();
    }
}

/// Run one commit cycle. The caller must hold the writer lock. Returns
/// whether a new revision was published.
pub(crate) fn materialize(shared: &Arc<IndexShared>) -> Result<bool> {
    let dir = shared.dir.as_ref();
    let old_info = shared.state.lock().info.clone();
    let up_to = shared.staging.max_applied_id();
    let (staged_docs, staged_attrs) = shared.staging.collect_up_to(up_to);

    let mut segments: Vec<SegmentInfo> = old_info.segments().to_vec();
    let mut last_segment_id = old_info.last_segment_id();
    let mut created: Vec<SegmentInfo> = Vec::new();
    let mut changed = false;

    // Step 1-3: flush staged postings into a new segment.
    if !staged_docs.is_empty() {
        let mut pairs: Vec<(u32, u32)> = staged_docs
            .iter()
            .flat_map(|(doc_id, terms)| {
                terms
                    .iter()
                    .flatten()
                    .map(move |&term| (term, *doc_id))
            })
            .collect();
        pairs.sort_unstable();

        last_segment_id += 1;
        let mut writer = SegmentWriter::new(dir, last_segment_id, shared.config.block_size)?;
        for &(key, doc_id) in &pairs {
            writer.add(key, doc_id)?;
        }
        let docs = SegmentDocs::new(
            staged_docs
                .iter()
                .map(|(doc_id, terms)| (*doc_id, terms.is_none()))
                .collect(),
        );
        let segment = writer.finish(dir, docs)?;
        info!(
            "flushed segment {} with {} blocks covering {} staged documents",
            segment.id(),
            segment.block_count(),
            staged_docs.len()
        );
        created.push(segment.clone());
        segments.push(segment);
        changed = true;
    }

    // Step 4: at most one merge per commit cycle.
    let policy = TieredMergePolicy::new(shared.config.merge_policy.clone());
    let plan = policy.select_merge(&segments);
    if plan.len() >= 2 {
        let plan_set: AHashSet<u32> = plan.iter().copied().collect();

        // Docs whose newest mention is in a surviving segment must not be
        // carried into the merged segment, which gets a higher id than the
        // survivor.
        let mut masked = AHashSet::new();
        for source in segments.iter().filter(|s| plan_set.contains(&s.id())) {
            for (doc_id, _) in source.docs().iter() {
                let authoritative = segments
                    .iter()
                    .rev()
                    .find_map(|s| s.docs().get(doc_id).map(|_| s.id()));
                if let Some(owner) = authoritative {
                    if !plan_set.contains(&owner) {
                        masked.insert(doc_id);
                    }
                }
            }
        }

        let gc_tombstones = plan.len() == segments.len();
        let mut merger = SegmentMerger::new();
        for source in segments.iter().filter(|s| plan_set.contains(&s.id())) {
            merger.add_source(MergeSource::open(dir, source)?);
        }

        last_segment_id += 1;
        let writer = SegmentWriter::new(dir, last_segment_id, shared.config.block_size)?;
        let merged = merger.merge(dir, writer, &masked, gc_tombstones)?;
        info!(
            "merged segments {:?} into segment {} ({} blocks)",
            plan,
            merged.id(),
            merged.block_count()
        );
        segments.retain(|s| !plan_set.contains(&s.id()));
        segments.push(merged);
        changed = true;
    }

    if !changed && staged_attrs.is_empty() {
        debug!("nothing to commit");
        return Ok(false);
    }

    // Step 5-6: build and publish the next revision.
    let mut new_info = old_info.clone();
    for (name, value) in staged_attrs {
        new_info.set_attribute(name, value);
    }
    new_info.set_segments(segments);
    new_info.set_last_segment_id(last_segment_id);
    if up_to > old_info.last_oplog_id() {
        new_info.set_last_oplog_id(up_to);
    }
    new_info.bump_revision();
    new_info.save(dir)?;
    info!(
        "committed revision {} with {} segments",
        new_info.revision(),
        new_info.segments().len()
    );

    // Step 7: install the snapshot and adjust file references.
    let surviving: AHashSet<u32> = new_info.segments().iter().map(SegmentInfo::id).collect();
    {
        let mut state = shared.state.lock();
        shared.deleter.inc_ref(&new_info);
        shared.deleter.dec_ref(&old_info);
        state.info = new_info;
    }

    // A segment flushed and merged away within this same commit was never
    // referenced by any snapshot; its files are removed directly.
    for segment in created.iter().filter(|s| !surviving.contains(&s.id())) {
        debug!("removing segment {} merged away before publication", segment.id());
        for file in segment.files() {
            if let Err(e) = dir.delete_file(&file) {
                warn!("failed to delete {file}: {e}");
            }
        }
    }

    // Step 8-9: drop covered staging entries, truncate the op-log.
    shared.staging.clear_up_to(up_to);
    shared.oplog.lock().truncate_up_to(up_to)?;
    shared.deleter.retry_failed();
    Ok(true)
}

/// Body of the background materialization worker.
pub(crate) fn background_materialize(shared: Arc<IndexShared>) {
    loop {
        if !shared.try_acquire_writer_lock() {
            // A writer is open; its commit will cover the staged entries.
            return;
        }
        let result = materialize(&shared);
        shared.release_writer_lock();
        match result {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!("background materialization failed: {e}");
                return;
            }
        }
        if shared.staging.is_empty() || !shared.state.lock().open {
            return;
        }
    }
}
