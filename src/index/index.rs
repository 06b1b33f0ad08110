//! The index façade.
//!
//! Ties together the directory, the op-log, the staging index, the segment
//! snapshot and the file deleter behind a thread-safe handle with a single
//! writer and any number of readers.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{QuaverError, Result};
use crate::index::deleter::IndexFileDeleter;
use crate::index::info::IndexInfo;
use crate::index::oplog::OpLog;
use crate::index::ops::OpBatch;
use crate::index::reader::IndexReader;
use crate::index::search::{SearchOptions, SearchResult, TopHitsCollector};
use crate::index::staging::StagingIndex;
use crate::index::writer::{self, IndexWriter};
use crate::segment::{MergePolicyConfig, DEFAULT_BLOCK_SIZE};
use crate::storage::Directory;
use crate::util::Deadline;

/// Name of the op-log database inside the index directory.
const OPLOG_NAME: &str = "oplog";

/// How many op-log entries are replayed per batch at open.
const REPLAY_BATCH_SIZE: usize = 100;

/// Index-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Block size for newly written segments, in bytes.
    pub block_size: usize,

    /// Tiered merge policy knobs.
    pub merge_policy: MergePolicyConfig,

    /// Result shaping for searches through the façade.
    pub search: SearchOptions,

    /// Materialize staged operations on a background worker after each
    /// accepted batch. Disable to control commits explicitly through a
    /// writer.
    pub auto_materialize: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            merge_policy: MergePolicyConfig::default(),
            search: SearchOptions::default(),
            auto_materialize: true,
        }
    }
}

pub(crate) struct IndexState {
    pub(crate) open: bool,
    pub(crate) has_writer: bool,
    pub(crate) info: IndexInfo,
}

/// State shared between the façade, readers, writers and the background
/// materializer.
pub(crate) struct IndexShared {
    pub(crate) dir: Arc<dyn Directory>,
    pub(crate) config: IndexConfig,
    pub(crate) state: Mutex<IndexState>,
    pub(crate) writer_released: Condvar,
    pub(crate) deleter: IndexFileDeleter,
    pub(crate) staging: StagingIndex,
    pub(crate) oplog: Mutex<OpLog>,
    materializer: Mutex<Option<JoinHandle<()>>>,
}

impl IndexShared {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(QuaverError::not_open("index is not open"))
        }
    }

    /// Clone the current snapshot and take file references for it.
    pub(crate) fn acquire_info(&self) -> Result<IndexInfo> {
        let state = self.state.lock();
        if !state.open {
            return Err(QuaverError::not_open("index is not open"));
        }
        let info = state.info.clone();
        self.deleter.inc_ref(&info);
        Ok(info)
    }

    /// Release a snapshot's file references.
    pub(crate) fn release_info(&self, info: &IndexInfo) {
        let state = self.state.lock();
        if state.open {
            self.deleter.dec_ref(info);
        }
    }

    /// Acquire the writer lock, waiting up to the timeout when `wait` is
    /// set.
    pub(crate) fn acquire_writer_lock(&self, wait: bool, timeout_ms: i64) -> Result<()> {
        let deadline = Deadline::from_millis(timeout_ms);
        let mut state = self.state.lock();
        if !state.open {
            return Err(QuaverError::not_open("index is not open"));
        }
        while state.has_writer {
            if !wait {
                return Err(QuaverError::locked("there already is an index writer open"));
            }
            match deadline.remaining() {
                None => self.writer_released.wait(&mut state),
                Some(left) if !left.is_zero() => {
                    let _ = self.writer_released.wait_for(&mut state, left);
                }
                Some(_) => {
                    return Err(QuaverError::timed_out(
                        "timed out waiting for the index writer lock",
                    ))
                }
            }
        }
        state.has_writer = true;
        Ok(())
    }

    /// Lock-grab for the background worker: never waits, never checks the
    /// open flag (a close still drains in-flight materialization).
    pub(crate) fn try_acquire_writer_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.has_writer {
            false
        } else {
            state.has_writer = true;
            true
        }
    }

    pub(crate) fn release_writer_lock(&self) {
        let mut state = self.state.lock();
        state.has_writer = false;
        self.writer_released.notify_one();
    }

    /// Append a batch to the op-log, then stage it. Durable on return;
    /// staging is untouched when the log write fails.
    pub(crate) fn log_and_stage(&self, batch: &OpBatch) -> Result<()> {
        self.check_open()?;
        batch.validate()?;
        if batch.is_empty() {
            return Ok(());
        }
        let (first_id, last_id) = self.oplog.lock().write(batch)?;
        self.staging.apply_updates(first_id, batch);
        debug!("staged operations {first_id}..={last_id}");
        Ok(())
    }
}

/// An on-disk inverted index for fingerprint terms.
///
/// The handle is thread-safe: threads share it to open their own readers
/// and writers, search, and apply updates.
pub struct Index {
    shared: Arc<IndexShared>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

impl Index {
    /// Open the index in `dir`. With `create` set, an empty index is
    /// created when none exists; otherwise a missing index is an error.
    /// Pending op-log entries are replayed into staging.
    pub fn open(dir: Arc<dyn Directory>, config: IndexConfig, create: bool) -> Result<Index> {
        if !dir.exists() {
            if !create {
                return Err(QuaverError::not_found("index directory does not exist"));
            }
            dir.ensure_exists()?;
        }

        let info = match IndexInfo::load(dir.as_ref())? {
            Some(info) => info,
            None => {
                if !create {
                    return Err(QuaverError::not_found("there is no index in the directory"));
                }
                let info = IndexInfo::default();
                info.save(dir.as_ref())?;
                info
            }
        };
        debug!("opening index at revision {}", info.revision());

        remove_orphan_files(dir.as_ref(), &info);

        let oplog = OpLog::open(dir.open_database(OPLOG_NAME)?, info.last_oplog_id());
        let staging = StagingIndex::new();
        let mut after = info.last_oplog_id();
        loop {
            let entries = oplog.read(after, REPLAY_BATCH_SIZE)?;
            let Some(last) = entries.last() else {
                break;
            };
            debug!("replaying op-log entries {}..={}", entries[0].id, last.id);
            after = last.id;
            staging.apply_entries(&entries);
        }

        let deleter = IndexFileDeleter::new(Arc::clone(&dir));
        deleter.inc_ref(&info);

        let shared = Arc::new(IndexShared {
            dir,
            config,
            state: Mutex::new(IndexState {
                open: true,
                has_writer: false,
                info,
            }),
            writer_released: Condvar::new(),
            deleter,
            staging,
            oplog: Mutex::new(oplog),
            materializer: Mutex::new(None),
        });
        Ok(Index { shared })
    }

    /// Whether an index exists in the directory.
    pub fn exists(dir: &dyn Directory) -> Result<bool> {
        Ok(dir.exists() && IndexInfo::find_current_revision(dir)?.is_some())
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Close the index: stop accepting work, then drain the in-flight
    /// background materialization.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
        }
        debug!("closing index");
        let handle = self.shared.materializer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// The current snapshot, without retaining it.
    pub fn info(&self) -> IndexInfo {
        self.shared.state.lock().info.clone()
    }

    /// Open a reader pinned to the current snapshot.
    pub fn open_reader(&self) -> Result<IndexReader> {
        IndexReader::new(Arc::clone(&self.shared))
    }

    /// Acquire the exclusive writer. With `wait` unset, fails `Locked`
    /// immediately when another writer is open; otherwise waits up to
    /// `timeout_ms` and fails `TimedOut`.
    pub fn open_writer(&self, wait: bool, timeout_ms: i64) -> Result<IndexWriter> {
        self.shared.acquire_writer_lock(wait, timeout_ms)?;
        Ok(IndexWriter::new(Arc::clone(&self.shared)))
    }

    /// Apply a batch of updates: durable in the op-log and visible to
    /// searches on return, materialized into segments asynchronously.
    pub fn apply_updates(&self, batch: &OpBatch) -> Result<()> {
        self.shared.log_and_stage(batch)?;
        if self.shared.config.auto_materialize {
            self.schedule_materialize();
        }
        Ok(())
    }

    /// Convenience wrapper: insert or update one document.
    pub fn insert_or_update_document(&self, doc_id: u32, terms: Vec<u32>) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.insert_or_update_document(doc_id, terms);
        self.apply_updates(&batch)
    }

    /// Convenience wrapper: delete one document.
    pub fn delete_document(&self, doc_id: u32) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.delete_document(doc_id);
        self.apply_updates(&batch)
    }

    /// Convenience wrapper: set one attribute.
    pub fn set_attribute<S: Into<String>>(&self, name: S, value: S) -> Result<()> {
        let mut batch = OpBatch::new();
        batch.set_attribute(name.into(), value.into());
        self.apply_updates(&batch)
    }

    /// Search for documents matching the query terms, best overlap first.
    ///
    /// Staging is consulted first, then the current segment snapshot;
    /// staged entries shadow segment hits for the same document. On
    /// deadline expiry the results gathered so far are returned.
    pub fn search(&self, terms: &[u32], timeout_ms: i64) -> Result<Vec<SearchResult>> {
        self.shared.check_open()?;
        let deadline = Deadline::from_millis(timeout_ms);
        let mut sorted = terms.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.is_empty() {
            return Ok(Vec::new());
        }

        let (mut hits, staging_completed) = self.shared.staging.search(&sorted, &deadline);
        if staging_completed && !deadline.expired() {
            let reader = self.open_reader()?;
            let segment_hits = reader.search_counts(&sorted, &deadline)?;
            for (doc_id, count) in segment_hits {
                if self.shared.staging.contains_document(doc_id).is_none() {
                    hits.insert(doc_id, count);
                }
            }
        }

        let collector = TopHitsCollector::new(self.shared.config.search.clone());
        Ok(collector.collect(hits))
    }

    /// Whether the index contains the document, staging-first.
    pub fn contains_document(&self, doc_id: u32) -> Result<bool> {
        self.shared.check_open()?;
        if let Some(deleted) = self.shared.staging.contains_document(doc_id) {
            return Ok(!deleted);
        }
        let info = self.shared.state.lock().info.clone();
        Ok(matches!(info.doc_state(doc_id), Some((_, false))))
    }

    /// Whether the attribute is set, staging-first.
    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        self.shared.check_open()?;
        if self.shared.staging.has_attribute(name) {
            return Ok(true);
        }
        Ok(self.shared.state.lock().info.has_attribute(name))
    }

    /// Read an attribute, staging-first.
    pub fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        self.shared.check_open()?;
        if let Some(value) = self.shared.staging.get_attribute(name) {
            return Ok(Some(value));
        }
        Ok(self.shared.state.lock().info.attribute(name).map(String::from))
    }

    fn schedule_materialize(&self) {
        let mut slot = self.shared.materializer.lock();
        if let Some(handle) = slot.take() {
            if !handle.is_finished() {
                // Still running; it re-checks staging before exiting.
                *slot = Some(handle);
                return;
            }
            let _ = handle.join();
        }
        if !self.shared.state.lock().open {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *slot = Some(std::thread::spawn(move || {
            writer::background_materialize(shared)
        }));
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.close();
    }
}

/// Delete index files a crash left behind: segment files and info
/// revisions not referenced by the loaded snapshot, and abandoned staging
/// files.
fn remove_orphan_files(dir: &dyn Directory, info: &IndexInfo) {
    let referenced = info.files();
    let files = match dir.list_files() {
        Ok(files) => files,
        Err(e) => {
            warn!("cannot list index directory for orphan cleanup: {e}");
            return;
        }
    };
    for name in files {
        let is_index_file = name.starts_with("segment_") || name.starts_with("info_");
        let is_stale_temp = name.ends_with(".tmp");
        if (is_index_file || is_stale_temp) && !referenced.contains(&name) {
            debug!("removing orphan file {name}");
            if let Err(e) = dir.delete_file(&name) {
                warn!("failed to remove orphan file {name}: {e}");
            }
        }
    }
}
