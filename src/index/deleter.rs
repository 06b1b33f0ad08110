//! Reference-counted deferred file deletion.
//!
//! Every live snapshot holds a reference on each of its files; a file is
//! physically removed when its count drops to zero. Deletion failures are
//! logged and retried at the next commit, never failing the commit itself.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::index::info::IndexInfo;
use crate::storage::Directory;

/// Tracks which index files are still referenced by live snapshots.
#[derive(Debug)]
pub struct IndexFileDeleter {
    dir: Arc<dyn Directory>,
    counts: Mutex<AHashMap<String, usize>>,
    failed: Mutex<AHashSet<String>>,
}

impl IndexFileDeleter {
    pub fn new(dir: Arc<dyn Directory>) -> Self {
        IndexFileDeleter {
            dir,
            counts: Mutex::new(AHashMap::new()),
            failed: Mutex::new(AHashSet::new()),
        }
    }

    /// Take a reference on every file of a snapshot.
    pub fn inc_ref(&self, info: &IndexInfo) {
        let mut counts = self.counts.lock();
        for file in info.files() {
            *counts.entry(file).or_insert(0) += 1;
        }
    }

    /// Release a snapshot's references, deleting files that reached zero.
    pub fn dec_ref(&self, info: &IndexInfo) {
        let mut unreferenced = Vec::new();
        {
            let mut counts = self.counts.lock();
            for file in info.files() {
                let dropped = match counts.get_mut(&file) {
                    Some(count) if *count > 1 => {
                        *count -= 1;
                        false
                    }
                    Some(_) => true,
                    None => {
                        debug_assert!(false, "unbalanced dec_ref for {file}");
                        false
                    }
                };
                if dropped {
                    counts.remove(&file);
                    unreferenced.push(file);
                }
            }
        }
        for file in unreferenced {
            self.delete(&file);
        }
    }

    /// Number of live references on a file. Test hook.
    pub fn ref_count(&self, name: &str) -> usize {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    /// Retry deletions that failed earlier.
    pub fn retry_failed(&self) {
        let pending: Vec<String> = self.failed.lock().drain().collect();
        for file in pending {
            if self.dir.file_exists(&file) {
                self.delete(&file);
            }
        }
    }

    fn delete(&self, name: &str) {
        debug!("deleting unreferenced file {name}");
        if let Err(e) = self.dir.delete_file(name) {
            warn!("failed to delete {name}: {e}; will retry on next commit");
            self.failed.lock().insert(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RamDirectory;
    use std::io::Write;

    fn touch(dir: &RamDirectory, name: &str) {
        let mut out = dir.create_output(name).unwrap();
        out.write_all(b"x").unwrap();
        out.close().unwrap();
    }

    fn info_with_revision(revision: u64) -> IndexInfo {
        let mut info = IndexInfo::default();
        for _ in 0..revision {
            info.bump_revision();
        }
        info
    }

    #[test]
    fn test_file_deleted_when_unreferenced() {
        let dir = Arc::new(RamDirectory::new());
        touch(&dir, "info_0");

        let deleter = IndexFileDeleter::new(dir.clone() as Arc<dyn Directory>);
        let info = info_with_revision(0);

        deleter.inc_ref(&info);
        deleter.inc_ref(&info);
        assert_eq!(deleter.ref_count("info_0"), 2);

        deleter.dec_ref(&info);
        assert!(dir.file_exists("info_0"));

        deleter.dec_ref(&info);
        assert!(!dir.file_exists("info_0"));
        assert_eq!(deleter.ref_count("info_0"), 0);
    }

    #[test]
    fn test_old_revision_outlives_reader() {
        let dir = Arc::new(RamDirectory::new());
        touch(&dir, "info_0");
        touch(&dir, "info_1");

        let deleter = IndexFileDeleter::new(dir.clone() as Arc<dyn Directory>);
        let old = info_with_revision(0);
        let new = info_with_revision(1);

        // Index holds old; a reader acquires it too; then a commit swaps.
        deleter.inc_ref(&old);
        deleter.inc_ref(&old);
        deleter.inc_ref(&new);
        deleter.dec_ref(&old);
        assert!(dir.file_exists("info_0"), "reader still holds the snapshot");

        deleter.dec_ref(&old);
        assert!(!dir.file_exists("info_0"));
        assert!(dir.file_exists("info_1"));
    }
}
