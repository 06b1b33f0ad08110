//! In-memory directory implementation.
//!
//! Useful for tests and throwaway indexes. The file map is shared between
//! clones, so reopening an index against the same `RamDirectory` models a
//! process restart over surviving "disk" state.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QuaverError, Result};
use crate::storage::traits::{Database, Directory, InputStream, OutputStream};

type FileMap = HashMap<String, Arc<[u8]>>;
type DbMap = HashMap<String, Arc<Mutex<BTreeMap<u64, Vec<u8>>>>>;

/// An in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct RamDirectory {
    files: Arc<Mutex<FileMap>>,
    databases: Arc<Mutex<DbMap>>,
}

impl RamDirectory {
    /// Create a new, empty in-memory directory.
    pub fn new() -> Self {
        RamDirectory::default()
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Replace a file's bytes in place. Test hook for corruption scenarios.
    pub fn overwrite_file(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::from(data));
    }

    /// Read a file's bytes. Test hook.
    pub fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.to_vec())
    }
}

impl Directory for RamDirectory {
    fn exists(&self) -> bool {
        true
    }

    fn ensure_exists(&self) -> Result<()> {
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let files = self.files.lock();
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn InputStream>> {
        let files = self.files.lock();
        let data = files.get(name).ok_or_else(|| {
            QuaverError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {name}"),
            ))
        })?;
        Ok(Box::new(RamInput {
            cursor: Cursor::new(Arc::clone(data)),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn OutputStream>> {
        Ok(Box::new(RamOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
            closed: false,
        }))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn open_database(&self, name: &str) -> Result<Box<dyn Database>> {
        let mut databases = self.databases.lock();
        let entries = databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())));
        Ok(Box::new(MemoryDatabase {
            entries: Arc::clone(entries),
        }))
    }
}

/// Random-access reader over an in-memory file.
struct RamInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl Read for RamInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for RamInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl InputStream for RamInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// Buffering writer that publishes the file on close.
struct RamOutput {
    name: String,
    buffer: Vec<u8>,
    files: Arc<Mutex<FileMap>>,
    closed: bool,
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputStream for RamOutput {
    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data = std::mem::take(&mut self.buffer);
            self.files.lock().insert(self.name.clone(), Arc::from(data));
            self.closed = true;
        }
        Ok(())
    }
}

/// Ordered key-value store backed by a shared map.
#[derive(Debug)]
pub struct MemoryDatabase {
    entries: Arc<Mutex<BTreeMap<u64, Vec<u8>>>>,
}

impl Database for MemoryDatabase {
    fn append(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<()> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            debug_assert!(map.last_key_value().map_or(true, |(last, _)| last < key));
            map.insert(*key, value.clone());
        }
        Ok(())
    }

    fn scan_after(&self, key: u64, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        let map = self.entries.lock();
        Ok(map
            .range(key.saturating_add(1)..)
            .take(limit)
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn truncate_up_to(&mut self, key: u64) -> Result<()> {
        let mut map = self.entries.lock();
        let keep = map.split_off(&key.saturating_add(1));
        *map = keep;
        Ok(())
    }

    fn last_key(&self) -> Option<u64> {
        self.entries.lock().last_key_value().map(|(k, _)| *k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_invisible_until_close() {
        let dir = RamDirectory::new();
        let mut output = dir.create_output("info_0").unwrap();
        output.write_all(b"data").unwrap();
        assert!(!dir.file_exists("info_0"));

        output.close().unwrap();
        assert!(dir.file_exists("info_0"));
        assert_eq!(dir.read_file("info_0").unwrap(), b"data");
    }

    #[test]
    fn test_input_random_access() {
        let dir = RamDirectory::new();
        let mut output = dir.create_output("f").unwrap();
        output.write_all(&[1, 2, 3, 4, 5]).unwrap();
        output.close().unwrap();

        let mut input = dir.open_input("f").unwrap();
        assert_eq!(input.size().unwrap(), 5);
        input.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0u8; 2];
        input.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [4, 5]);
    }

    #[test]
    fn test_missing_file() {
        let dir = RamDirectory::new();
        assert!(dir.open_input("nope").is_err());
        // Deleting a missing file is fine.
        dir.delete_file("nope").unwrap();
    }

    #[test]
    fn test_clones_share_files() {
        let dir = RamDirectory::new();
        let mut output = dir.create_output("shared").unwrap();
        output.write_all(b"x").unwrap();
        output.close().unwrap();

        let clone = dir.clone();
        assert!(clone.file_exists("shared"));
    }

    #[test]
    fn test_database_scan_and_truncate() {
        let dir = RamDirectory::new();
        let mut db = dir.open_database("oplog").unwrap();
        db.append(&[(1, vec![1]), (2, vec![2]), (3, vec![3])]).unwrap();

        assert_eq!(db.last_key(), Some(3));
        let entries = db.scan_after(1, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 2);

        db.truncate_up_to(2).unwrap();
        let entries = db.scan_after(0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 3);
    }

    #[test]
    fn test_database_shared_between_opens() {
        let dir = RamDirectory::new();
        {
            let mut db = dir.open_database("oplog").unwrap();
            db.append(&[(1, vec![9])]).unwrap();
        }
        let db = dir.open_database("oplog").unwrap();
        assert_eq!(db.last_key(), Some(1));
    }
}
