//! Filesystem directory implementation.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use log::warn;

use crate::error::{QuaverError, Result};
use crate::storage::traits::{Database, Directory, InputStream, OutputStream};

/// A directory backed by the local filesystem.
///
/// Outputs are staged into `<name>.tmp` and renamed into place on close, so
/// readers never observe a partially written file.
#[derive(Debug)]
pub struct FsDirectory {
    path: PathBuf,
}

impl FsDirectory {
    /// Create a directory handle rooted at `path`. The path does not have to
    /// exist yet; call [`Directory::ensure_exists`] to create it.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FsDirectory {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The root path of this directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn sync_dir(&self) -> Result<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn ensure_exists(&self) -> Result<()> {
        if !self.path.is_dir() {
            std::fs::create_dir_all(&self.path)?;
        }
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn InputStream>> {
        let file = File::open(self.file_path(name))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FsInput {
            reader: BufReader::new(file),
            size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn OutputStream>> {
        let final_path = self.file_path(name);
        let tmp_path = self.file_path(&format!("{name}.tmp"));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        Ok(Box::new(FsOutput {
            writer: Some(BufWriter::new(file)),
            tmp_path,
            final_path,
            dir_path: self.path.clone(),
            closed: false,
        }))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn open_database(&self, name: &str) -> Result<Box<dyn Database>> {
        let db = FileDatabase::open(self.file_path(name))?;
        self.sync_dir()?;
        Ok(Box::new(db))
    }
}

struct FsInput {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FsInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FsInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl InputStream for FsInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

struct FsOutput {
    writer: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    dir_path: PathBuf,
    closed: bool,
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "output stream already closed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl OutputStream for FsOutput {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| QuaverError::invalid_operation("output stream already closed"))?;
        let file = writer
            .into_inner()
            .map_err(|e| QuaverError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.tmp_path, &self.final_path)?;
        let dir = File::open(&self.dir_path)?;
        dir.sync_all()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for FsOutput {
    fn drop(&mut self) {
        if !self.closed {
            // Abandoned output, drop the staging file.
            self.writer = None;
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

const FRAME_HEADER_LEN: usize = 8;

/// Ordered key-value store backed by a CRC-framed append-only log file.
///
/// Each record is `u32_be payload_len`, `u32_be crc32(payload)`, payload =
/// `u64_be key` followed by the value bytes. Appends are fsynced before
/// returning. At open the log is scanned and an invalid suffix (a torn write
/// from a crash) is discarded, so recovered entries are always a prefix of
/// the written entries.
#[derive(Debug)]
pub struct FileDatabase {
    path: PathBuf,
    file: File,
    entries: BTreeMap<u64, Vec<u8>>,
}

impl FileDatabase {
    /// Open or create the database at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut valid_len = 0u64;

        if path.is_file() {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            let mut offset = 0usize;
            while data.len() - offset >= FRAME_HEADER_LEN {
                let payload_len = BigEndian::read_u32(&data[offset..]) as usize;
                let crc = BigEndian::read_u32(&data[offset + 4..]);
                let payload_start = offset + FRAME_HEADER_LEN;
                if payload_len < 8 || data.len() - payload_start < payload_len {
                    break;
                }
                let payload = &data[payload_start..payload_start + payload_len];
                if crc32fast::hash(payload) != crc {
                    break;
                }
                let key = BigEndian::read_u64(payload);
                entries.insert(key, payload[8..].to_vec());
                offset = payload_start + payload_len;
                valid_len = offset as u64;
            }
            if valid_len < data.len() as u64 {
                warn!(
                    "dropping {} bytes of torn log tail from {}",
                    data.len() as u64 - valid_len,
                    path.display()
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileDatabase {
            path,
            file,
            entries,
        })
    }

    fn encode_frame(buffer: &mut Vec<u8>, key: u64, value: &[u8]) {
        let mut payload = Vec::with_capacity(8 + value.len());
        payload.extend_from_slice(&key.to_be_bytes());
        payload.extend_from_slice(value);
        buffer.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        buffer.extend_from_slice(&payload);
    }
}

impl Database for FileDatabase {
    fn append(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<()> {
        let mut buffer = Vec::new();
        for (key, value) in entries {
            Self::encode_frame(&mut buffer, *key, value);
        }
        self.file.write_all(&buffer)?;
        self.file.sync_all()?;
        for (key, value) in entries {
            self.entries.insert(*key, value.clone());
        }
        Ok(())
    }

    fn scan_after(&self, key: u64, limit: usize) -> Result<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .entries
            .range(key.saturating_add(1)..)
            .take(limit)
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn truncate_up_to(&mut self, key: u64) -> Result<()> {
        let keep = self.entries.split_off(&key.saturating_add(1));
        self.entries = keep;

        let tmp_path = self.path.with_extension("compact");
        let mut buffer = Vec::new();
        for (k, v) in &self.entries {
            Self::encode_frame(&mut buffer, *k, v);
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buffer)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn last_key(&self) -> Option<u64> {
        self.entries.last_key_value().map(|(k, _)| *k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_atomic_publication() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path());
        dir.ensure_exists().unwrap();

        let mut output = dir.create_output("info_0").unwrap();
        output.write_all(b"payload").unwrap();
        assert!(!dir.file_exists("info_0"));

        output.close().unwrap();
        assert!(dir.file_exists("info_0"));

        let mut input = dir.open_input("info_0").unwrap();
        let mut data = Vec::new();
        input.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");
    }

    #[test]
    fn test_abandoned_output_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path());
        dir.ensure_exists().unwrap();

        {
            let mut output = dir.create_output("ghost").unwrap();
            output.write_all(b"never published").unwrap();
        }
        assert!(!dir.file_exists("ghost"));
        assert!(dir.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_database_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path());
        dir.ensure_exists().unwrap();

        {
            let mut db = dir.open_database("oplog").unwrap();
            db.append(&[(1, b"one".to_vec()), (2, b"two".to_vec())]).unwrap();
        }
        let db = dir.open_database("oplog").unwrap();
        assert_eq!(db.last_key(), Some(2));
        let entries = db.scan_after(0, 10).unwrap();
        assert_eq!(entries[0], (1, b"one".to_vec()));
        assert_eq!(entries[1], (2, b"two".to_vec()));
    }

    #[test]
    fn test_database_drops_torn_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path());
        dir.ensure_exists().unwrap();

        {
            let mut db = dir.open_database("oplog").unwrap();
            db.append(&[(1, b"one".to_vec())]).unwrap();
        }
        // Simulate a crash mid-append.
        let path = tmp.path().join("oplog");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB, 0xCD, 0xEF]).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let db = dir.open_database("oplog").unwrap();
        assert_eq!(db.last_key(), Some(1));
    }

    #[test]
    fn test_database_truncate_compacts_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path());
        dir.ensure_exists().unwrap();

        {
            let mut db = dir.open_database("oplog").unwrap();
            db.append(&[(1, vec![0; 64]), (2, vec![0; 64]), (3, vec![1])]).unwrap();
            db.truncate_up_to(2).unwrap();
        }
        let db = dir.open_database("oplog").unwrap();
        let entries = db.scan_after(0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 3);
    }
}
