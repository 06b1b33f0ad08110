//! Directory abstraction traits.
//!
//! The [`Directory`] trait is the single I/O boundary consumed by the index
//! core. A directory holds named byte-stream files plus a small ordered
//! key-value database used by the operation log.

use std::fmt;
use std::io::{Read, Seek, Write};

use crate::error::Result;

/// A trait for reading index files.
///
/// Inputs are random access: `Read` for sequential decoding, `Seek` for
/// jumping to block offsets.
pub trait InputStream: Read + Seek + Send {
    /// Total size of the stream in bytes.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing index files.
///
/// Written data becomes visible to readers only once `close` returns; file
/// backends stage into a temporary file and rename it into place, so a file
/// is either absent or complete.
pub trait OutputStream: Write + Send {
    /// Flush, make durable, and atomically publish the file.
    fn close(&mut self) -> Result<()>;
}

/// A named collection of byte-stream files backing one index.
pub trait Directory: Send + Sync + fmt::Debug {
    /// Whether the directory itself exists.
    fn exists(&self) -> bool;

    /// Create the directory if it does not exist yet.
    fn ensure_exists(&self) -> Result<()>;

    /// List all file names in the directory, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Open a file for random-access reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn InputStream>>;

    /// Create a file for writing with atomic publication on close.
    fn create_output(&self, name: &str) -> Result<Box<dyn OutputStream>>;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Open the embedded ordered key-value database with the given name,
    /// creating it if absent.
    fn open_database(&self, name: &str) -> Result<Box<dyn Database>>;
}

/// A small ordered key-value store used by the operation log.
///
/// Keys are monotonic `u64` ids; scan order is key order. `append` is
/// durable on return.
pub trait Database: Send + fmt::Debug {
    /// Append a batch of entries. Keys must be strictly greater than every
    /// key already stored. The batch is durable when this returns.
    fn append(&mut self, entries: &[(u64, Vec<u8>)]) -> Result<()>;

    /// Return up to `limit` entries with key greater than `key`, in key
    /// order.
    fn scan_after(&self, key: u64, limit: usize) -> Result<Vec<(u64, Vec<u8>)>>;

    /// Remove all entries with key less than or equal to `key`.
    fn truncate_up_to(&mut self, key: u64) -> Result<()>;

    /// The largest stored key, if any.
    fn last_key(&self) -> Option<u64>;
}
