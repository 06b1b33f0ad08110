//! # Quaver
//!
//! An embedded inverted index for audio-fingerprint lookup.
//!
//! Documents are 32-bit ids with sets of 32-bit terms (fingerprint
//! hashes); a query is a multiset of terms and results are ranked by the
//! number of matching terms. The index is persistent, append-heavy,
//! crash-safe, and searchable by many readers concurrently with a single
//! writer.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use quaver::index::{Index, IndexConfig};
//! use quaver::storage::RamDirectory;
//!
//! # fn main() -> quaver::error::Result<()> {
//! let dir = Arc::new(RamDirectory::new());
//! let index = Index::open(dir, IndexConfig::default(), true)?;
//!
//! index.insert_or_update_document(1, vec![7, 9, 12])?;
//! let results = index.search(&[9, 12], 0)?;
//! assert_eq!(results[0].doc_id, 1);
//! assert_eq!(results[0].score, 2);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod segment;
pub mod storage;
pub mod util;

pub use error::{QuaverError, Result};
pub use index::{Index, IndexConfig, OpBatch, SearchResult};
pub use storage::{Directory, FsDirectory, RamDirectory};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
