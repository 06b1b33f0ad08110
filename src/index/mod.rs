//! The index core: operations, op-log, staging, snapshots, commit path and
//! the public façade.

pub mod deleter;
pub mod index;
pub mod info;
pub mod oplog;
pub mod ops;
pub mod reader;
pub mod search;
pub mod staging;
pub mod writer;

pub use deleter::IndexFileDeleter;
pub use index::{Index, IndexConfig};
pub use info::IndexInfo;
pub use oplog::OpLog;
pub use ops::{OpBatch, OpLogEntry, Operation};
pub use reader::IndexReader;
pub use search::{SearchOptions, SearchResult, TopHitsCollector};
pub use staging::StagingIndex;
pub use writer::IndexWriter;
