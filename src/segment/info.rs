//! Segment metadata.

use std::sync::Arc;

use crate::segment::docs::SegmentDocs;
use crate::segment::index::SegmentIndex;

/// Metadata for one immutable on-disk segment.
///
/// The scalar fields are persisted in the index info record; the sparse
/// index and docs list are loaded from the segment's own files and shared
/// between snapshots.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    id: u32,
    block_count: u32,
    block_size: u32,
    last_key: u32,
    checksum: u32,
    index: Arc<SegmentIndex>,
    docs: Arc<SegmentDocs>,
}

impl SegmentInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        block_count: u32,
        block_size: u32,
        last_key: u32,
        checksum: u32,
        index: Arc<SegmentIndex>,
        docs: Arc<SegmentDocs>,
    ) -> Self {
        SegmentInfo {
            id,
            block_count,
            block_size,
            last_key,
            checksum,
            index,
            docs,
        }
    }

    /// Segment id, unique within an index and never reused.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of data blocks in the segment.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Block size in bytes, recorded in the `.fii` header.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Largest key stored in the segment.
    pub fn last_key(&self) -> u32 {
        self.last_key
    }

    /// CRC32 over the segment's data file.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The in-memory sparse key index.
    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    /// The doc membership and tombstone list.
    pub fn docs(&self) -> &Arc<SegmentDocs> {
        &self.docs
    }

    /// Base name of the segment's files.
    pub fn name(&self) -> String {
        format!("segment_{}", self.id)
    }

    /// Name of the sparse index file.
    pub fn index_file_name(&self) -> String {
        format!("{}.fii", self.name())
    }

    /// Name of the block data file.
    pub fn data_file_name(&self) -> String {
        format!("{}.fid", self.name())
    }

    /// Name of the docs file.
    pub fn docs_file_name(&self) -> String {
        format!("{}.docs", self.name())
    }

    /// All file names belonging to the segment.
    pub fn files(&self) -> Vec<String> {
        vec![
            self.index_file_name(),
            self.data_file_name(),
            self.docs_file_name(),
        ]
    }
}
