//! Segment writer.
//!
//! Streams a sorted, deduplicated run of `(key, doc_id)` pairs into data
//! blocks and emits the segment's three files.

use std::sync::Arc;

use crate::error::Result;
use crate::segment::block::BlockWriter;
use crate::segment::docs::SegmentDocs;
use crate::segment::index::{SegmentIndex, DEFAULT_INDEX_FANOUT};
use crate::segment::info::SegmentInfo;
use crate::storage::{Directory, OutputStream, StructWriter};

/// Writes one new segment.
pub struct SegmentWriter {
    id: u32,
    block_size: usize,
    data_out: StructWriter<Box<dyn OutputStream>>,
    block_writer: BlockWriter,
    first_keys: Vec<u32>,
    last_key: u32,
    last_pair: Option<(u32, u32)>,
}

impl SegmentWriter {
    /// Start writing segment `id` with the given block size. The data file
    /// is created immediately; the index and docs files follow at
    /// [`SegmentWriter::finish`].
    pub fn new(dir: &dyn Directory, id: u32, block_size: usize) -> Result<Self> {
        let name = format!("segment_{id}.fid");
        let output = dir.create_output(&name)?;
        Ok(SegmentWriter {
            id,
            block_size,
            data_out: StructWriter::new(output),
            block_writer: BlockWriter::new(block_size),
            first_keys: Vec::new(),
            last_key: 0,
            last_pair: None,
        })
    }

    /// Add one pair. Input must be sorted by `(key, doc_id)`; exact
    /// duplicates are skipped.
    pub fn add(&mut self, key: u32, doc_id: u32) -> Result<()> {
        if self.last_pair == Some((key, doc_id)) {
            return Ok(());
        }
        debug_assert!(self.last_pair.map_or(true, |p| p < (key, doc_id)));
        self.last_pair = Some((key, doc_id));
        self.last_key = key;

        if let Some(block) = self.block_writer.add(key, doc_id) {
            self.first_keys.push(block.first_key);
            self.data_out.write_raw(&block.data)?;
        }
        Ok(())
    }

    /// Flush the final block, write the sparse index and docs files, and
    /// return the finished segment's metadata.
    pub fn finish(mut self, dir: &dyn Directory, docs: SegmentDocs) -> Result<SegmentInfo> {
        if let Some(block) = self.block_writer.finish() {
            self.first_keys.push(block.first_key);
            self.data_out.write_raw(&block.data)?;
        }
        let checksum = self.data_out.checksum();
        let mut data_out = self.data_out.into_inner();
        data_out.close()?;

        let index = SegmentIndex::new(self.first_keys, DEFAULT_INDEX_FANOUT);
        let block_count = index.block_count() as u32;

        let info = SegmentInfo::new(
            self.id,
            block_count,
            self.block_size as u32,
            self.last_key,
            checksum,
            Arc::new(index),
            Arc::new(docs),
        );

        let mut index_out = StructWriter::new(dir.create_output(&info.index_file_name())?);
        info.index().write_to(&mut index_out, self.block_size as u32)?;
        index_out.into_inner().close()?;

        let mut docs_out = StructWriter::new(dir.create_output(&info.docs_file_name())?);
        info.docs().write_to(&mut docs_out)?;
        docs_out.into_inner().close()?;

        Ok(info)
    }
}
