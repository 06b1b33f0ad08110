//! Segment searcher.
//!
//! Locates candidate blocks for sorted query terms through the sparse
//! index, decodes them (with a one-block cache, since consecutive terms
//! usually land in the same block), and counts matching doc ids.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{QuaverError, Result};
use crate::segment::block::decode_block;
use crate::segment::index::SegmentIndex;
use crate::segment::info::SegmentInfo;
use crate::storage::{Directory, InputStream};
use crate::util::Deadline;

/// Random-access reader over a segment's data file with a one-block decode
/// cache.
pub struct SegmentDataReader {
    input: Box<dyn InputStream>,
    block_size: usize,
    cached: Option<(usize, Vec<(u32, u32)>)>,
}

impl SegmentDataReader {
    pub fn new(input: Box<dyn InputStream>, block_size: usize) -> Self {
        SegmentDataReader {
            input,
            block_size,
            cached: None,
        }
    }

    /// Decode the block at `ordinal`, reusing the cache when possible.
    pub fn block(&mut self, ordinal: usize) -> Result<&[(u32, u32)]> {
        if self.cached.as_ref().map(|(o, _)| *o) != Some(ordinal) {
            let offset = ordinal as u64 * self.block_size as u64;
            self.input.seek(SeekFrom::Start(offset))?;
            let mut data = vec![0u8; self.block_size];
            self.input.read_exact(&mut data)?;
            self.cached = Some((ordinal, decode_block(&data)?));
        }
        Ok(&self.cached.as_ref().unwrap().1)
    }
}

/// Verify a segment's data file against its recorded checksum.
pub fn verify_segment_data(dir: &dyn Directory, info: &SegmentInfo) -> Result<()> {
    let mut input = dir.open_input(&info.data_file_name())?;
    let expected_len = info.block_count() as u64 * info.block_size() as u64;
    if input.size()? != expected_len {
        return Err(QuaverError::corrupt(format!(
            "segment {} data file has wrong size",
            info.id()
        )));
    }
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    if hasher.finalize() != info.checksum() {
        return Err(QuaverError::corrupt(format!(
            "segment {} failed checksum verification",
            info.id()
        )));
    }
    Ok(())
}

/// Scans one segment for query term matches.
pub struct SegmentSearcher {
    index: Arc<SegmentIndex>,
    data: SegmentDataReader,
    last_key: u32,
}

impl SegmentSearcher {
    /// Open a searcher over the segment's data file.
    pub fn open(dir: &dyn Directory, info: &SegmentInfo) -> Result<Self> {
        let input = dir.open_input(&info.data_file_name())?;
        Ok(SegmentSearcher {
            index: Arc::clone(info.index()),
            data: SegmentDataReader::new(input, info.block_size() as usize),
            last_key: info.last_key(),
        })
    }

    /// Count matches for sorted unique query terms into `hits`. Returns
    /// `false` when the deadline expired before the scan finished.
    pub fn search(
        &mut self,
        terms: &[u32],
        hits: &mut AHashMap<u32, u32>,
        deadline: &Deadline,
    ) -> Result<bool> {
        for &term in terms {
            if term > self.last_key {
                break;
            }
            if deadline.expired() {
                return Ok(false);
            }
            let Some((begin, end)) = self.index.locate(term) else {
                continue;
            };
            for ordinal in begin..end {
                let pairs = self.data.block(ordinal)?;
                let mut pos = pairs.partition_point(|&(key, _)| key < term);
                while pos < pairs.len() && pairs[pos].0 == term {
                    *hits.entry(pairs[pos].1).or_insert(0) += 1;
                    pos += 1;
                }
            }
        }
        Ok(true)
    }
}
