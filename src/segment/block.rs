//! Block codec for posting data.
//!
//! A block is a fixed-size byte array holding a prefix-coded run of sorted
//! `(key, doc_id)` pairs: a 2-byte big-endian pair count, the first pair in
//! full varints, then `count - 1` repetitions of delta-coded key and full
//! doc id. The remainder is zero padding.

use crate::error::{QuaverError, Result};
use crate::util::varint;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Upper bound on the encoded size of one pair.
const MAX_PAIR_BYTES: usize = 2 * varint::MAX_VARINT32_BYTES;

/// Size of the block header (the pair count).
const BLOCK_HEADER_BYTES: usize = 2;

/// A finished, padded block together with its key range.
#[derive(Debug, Clone)]
pub struct Block {
    /// Encoded block bytes, exactly `block_size` long.
    pub data: Vec<u8>,
    /// First key stored in the block; this is the block's entry in the
    /// sparse index.
    pub first_key: u32,
    /// Last key stored in the block.
    pub last_key: u32,
}

/// Accumulates sorted pairs into fixed-size blocks.
///
/// A block is emitted as soon as the next pair might not fit, using the
/// conservative [`MAX_PAIR_BYTES`] bound.
#[derive(Debug)]
pub struct BlockWriter {
    block_size: usize,
    payload: Vec<u8>,
    count: u16,
    first_key: u32,
    last_key: u32,
}

impl BlockWriter {
    /// Create a block writer for blocks of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size >= BLOCK_HEADER_BYTES + MAX_PAIR_BYTES);
        BlockWriter {
            block_size,
            payload: Vec::with_capacity(block_size),
            count: 0,
            first_key: 0,
            last_key: 0,
        }
    }

    /// Add one pair. Pairs must arrive sorted by `(key, doc_id)`. Returns a
    /// finished block when the pair did not fit into the current one.
    pub fn add(&mut self, key: u32, doc_id: u32) -> Option<Block> {
        let mut finished = None;
        if self.count > 0
            && (self.count == u16::MAX
                || self.payload.len() + MAX_PAIR_BYTES > self.block_size - BLOCK_HEADER_BYTES)
        {
            finished = self.finish();
        }

        let mut buf = [0u8; varint::MAX_VARINT32_BYTES];
        if self.count == 0 {
            self.first_key = key;
            let len = varint::encode_u32_into(&mut buf, key);
            self.payload.extend_from_slice(&buf[..len]);
        } else {
            debug_assert!(key >= self.last_key);
            let len = varint::encode_u32_into(&mut buf, key - self.last_key);
            self.payload.extend_from_slice(&buf[..len]);
        }
        let len = varint::encode_u32_into(&mut buf, doc_id);
        self.payload.extend_from_slice(&buf[..len]);
        self.last_key = key;
        self.count += 1;

        finished
    }

    /// Emit the current partial block, if any pairs are buffered.
    pub fn finish(&mut self) -> Option<Block> {
        if self.count == 0 {
            return None;
        }
        let mut data = Vec::with_capacity(self.block_size);
        data.extend_from_slice(&self.count.to_be_bytes());
        data.append(&mut self.payload);
        data.resize(self.block_size, 0);

        let block = Block {
            data,
            first_key: self.first_key,
            last_key: self.last_key,
        };
        self.count = 0;
        Some(block)
    }
}

/// Decode a block into its pairs.
pub fn decode_block(data: &[u8]) -> Result<Vec<(u32, u32)>> {
    if data.len() < BLOCK_HEADER_BYTES {
        return Err(QuaverError::corrupt("block shorter than its header"));
    }
    let count = u16::from_be_bytes([data[0], data[1]]) as usize;
    if count == 0 {
        return Err(QuaverError::corrupt("empty block"));
    }

    let mut pairs = Vec::with_capacity(count);
    let mut offset = BLOCK_HEADER_BYTES;
    let (mut key, consumed) = varint::decode_u32(&data[offset..])?;
    offset += consumed;
    let (doc_id, consumed) = varint::decode_u32(&data[offset..])?;
    offset += consumed;
    pairs.push((key, doc_id));

    for _ in 1..count {
        let (delta, consumed) = varint::decode_u32(&data[offset..])?;
        offset += consumed;
        let (doc_id, consumed) = varint::decode_u32(&data[offset..])?;
        offset += consumed;
        key = key
            .checked_add(delta)
            .ok_or_else(|| QuaverError::corrupt("key delta overflow in block"))?;
        pairs.push((key, doc_id));
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_roundtrip() {
        let mut writer = BlockWriter::new(DEFAULT_BLOCK_SIZE);
        let pairs = [(7u32, 1u32), (9, 1), (12, 1)];
        for (key, doc_id) in pairs {
            assert!(writer.add(key, doc_id).is_none());
        }
        let block = writer.finish().unwrap();
        assert_eq!(block.data.len(), DEFAULT_BLOCK_SIZE);
        assert_eq!(block.first_key, 7);
        assert_eq!(block.last_key, 12);

        let decoded = decode_block(&block.data).unwrap();
        assert_eq!(decoded, pairs);
    }

    #[test]
    fn test_block_layout() {
        let mut writer = BlockWriter::new(DEFAULT_BLOCK_SIZE);
        writer.add(7, 1);
        writer.add(9, 1);
        writer.add(12, 1);
        let block = writer.finish().unwrap();

        // count=3, key=7, doc=1, delta=2, doc=1, delta=3, doc=1
        assert_eq!(&block.data[..8], &[0, 3, 7, 1, 2, 1, 3, 1]);
        assert!(block.data[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overflow_starts_new_block() {
        let mut writer = BlockWriter::new(64);
        let mut blocks = Vec::new();
        let mut pairs = Vec::new();
        for i in 0..100u32 {
            // Large doc ids force multi-byte varints.
            let pair = (i * 3, 1_000_000 + i);
            pairs.push(pair);
            if let Some(block) = writer.add(pair.0, pair.1) {
                blocks.push(block);
            }
        }
        if let Some(block) = writer.finish() {
            blocks.push(block);
        }
        assert!(blocks.len() > 1);

        let mut decoded = Vec::new();
        for block in &blocks {
            assert_eq!(block.data.len(), 64);
            decoded.extend(decode_block(&block.data).unwrap());
        }
        assert_eq!(decoded, pairs);
    }

    #[test]
    fn test_empty_block_is_corrupt() {
        let data = vec![0u8; DEFAULT_BLOCK_SIZE];
        assert!(decode_block(&data).is_err());
    }

    #[test]
    fn test_truncated_block_is_corrupt() {
        // Claims 200 pairs but holds only zero padding after the first.
        let mut data = vec![0u8; 8];
        data[1] = 200;
        data[2] = 1;
        data[3] = 1;
        assert!(decode_block(&data).is_err());
    }

    #[test]
    fn test_finish_on_empty_writer() {
        let mut writer = BlockWriter::new(DEFAULT_BLOCK_SIZE);
        assert!(writer.finish().is_none());
    }
}
