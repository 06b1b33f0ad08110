//! Per-segment document membership and tombstones.

use crate::error::{QuaverError, Result};
use crate::storage::{StructReader, StructWriter};

/// The sorted `(doc_id, deleted)` list of one segment.
///
/// A live entry means this segment holds the current postings of the
/// document; a tombstone means the document was deleted (or re-inserted
/// elsewhere) and any older copy must be ignored.
#[derive(Debug, Default)]
pub struct SegmentDocs {
    entries: Vec<(u32, bool)>,
}

impl SegmentDocs {
    /// Build from entries sorted by doc id.
    pub fn new(entries: Vec<(u32, bool)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        SegmentDocs { entries }
    }

    /// Number of entries, live and tombstoned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the segment mentions no documents at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a document. `Some(true)` means tombstoned, `Some(false)`
    /// live, `None` not mentioned by this segment.
    pub fn get(&self, doc_id: u32) -> Option<bool> {
        self.entries
            .binary_search_by_key(&doc_id, |&(id, _)| id)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Iterate entries in doc-id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, bool)> + '_ {
        self.entries.iter().copied()
    }

    /// Serialize in the `.docs` layout: entry count, then per entry a
    /// varint doc id and a one-byte deleted flag.
    pub fn write_to<W: std::io::Write>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        writer.write_u32(self.entries.len() as u32)?;
        for &(doc_id, deleted) in &self.entries {
            writer.write_vint32(doc_id)?;
            writer.write_u8(if deleted { 1 } else { 0 })?;
        }
        Ok(())
    }

    /// Parse the `.docs` layout.
    pub fn read_from<R: std::io::Read>(reader: &mut StructReader<R>) -> Result<Self> {
        let count = reader.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        let mut prev = None;
        for _ in 0..count {
            let doc_id = reader.read_vint32()?;
            let flag = reader.read_u8()?;
            let deleted = match flag {
                0 => false,
                1 => true,
                _ => return Err(QuaverError::corrupt("invalid docs flag")),
            };
            if prev.map_or(false, |p| doc_id <= p) {
                return Err(QuaverError::corrupt("docs entries out of order"));
            }
            prev = Some(doc_id);
            entries.push((doc_id, deleted));
        }
        Ok(SegmentDocs { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lookup() {
        let docs = SegmentDocs::new(vec![(1, false), (5, true), (9, false)]);
        assert_eq!(docs.get(1), Some(false));
        assert_eq!(docs.get(5), Some(true));
        assert_eq!(docs.get(9), Some(false));
        assert_eq!(docs.get(4), None);
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let docs = SegmentDocs::new(vec![(1, false), (300, true), (70000, false)]);
        let mut writer = StructWriter::new(Vec::new());
        docs.write_to(&mut writer).unwrap();
        let buffer = writer.into_inner();

        let mut reader = StructReader::new(Cursor::new(buffer));
        let decoded = SegmentDocs::read_from(&mut reader).unwrap();
        assert_eq!(
            decoded.iter().collect::<Vec<_>>(),
            vec![(1, false), (300, true), (70000, false)]
        );
    }

    #[test]
    fn test_invalid_flag_is_corrupt() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u32(1).unwrap();
        writer.write_vint32(1).unwrap();
        writer.write_u8(7).unwrap();
        let buffer = writer.into_inner();

        let mut reader = StructReader::new(Cursor::new(buffer));
        assert!(SegmentDocs::read_from(&mut reader).is_err());
    }

    #[test]
    fn test_out_of_order_is_corrupt() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u32(2).unwrap();
        writer.write_vint32(5).unwrap();
        writer.write_u8(0).unwrap();
        writer.write_vint32(2).unwrap();
        writer.write_u8(0).unwrap();
        let buffer = writer.into_inner();

        let mut reader = StructReader::new(Cursor::new(buffer));
        assert!(SegmentDocs::read_from(&mut reader).is_err());
    }
}
