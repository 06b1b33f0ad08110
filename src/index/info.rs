//! Index info: the durable revision snapshot.
//!
//! An `info_<N>` file freezes one view of the whole index: the segment
//! list and the attribute map. The newest parseable revision wins at load;
//! writing a new revision through the atomic output is the commit point.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::warn;

use crate::error::{QuaverError, Result};
use crate::segment::searcher::verify_segment_data;
use crate::segment::{SegmentDocs, SegmentIndex, SegmentInfo};
use crate::storage::{Directory, StructReader, StructWriter};

const INFO_MAGIC: u32 = 0x51564958;
const INFO_FORMAT_VERSION: u32 = 1;

/// Attribute recording the last op-log id materialized on disk.
pub const LAST_OPLOG_ID_ATTR: &str = "last_oplog_id";

/// Attribute recording the segment-id high-water mark. Ids are never
/// reused: deferred deletion can keep files of dropped segments alive
/// while readers still reference them.
pub const LAST_SEGMENT_ID_ATTR: &str = "last_segment_id";

/// A point-in-time snapshot of the index.
///
/// Values are immutable once published; mutation means building the next
/// revision and atomically installing it.
#[derive(Debug, Clone, Default)]
pub struct IndexInfo {
    revision: u64,
    segments: Vec<SegmentInfo>,
    attributes: BTreeMap<String, String>,
}

impl IndexInfo {
    /// The revision number of this snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Segments in ascending id order.
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    /// Replace the segment list; keeps it sorted by id.
    pub fn set_segments(&mut self, mut segments: Vec<SegmentInfo>) {
        segments.sort_by_key(SegmentInfo::id);
        debug_assert!(segments.windows(2).all(|w| w[0].id() < w[1].id()));
        self.segments = segments;
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute<S: Into<String>>(&mut self, name: S, value: S) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Last op-log id whose effects are fully materialized in segments.
    pub fn last_oplog_id(&self) -> u64 {
        self.attribute(LAST_OPLOG_ID_ATTR)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_last_oplog_id(&mut self, id: u64) {
        self.set_attribute(LAST_OPLOG_ID_ATTR.to_string(), id.to_string());
    }

    /// Highest segment id ever allocated.
    pub fn last_segment_id(&self) -> u32 {
        self.attribute(LAST_SEGMENT_ID_ATTR)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_last_segment_id(&mut self, id: u32) {
        self.set_attribute(LAST_SEGMENT_ID_ATTR.to_string(), id.to_string());
    }

    /// Bump the revision for the next commit.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// The on-disk name of this revision.
    pub fn file_name(&self) -> String {
        format!("info_{}", self.revision)
    }

    /// All files this snapshot keeps alive: its own info file plus every
    /// segment file.
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![self.file_name()];
        for segment in &self.segments {
            files.extend(segment.files());
        }
        files
    }

    /// Resolve a document against the segment list. The newest segment
    /// mentioning the doc is authoritative; returns its id and whether the
    /// mention is a tombstone.
    pub fn doc_state(&self, doc_id: u32) -> Option<(u32, bool)> {
        self.segments
            .iter()
            .rev()
            .find_map(|s| s.docs().get(doc_id).map(|deleted| (s.id(), deleted)))
    }

    /// Find the highest revision for which an `info_<N>` file exists.
    pub fn find_current_revision(dir: &dyn Directory) -> Result<Option<u64>> {
        let mut revisions = Self::list_revisions(dir)?;
        Ok(revisions.pop())
    }

    fn list_revisions(dir: &dyn Directory) -> Result<Vec<u64>> {
        let mut revisions: Vec<u64> = dir
            .list_files()?
            .into_iter()
            .filter_map(|name| name.strip_prefix("info_").and_then(|n| n.parse().ok()))
            .collect();
        revisions.sort_unstable();
        Ok(revisions)
    }

    /// Load the newest parseable revision, pulling every referenced
    /// segment's sparse index and docs into memory and verifying each data
    /// file's checksum. Returns `None` when no revision exists at all.
    pub fn load(dir: &dyn Directory) -> Result<Option<IndexInfo>> {
        let mut revisions = Self::list_revisions(dir)?;
        while let Some(revision) = revisions.pop() {
            match Self::parse(dir, revision) {
                Ok(records) => {
                    let mut segments = Vec::with_capacity(records.segments.len());
                    for record in records.segments {
                        segments.push(load_segment(dir, record)?);
                    }
                    return Ok(Some(IndexInfo {
                        revision,
                        segments,
                        attributes: records.attributes,
                    }));
                }
                Err(e) => {
                    warn!("skipping unreadable info_{revision}: {e}");
                }
            }
        }
        Ok(None)
    }

    fn parse(dir: &dyn Directory, revision: u64) -> Result<ParsedInfo> {
        let input = dir.open_input(&format!("info_{revision}"))?;
        let mut reader = StructReader::new(input);

        if reader.read_u32()? != INFO_MAGIC {
            return Err(QuaverError::corrupt("bad info magic"));
        }
        if reader.read_u32()? != INFO_FORMAT_VERSION {
            return Err(QuaverError::corrupt("unsupported info format version"));
        }
        let stored_revision = reader.read_u64()?;
        if stored_revision != revision {
            return Err(QuaverError::corrupt("info revision does not match its name"));
        }

        let mut attributes = BTreeMap::new();
        let attr_count = reader.read_vint32()? as usize;
        for _ in 0..attr_count {
            let name = String::from_utf8(reader.read_bytes()?)
                .map_err(|_| QuaverError::corrupt("attribute name is not utf-8"))?;
            let value = String::from_utf8(reader.read_bytes()?)
                .map_err(|_| QuaverError::corrupt("attribute value is not utf-8"))?;
            attributes.insert(name, value);
        }

        let mut segments = Vec::new();
        let segment_count = reader.read_vint32()? as usize;
        let mut prev_id = None;
        for _ in 0..segment_count {
            let id = reader.read_vint32()?;
            if prev_id.map_or(false, |p| id <= p) {
                return Err(QuaverError::corrupt("segment ids out of order in info"));
            }
            prev_id = Some(id);
            segments.push(SegmentRecord {
                id,
                block_count: reader.read_vint32()?,
                last_key: reader.read_vint32()?,
                checksum: reader.read_u32()?,
            });
        }

        let computed = reader.checksum();
        let stored = reader.read_u32()?;
        if computed != stored {
            return Err(QuaverError::corrupt("info checksum mismatch"));
        }

        Ok(ParsedInfo {
            attributes,
            segments,
        })
    }

    /// Persist this snapshot as `info_<revision>`. The rename performed by
    /// the output stream's close is the atomic commit point.
    pub fn save(&self, dir: &dyn Directory) -> Result<()> {
        let output = dir.create_output(&self.file_name())?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(INFO_MAGIC)?;
        writer.write_u32(INFO_FORMAT_VERSION)?;
        writer.write_u64(self.revision)?;

        writer.write_vint32(self.attributes.len() as u32)?;
        for (name, value) in &self.attributes {
            writer.write_bytes(name.as_bytes())?;
            writer.write_bytes(value.as_bytes())?;
        }

        writer.write_vint32(self.segments.len() as u32)?;
        for segment in &self.segments {
            writer.write_vint32(segment.id())?;
            writer.write_vint32(segment.block_count())?;
            writer.write_vint32(segment.last_key())?;
            writer.write_u32(segment.checksum())?;
        }

        let checksum = writer.checksum();
        writer.write_u32(checksum)?;
        writer.into_inner().close()?;
        Ok(())
    }
}

struct ParsedInfo {
    attributes: BTreeMap<String, String>,
    segments: Vec<SegmentRecord>,
}

struct SegmentRecord {
    id: u32,
    block_count: u32,
    last_key: u32,
    checksum: u32,
}

fn load_segment(dir: &dyn Directory, record: SegmentRecord) -> Result<SegmentInfo> {
    let mut index_reader = StructReader::new(dir.open_input(&format!(
        "segment_{}.fii",
        record.id
    ))?);
    let (block_size, index) = SegmentIndex::read_from(&mut index_reader)?;
    if index.block_count() as u32 != record.block_count {
        return Err(QuaverError::corrupt(format!(
            "segment {} block count does not match its index",
            record.id
        )));
    }

    let mut docs_reader = StructReader::new(dir.open_input(&format!(
        "segment_{}.docs",
        record.id
    ))?);
    let docs = SegmentDocs::read_from(&mut docs_reader)?;

    let info = SegmentInfo::new(
        record.id,
        record.block_count,
        block_size,
        record.last_key,
        record.checksum,
        Arc::new(index),
        Arc::new(docs),
    );
    verify_segment_data(dir, &info)?;
    Ok(info)
}
