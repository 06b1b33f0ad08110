//! Index update operations.
//!
//! An [`Operation`] is a plain tagged union; batches are ordered sequences
//! applied atomically with respect to readers. Operations serialize into
//! the op-log as a one-byte tag followed by varint/length-prefixed fields.

use std::io::Cursor;

use crate::error::{QuaverError, Result};
use crate::storage::{StructReader, StructWriter};

const OP_INSERT_OR_UPDATE: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_SET_ATTRIBUTE: u8 = 2;

/// One index update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Replace all prior terms of `doc_id` with `terms`.
    InsertOrUpdateDocument { doc_id: u32, terms: Vec<u32> },
    /// Delete `doc_id`.
    DeleteDocument { doc_id: u32 },
    /// Set a named index attribute.
    SetAttribute { name: String, value: String },
}

impl Operation {
    /// Serialize into op-log value bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = StructWriter::new(Vec::new());
        // Writing to a Vec cannot fail.
        match self {
            Operation::InsertOrUpdateDocument { doc_id, terms } => {
                writer.write_u8(OP_INSERT_OR_UPDATE).unwrap();
                writer.write_vint32(*doc_id).unwrap();
                writer.write_vint32(terms.len() as u32).unwrap();
                for &term in terms {
                    writer.write_vint32(term).unwrap();
                }
            }
            Operation::DeleteDocument { doc_id } => {
                writer.write_u8(OP_DELETE).unwrap();
                writer.write_vint32(*doc_id).unwrap();
            }
            Operation::SetAttribute { name, value } => {
                writer.write_u8(OP_SET_ATTRIBUTE).unwrap();
                writer.write_bytes(name.as_bytes()).unwrap();
                writer.write_bytes(value.as_bytes()).unwrap();
            }
        }
        writer.into_inner()
    }

    /// Parse op-log value bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = StructReader::new(Cursor::new(data));
        let tag = reader.read_u8()?;
        match tag {
            OP_INSERT_OR_UPDATE => {
                let doc_id = reader.read_vint32()?;
                let count = reader.read_vint32()? as usize;
                let mut terms = Vec::with_capacity(count);
                for _ in 0..count {
                    terms.push(reader.read_vint32()?);
                }
                Ok(Operation::InsertOrUpdateDocument { doc_id, terms })
            }
            OP_DELETE => Ok(Operation::DeleteDocument {
                doc_id: reader.read_vint32()?,
            }),
            OP_SET_ATTRIBUTE => {
                let name = String::from_utf8(reader.read_bytes()?)
                    .map_err(|_| QuaverError::corrupt("attribute name is not utf-8"))?;
                let value = String::from_utf8(reader.read_bytes()?)
                    .map_err(|_| QuaverError::corrupt("attribute value is not utf-8"))?;
                Ok(Operation::SetAttribute { name, value })
            }
            _ => Err(QuaverError::corrupt("unknown operation tag")),
        }
    }
}

/// An ordered batch of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpBatch {
    ops: Vec<Operation>,
}

impl OpBatch {
    pub fn new() -> Self {
        OpBatch::default()
    }

    /// Queue an insert-or-update of `doc_id`.
    pub fn insert_or_update_document(&mut self, doc_id: u32, terms: Vec<u32>) -> &mut Self {
        self.ops.push(Operation::InsertOrUpdateDocument { doc_id, terms });
        self
    }

    /// Queue a deletion of `doc_id`.
    pub fn delete_document(&mut self, doc_id: u32) -> &mut Self {
        self.ops.push(Operation::DeleteDocument { doc_id });
        self
    }

    /// Queue an attribute update.
    pub fn set_attribute<S: Into<String>>(&mut self, name: S, value: S) -> &mut Self {
        self.ops.push(Operation::SetAttribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    /// Reject batches the index cannot apply, before anything is logged.
    pub fn validate(&self) -> Result<()> {
        for op in &self.ops {
            if let Operation::InsertOrUpdateDocument { doc_id, terms } = op {
                if terms.is_empty() {
                    return Err(QuaverError::invalid_operation(format!(
                        "document {doc_id} has an empty term set"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One durable op-log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpLogEntry {
    pub id: u64,
    pub op: Operation,
}
