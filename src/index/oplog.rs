//! Durable operation log.
//!
//! Every accepted batch is appended here before it touches the staging
//! index. Ids are assigned by the log, strictly increasing; write order,
//! id order and durable order coincide.

use crate::error::Result;
use crate::index::ops::{OpBatch, OpLogEntry, Operation};
use crate::storage::Database;

/// The op-log over the directory's embedded database.
#[derive(Debug)]
pub struct OpLog {
    db: Box<dyn Database>,
    next_id: u64,
}

impl OpLog {
    /// Open the log. Id assignment resumes after the last stored entry or
    /// after `floor`, whichever is higher; truncation must never make ids
    /// restart below what a committed revision has already recorded.
    pub fn open(db: Box<dyn Database>, floor: u64) -> Self {
        let next_id = db.last_key().unwrap_or(0).max(floor) + 1;
        OpLog { db, next_id }
    }

    /// Append all operations of a batch. Returns the id range
    /// `(first_id, last_id)` assigned to them; the batch is durable when
    /// this returns.
    pub fn write(&mut self, batch: &OpBatch) -> Result<(u64, u64)> {
        let first_id = self.next_id;
        let entries: Vec<(u64, Vec<u8>)> = batch
            .iter()
            .enumerate()
            .map(|(i, op)| (first_id + i as u64, op.encode()))
            .collect();
        self.db.append(&entries)?;
        self.next_id = first_id + batch.len() as u64;
        Ok((first_id, self.next_id - 1))
    }

    /// Read up to `limit` entries with id greater than `after`.
    pub fn read(&self, after: u64, limit: usize) -> Result<Vec<OpLogEntry>> {
        let raw = self.db.scan_after(after, limit)?;
        raw.into_iter()
            .map(|(id, value)| Ok(OpLogEntry { id, op: Operation::decode(&value)? }))
            .collect()
    }

    /// Drop entries with id `<= id`; called after a commit has made them
    /// redundant.
    pub fn truncate_up_to(&mut self, id: u64) -> Result<()> {
        self.db.truncate_up_to(id)
    }

    /// Id of the most recently written entry, 0 when none were ever
    /// written.
    pub fn last_id(&self) -> u64 {
        self.next_id - 1
    }
}
