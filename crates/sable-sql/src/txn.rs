//! Transaction context: statement/transaction write sets and undo.
//!
//! The engine does not implement a full transaction protocol; the
//! session keeps a write set so that ROLLBACK, and any statement that
//! fails midway, can undo its heap and index changes. COMMIT journals
//! the write set to the log and clears it.

use serde::{Deserialize, Serialize};

use sable_common::types::Rid;
use sable_common::SableResult;
use sable_storage::LogManager;

use crate::system::SystemManager;

/// One undoable change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WriteRecord {
    /// A record was inserted.
    Insert {
        /// Target table.
        table: String,
        /// Where it landed.
        rid: Rid,
    },
    /// A record was deleted.
    Delete {
        /// Target table.
        table: String,
        /// Where it lived.
        rid: Rid,
        /// Its bytes, for restoration.
        record: Vec<u8>,
    },
    /// A record was rewritten in place.
    Update {
        /// Target table.
        table: String,
        /// Its location.
        rid: Rid,
        /// The bytes before the rewrite.
        old: Vec<u8>,
    },
}

/// Per-session transaction state.
#[derive(Debug, Default)]
pub struct Transaction {
    explicit: bool,
    writes: Vec<WriteRecord>,
}

impl Transaction {
    /// Creates an idle transaction context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters or leaves explicit mode (BEGIN ... COMMIT/ROLLBACK).
    pub fn set_explicit(&mut self, explicit: bool) {
        self.explicit = explicit;
    }

    /// True between BEGIN and COMMIT/ROLLBACK.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Current length of the write set; statements save this before
    /// running so a failure can unwind exactly their own writes.
    pub fn mark(&self) -> usize {
        self.writes.len()
    }

    /// Appends one write.
    pub fn record(&mut self, write: WriteRecord) {
        self.writes.push(write);
    }

    /// Journals the write set to the log and clears it.
    pub fn commit(&mut self, log: &LogManager) -> SableResult<()> {
        for write in &self.writes {
            let bytes = serde_json::to_vec(write)
                .map_err(|e| sable_common::SableError::internal(format!("log encode: {e}")))?;
            log.append(&bytes)?;
        }
        if !self.writes.is_empty() {
            log.flush()?;
        }
        self.writes.clear();
        self.explicit = false;
        Ok(())
    }

    /// Undoes writes past `mark`, newest first.
    pub fn rollback_to(&mut self, sys: &SystemManager, mark: usize) -> SableResult<()> {
        while self.writes.len() > mark {
            let write = self.writes.pop().expect("write set not empty");
            undo(sys, &write)?;
        }
        Ok(())
    }

    /// Undoes the whole write set and leaves explicit mode.
    pub fn rollback(&mut self, sys: &SystemManager) -> SableResult<()> {
        self.rollback_to(sys, 0)?;
        self.explicit = false;
        Ok(())
    }
}

/// Reverts one write, maintaining every index of the table.
fn undo(sys: &SystemManager, write: &WriteRecord) -> SableResult<()> {
    match write {
        WriteRecord::Insert { table, rid } => {
            let tab = sys.db.get_table(table)?;
            let heap = sys.heap(table)?;
            let record = heap.get(*rid)?;
            for (ix_name, ix_meta) in &tab.indexes {
                sys.index(ix_name)?.delete(&ix_meta.key_of(&record))?;
            }
            heap.delete(*rid)?;
        }
        WriteRecord::Delete { table, rid, record } => {
            let tab = sys.db.get_table(table)?;
            let heap = sys.heap(table)?;
            heap.insert_at(*rid, record)?;
            for (ix_name, ix_meta) in &tab.indexes {
                sys.index(ix_name)?.insert(&ix_meta.key_of(record), *rid)?;
            }
        }
        WriteRecord::Update { table, rid, old } => {
            let tab = sys.db.get_table(table)?;
            let heap = sys.heap(table)?;
            let current = heap.get(*rid)?;
            for (ix_name, ix_meta) in &tab.indexes {
                let new_key = ix_meta.key_of(&current);
                let old_key = ix_meta.key_of(old);
                if new_key != old_key {
                    let index = sys.index(ix_name)?;
                    index.delete(&new_key)?;
                    index.insert(&old_key, *rid)?;
                }
            }
            heap.update(*rid, old)?;
        }
    }
    Ok(())
}
