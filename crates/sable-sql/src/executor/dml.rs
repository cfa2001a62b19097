//! DML execution: insert, update, delete.
//!
//! Each operation runs in a single pass, records its writes on the
//! session transaction for undo, and keeps every index of the table in
//! step with the heap. Uniqueness is checked before any mutation of a
//! row, so a duplicate key aborts with that row untouched; rows already
//! changed by the same statement are unwound by the caller's rollback.

use sable_common::types::Rid;
use sable_common::{SableError, SableResult};

use crate::analyzer::SetClause;
use crate::plan::Plan;
use crate::system::SystemManager;
use crate::txn::{Transaction, WriteRecord};
use crate::value::Value;

use super::{build, Executor};

/// Inserts literal rows. Returns the number of rows written.
pub fn execute_insert(
    sys: &SystemManager,
    txn: &mut Transaction,
    table: &str,
    rows: &[Vec<Value>],
) -> SableResult<usize> {
    let tab = sys.db.get_table(table)?.clone();
    let heap = sys.heap(table)?;

    let mut count = 0;
    for row in rows {
        let mut record = vec![0u8; tab.record_size()];
        for (value, col) in row.iter().zip(&tab.cols) {
            let raw = value.encode(col.col_type, col.len)?;
            record[col.offset..col.offset + col.len].copy_from_slice(&raw);
        }

        // Uniqueness across every index, before touching anything.
        for (ix_name, ix_meta) in &tab.indexes {
            let key = ix_meta.key_of(&record);
            if sys.index(ix_name)?.get(&key)?.is_some() {
                return Err(SableError::DuplicateKey {
                    index: ix_name.clone(),
                });
            }
        }

        let rid = heap.insert(&record)?;
        for (ix_name, ix_meta) in &tab.indexes {
            sys.index(ix_name)?.insert(&ix_meta.key_of(&record), rid)?;
        }
        txn.record(WriteRecord::Insert {
            table: table.to_string(),
            rid,
        });
        count += 1;
    }
    Ok(count)
}

/// Deletes every row produced by the scan. Returns the row count.
pub fn execute_delete(
    sys: &SystemManager,
    txn: &mut Transaction,
    table: &str,
    scan: &Plan,
) -> SableResult<usize> {
    let tab = sys.db.get_table(table)?.clone();
    let heap = sys.heap(table)?;
    let victims = collect_rids(sys, scan)?;

    for (rid, record) in &victims {
        for (ix_name, ix_meta) in &tab.indexes {
            sys.index(ix_name)?.delete(&ix_meta.key_of(record))?;
        }
        heap.delete(*rid)?;
        txn.record(WriteRecord::Delete {
            table: table.to_string(),
            rid: *rid,
            record: record.clone(),
        });
    }
    Ok(victims.len())
}

/// Rewrites every row produced by the scan with the set clauses
/// applied, refreshing any index whose key the rewrite changes.
pub fn execute_update(
    sys: &SystemManager,
    txn: &mut Transaction,
    table: &str,
    scan: &Plan,
    sets: &[SetClause],
) -> SableResult<usize> {
    let tab = sys.db.get_table(table)?.clone();
    let heap = sys.heap(table)?;
    let victims = collect_rids(sys, scan)?;

    for (rid, old) in &victims {
        let mut new = old.clone();
        for set in sets {
            let col = tab.get_col(&set.column)?;
            let raw = set.value.encode(col.col_type, col.len)?;
            new[col.offset..col.offset + col.len].copy_from_slice(&raw);
        }

        // A changed key must stay unique before any index is touched.
        for (ix_name, ix_meta) in &tab.indexes {
            let new_key = ix_meta.key_of(&new);
            if new_key != ix_meta.key_of(old) && sys.index(ix_name)?.get(&new_key)?.is_some() {
                return Err(SableError::DuplicateKey {
                    index: ix_name.clone(),
                });
            }
        }

        for (ix_name, ix_meta) in &tab.indexes {
            let old_key = ix_meta.key_of(old);
            let new_key = ix_meta.key_of(&new);
            if old_key != new_key {
                let index = sys.index(ix_name)?;
                index.delete(&old_key)?;
                index.insert(&new_key, *rid)?;
            }
        }
        heap.update(*rid, &new)?;
        txn.record(WriteRecord::Update {
            table: table.to_string(),
            rid: *rid,
            old: old.clone(),
        });
    }
    Ok(victims.len())
}

/// Drives the scan to completion first, so the mutation pass cannot
/// disturb the scan position.
fn collect_rids(sys: &SystemManager, scan: &Plan) -> SableResult<Vec<(Rid, Vec<u8>)>> {
    let mut exec: Executor = build(sys, scan)?;
    let mut out = Vec::new();
    exec.begin()?;
    while let Some(record) = exec.current() {
        out.push((exec.rid(), record.to_vec()));
        exec.next()?;
    }
    Ok(out)
}
