//! Scan executors: sequential heap scan and B+-tree index scan.

use std::sync::Arc;

use sable_common::types::{Iid, Rid};
use sable_common::SableResult;
use sable_storage::{BTreeIndex, BTreeScan, HeapScan, RecordFile};

use crate::analyzer::{CondRhs, Condition};
use crate::catalog::{index_name, ColMeta, IndexMeta};
use crate::system::SystemManager;
use crate::value::CompOp;

use super::check_conds;

/// Full-table scan. Pushed-down predicates are tested before a record
/// becomes visible downstream.
#[derive(Debug)]
pub struct SeqScanExec {
    heap: Arc<RecordFile>,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    scan: Option<HeapScan>,
    rid: Rid,
    current: Option<Vec<u8>>,
}

impl SeqScanExec {
    /// Creates a scan over `table` with its residual predicates.
    pub fn new(sys: &SystemManager, table: &str, conds: Vec<Condition>) -> SableResult<Self> {
        let heap = sys.heap(table)?;
        let cols = sys.db.get_table(table)?.cols.clone();
        Ok(Self {
            heap,
            conds,
            cols,
            scan: None,
            rid: Rid::INVALID,
            current: None,
        })
    }

    pub(crate) fn begin(&mut self) -> SableResult<()> {
        self.scan = Some(self.heap.scan());
        self.advance()
    }

    pub(crate) fn next(&mut self) -> SableResult<()> {
        if self.scan.is_none() {
            return Ok(());
        }
        self.advance()
    }

    fn advance(&mut self) -> SableResult<()> {
        let scan = self.scan.as_mut().expect("scan started");
        for rid in scan.by_ref() {
            let rid = rid?;
            let record = self.heap.get(rid)?;
            if check_conds(&record, &self.cols, &self.conds)? {
                self.rid = rid;
                self.current = Some(record);
                return Ok(());
            }
        }
        self.current = None;
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    pub(crate) fn rid(&self) -> Rid {
        self.rid
    }

    pub(crate) fn columns(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Index-driven scan: an equality prefix plus at most one range bound
/// select the leaf range; every predicate is still re-checked against
/// the fetched record.
#[derive(Debug)]
pub struct IndexScanExec {
    heap: Arc<RecordFile>,
    index: Arc<BTreeIndex>,
    meta: IndexMeta,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    scan: Option<BTreeScan>,
    rid: Rid,
    current: Option<Vec<u8>>,
}

impl IndexScanExec {
    /// Creates an index scan. `conds` must be ordered with the matched
    /// index prefix first, as the planner emits them.
    pub fn new(
        sys: &SystemManager,
        table: &str,
        conds: Vec<Condition>,
        index_cols: &[String],
    ) -> SableResult<Self> {
        let heap = sys.heap(table)?;
        let tab = sys.db.get_table(table)?;
        let ix_name = index_name(table, index_cols);
        let meta = tab
            .indexes
            .get(&ix_name)
            .ok_or_else(|| sable_common::SableError::IndexNotFound {
                table: table.to_string(),
                columns: index_cols.join(","),
            })?
            .clone();
        let index = sys.index(&ix_name)?;
        Ok(Self {
            heap,
            index,
            meta,
            conds,
            cols: tab.cols.clone(),
            scan: None,
            rid: Rid::INVALID,
            current: None,
        })
    }

    pub(crate) fn begin(&mut self) -> SableResult<()> {
        let (lower, upper) = self.key_range()?;
        self.scan = Some(self.index.scan(lower, upper));
        self.advance()
    }

    /// Derives the leaf range from the predicates.
    ///
    /// The equality prefix narrows both bounds; one range predicate on
    /// the following key column tightens one side further, padded with
    /// column minima/maxima so the bound is exact. Without any usable
    /// predicate the whole leaf chain is scanned.
    fn key_range(&self) -> SableResult<(Iid, Iid)> {
        let key_cols = self.meta.cols.clone();
        let mut prefix = Vec::with_capacity(self.meta.col_tot_len);
        let mut eq_count = 0;

        for cond in &self.conds {
            if eq_count >= key_cols.len() {
                break;
            }
            let CondRhs::Val { raw, .. } = &cond.rhs else {
                break;
            };
            if cond.op != CompOp::Eq || cond.lhs.column != key_cols[eq_count].name {
                break;
            }
            prefix.extend_from_slice(raw);
            eq_count += 1;
        }

        // One range bound on the key column right after the prefix.
        let range = self.conds.get(eq_count).filter(|cond| {
            cond.op.is_range()
                && matches!(cond.rhs, CondRhs::Val { .. })
                && eq_count < key_cols.len()
                && cond.lhs.column == key_cols[eq_count].name
        });

        if let Some(cond) = range {
            let CondRhs::Val { raw, .. } = &cond.rhs else {
                unreachable!("range filter checked the rhs shape");
            };
            let filled = eq_count + 1;
            let bound = |max: bool| -> Vec<u8> {
                let mut key = prefix.clone();
                key.extend_from_slice(raw);
                pad_key(&mut key, &self.meta, filled, max);
                key
            };
            let (lower, upper) = match cond.op {
                CompOp::Gt => (self.index.upper_bound(&bound(true))?, self.index.leaf_end()?),
                CompOp::Ge => (self.index.lower_bound(&bound(false))?, self.index.leaf_end()?),
                CompOp::Lt => (self.index.leaf_begin()?, self.index.lower_bound(&bound(false))?),
                CompOp::Le => (self.index.leaf_begin()?, self.index.upper_bound(&bound(true))?),
                _ => unreachable!("range filter checked the operator"),
            };
            // An equality prefix also bounds the unconstrained side.
            if eq_count > 0 {
                let mut lo_key = prefix.clone();
                pad_key(&mut lo_key, &self.meta, eq_count, false);
                let mut hi_key = prefix.clone();
                pad_key(&mut hi_key, &self.meta, eq_count, true);
                let lower = match cond.op {
                    CompOp::Gt | CompOp::Ge => lower,
                    _ => self.index.lower_bound(&lo_key)?,
                };
                let upper = match cond.op {
                    CompOp::Lt | CompOp::Le => upper,
                    _ => self.index.upper_bound(&hi_key)?,
                };
                return Ok((lower, upper));
            }
            return Ok((lower, upper));
        }

        if eq_count > 0 {
            let mut lo_key = prefix.clone();
            pad_key(&mut lo_key, &self.meta, eq_count, false);
            let mut hi_key = prefix;
            pad_key(&mut hi_key, &self.meta, eq_count, true);
            return Ok((
                self.index.lower_bound(&lo_key)?,
                self.index.upper_bound(&hi_key)?,
            ));
        }

        Ok((self.index.leaf_begin()?, self.index.leaf_end()?))
    }

    pub(crate) fn next(&mut self) -> SableResult<()> {
        if self.scan.is_none() {
            return Ok(());
        }
        self.advance()
    }

    fn advance(&mut self) -> SableResult<()> {
        let scan = self.scan.as_mut().expect("scan started");
        for rid in scan.by_ref() {
            let rid = rid?;
            let record = self.heap.get(rid)?;
            if check_conds(&record, &self.cols, &self.conds)? {
                self.rid = rid;
                self.current = Some(record);
                return Ok(());
            }
        }
        self.current = None;
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    pub(crate) fn rid(&self) -> Rid {
        self.rid
    }

    pub(crate) fn columns(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Extends a partial key with the minimum or maximum encoding of the
/// remaining key columns.
fn pad_key(key: &mut Vec<u8>, meta: &IndexMeta, from: usize, max: bool) {
    let schema = meta.key_schema();
    for col in &schema.columns()[from..] {
        if max {
            key.extend_from_slice(&col.max_bytes());
        } else {
            key.extend_from_slice(&col.min_bytes());
        }
    }
}
