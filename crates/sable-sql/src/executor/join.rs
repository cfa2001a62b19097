//! Join executors: nested-loop and sort-merge.
//!
//! A join's output record is the left record followed by the right
//! record; its column descriptor biases the right child's offsets by
//! the left tuple length. Join predicates are normalized at plan time
//! so each side resolves within one child, but evaluation locates
//! operands by offset, so either orientation works.

use std::cmp::Ordering;

use sable_common::SableResult;

use crate::analyzer::{CondRhs, Condition};
use crate::catalog::ColMeta;
use crate::value::{compare_raw, ColType};

use super::Executor;

/// Appends the right child's columns after the left's, biasing their
/// offsets by the left tuple length.
fn joined_columns(left: &Executor, right: &Executor) -> Vec<ColMeta> {
    let left_len: usize = left.tuple_len();
    let mut cols = left.columns().to_vec();
    for col in right.columns() {
        let mut col = col.clone();
        col.offset += left_len;
        cols.push(col);
    }
    cols
}

/// Reads one operand of a join predicate out of the (left, right)
/// record pair using the combined descriptor.
fn side<'a>(meta: &ColMeta, left: &'a [u8], right: &'a [u8], left_len: usize) -> &'a [u8] {
    if meta.offset < left_len {
        &left[meta.offset..meta.offset + meta.len]
    } else {
        let off = meta.offset - left_len;
        &right[off..off + meta.len]
    }
}

fn check_join_conds(
    conds: &[Condition],
    cols: &[ColMeta],
    left: &[u8],
    right: &[u8],
    left_len: usize,
) -> SableResult<bool> {
    for cond in conds {
        let lhs = super::find_col(cols, &cond.lhs)?;
        let lhs_data = side(lhs, left, right, left_len);
        let (rhs_data, rhs_type): (&[u8], ColType) = match &cond.rhs {
            CondRhs::Col(col) => {
                let meta = super::find_col(cols, col)?;
                (side(meta, left, right, left_len), meta.col_type)
            }
            CondRhs::Val { value, raw } => (raw.as_slice(), value.col_type()),
        };
        let ord = compare_raw(lhs_data, lhs.col_type, rhs_data, rhs_type)?;
        if !cond.op.holds(ord) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Nested-loop join: drives the left input, rewinding the right for
/// each left record.
#[derive(Debug)]
pub struct NestedLoopJoinExec {
    left: Box<Executor>,
    right: Box<Executor>,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    left_len: usize,
    left_record: Option<Vec<u8>>,
    current: Option<Vec<u8>>,
}

impl NestedLoopJoinExec {
    /// Creates a nested-loop join.
    pub fn new(left: Executor, right: Executor, conds: Vec<Condition>) -> Self {
        let cols = joined_columns(&left, &right);
        let left_len = left.tuple_len();
        Self {
            left: Box::new(left),
            right: Box::new(right),
            conds,
            cols,
            left_len,
            left_record: None,
            current: None,
        }
    }

    pub(crate) fn begin(&mut self) -> SableResult<()> {
        self.left.begin()?;
        self.right.begin()?;
        self.left_record = self.left.current().map(<[u8]>::to_vec);
        self.seek()
    }

    pub(crate) fn next(&mut self) -> SableResult<()> {
        if self.left.is_end() {
            self.current = None;
            return Ok(());
        }
        self.right.next()?;
        self.seek()
    }

    /// Scans forward from the present (left, right) position to the
    /// next pair satisfying the join predicates.
    fn seek(&mut self) -> SableResult<()> {
        loop {
            let Some(left_record) = self.left_record.clone() else {
                self.current = None;
                return Ok(());
            };
            while let Some(right_record) = self.right.current() {
                if check_join_conds(
                    &self.conds,
                    &self.cols,
                    &left_record,
                    right_record,
                    self.left_len,
                )? {
                    let mut joined = left_record.clone();
                    joined.extend_from_slice(right_record);
                    self.current = Some(joined);
                    return Ok(());
                }
                self.right.next()?;
            }
            self.left.next()?;
            self.left_record = self.left.current().map(<[u8]>::to_vec);
            if self.left_record.is_none() {
                self.current = None;
                return Ok(());
            }
            self.right.begin()?;
        }
    }

    pub(crate) fn current(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    pub(crate) fn columns(&self) -> &[ColMeta] {
        &self.cols
    }
}

/// Sort-merge join: both inputs are materialized and sorted on the
/// equality keys, then merged; equal-key groups expand as a cross
/// product, with any non-equality predicates checked per pair.
#[derive(Debug)]
pub struct SortMergeJoinExec {
    left: Box<Executor>,
    right: Box<Executor>,
    conds: Vec<Condition>,
    cols: Vec<ColMeta>,
    left_len: usize,
    rows: Vec<Vec<u8>>,
    pos: usize,
    begun: bool,
}

impl SortMergeJoinExec {
    /// Creates a sort-merge join.
    pub fn new(left: Executor, right: Executor, conds: Vec<Condition>) -> Self {
        let cols = joined_columns(&left, &right);
        let left_len = left.tuple_len();
        Self {
            left: Box::new(left),
            right: Box::new(right),
            conds,
            cols,
            left_len,
            rows: Vec::new(),
            pos: 0,
            begun: false,
        }
    }

    pub(crate) fn begin(&mut self) -> SableResult<()> {
        self.rows.clear();
        self.pos = 0;
        self.begun = true;

        // Key column pairs from the equality predicates; the left side
        // of each normalized predicate lies in the left input.
        let mut keys: Vec<(ColMeta, ColMeta)> = Vec::new();
        for cond in &self.conds {
            if cond.op != crate::value::CompOp::Eq {
                continue;
            }
            if let CondRhs::Col(rhs) = &cond.rhs {
                let l = super::find_col(&self.cols, &cond.lhs)?.clone();
                let r = super::find_col(&self.cols, rhs)?.clone();
                let (l, r) = if l.offset < self.left_len { (l, r) } else { (r, l) };
                keys.push((l, r));
            }
        }

        let mut left_rows = materialize(&mut self.left)?;
        let mut right_rows = materialize(&mut self.right)?;

        let left_len = self.left_len;
        left_rows.sort_by(|a, b| compare_keys(a, b, &keys, left_len, true));
        right_rows.sort_by(|a, b| compare_keys(a, b, &keys, left_len, false));

        let (mut i, mut j) = (0, 0);
        while i < left_rows.len() && j < right_rows.len() {
            let ord = compare_pair(&left_rows[i], &right_rows[j], &keys, left_len);
            match ord {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    // Expand the equal-key groups against each other.
                    let gi = group_end(&left_rows, i, &keys, left_len, true);
                    let gj = group_end(&right_rows, j, &keys, left_len, false);
                    for l in &left_rows[i..gi] {
                        for r in &right_rows[j..gj] {
                            if check_join_conds(&self.conds, &self.cols, l, r, left_len)? {
                                let mut joined = l.clone();
                                joined.extend_from_slice(r);
                                self.rows.push(joined);
                            }
                        }
                    }
                    i = gi;
                    j = gj;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn next(&mut self) -> SableResult<()> {
        if self.begun && self.pos < self.rows.len() {
            self.pos += 1;
        }
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&[u8]> {
        self.rows.get(self.pos).map(Vec::as_slice)
    }

    pub(crate) fn columns(&self) -> &[ColMeta] {
        &self.cols
    }
}

fn materialize(exec: &mut Executor) -> SableResult<Vec<Vec<u8>>> {
    let mut rows = Vec::new();
    exec.begin()?;
    while let Some(record) = exec.current() {
        rows.push(record.to_vec());
        exec.next()?;
    }
    Ok(rows)
}

/// Field of a row for one side of a key pair.
fn key_field<'a>(row: &'a [u8], key: &(ColMeta, ColMeta), left_len: usize, left: bool) -> (&'a [u8], ColType) {
    let meta = if left { &key.0 } else { &key.1 };
    let offset = if left { meta.offset } else { meta.offset - left_len };
    (&row[offset..offset + meta.len], meta.col_type)
}

/// Orders two rows of the same side on the key columns. The types were
/// validated at analysis, so a comparison failure cannot occur here.
fn compare_keys(
    a: &[u8],
    b: &[u8],
    keys: &[(ColMeta, ColMeta)],
    left_len: usize,
    left: bool,
) -> Ordering {
    for key in keys {
        let (fa, ta) = key_field(a, key, left_len, left);
        let (fb, tb) = key_field(b, key, left_len, left);
        let ord = compare_raw(fa, ta, fb, tb).unwrap_or(Ordering::Equal);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Orders a left row against a right row on the key columns.
fn compare_pair(l: &[u8], r: &[u8], keys: &[(ColMeta, ColMeta)], left_len: usize) -> Ordering {
    for key in keys {
        let (fl, tl) = key_field(l, key, left_len, true);
        let (fr, tr) = key_field(r, key, left_len, false);
        let ord = compare_raw(fl, tl, fr, tr).unwrap_or(Ordering::Equal);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// End of the run of rows sharing row `start`'s key.
fn group_end(
    rows: &[Vec<u8>],
    start: usize,
    keys: &[(ColMeta, ColMeta)],
    left_len: usize,
    left: bool,
) -> usize {
    let mut end = start + 1;
    while end < rows.len()
        && compare_keys(&rows[start], &rows[end], keys, left_len, left) == Ordering::Equal
    {
        end += 1;
    }
    end
}
