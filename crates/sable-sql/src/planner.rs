//! Physical planner: scan selection, join planning, sort, projection.
//!
//! Scans pick an index with the prefix-match rule; joins follow the
//! same greedy cardinality order as the logical tree so EXPLAIN and
//! execution agree; the join algorithm is chosen by the planner knobs
//! (nested-loop wins when both are enabled).

use std::collections::HashMap;

use sable_common::config::PlannerKnobs;
use sable_common::{SableError, SableResult};

use crate::analyzer::{BoundQuery, CondRhs, Condition};
use crate::optimizer::{join_order, partition_conds};
use crate::plan::{Plan, StatementPlan};
use crate::system::SystemManager;
use crate::value::CompOp;

/// Planner over one catalog snapshot and a knob snapshot.
pub struct Planner<'a> {
    sys: &'a SystemManager,
    enable_nestedloop: bool,
    enable_sortmerge: bool,
}

impl<'a> Planner<'a> {
    /// Creates a planner, snapshotting the join knobs.
    pub fn new(sys: &'a SystemManager, knobs: &PlannerKnobs) -> Self {
        Self {
            sys,
            enable_nestedloop: knobs.nestedloop(),
            enable_sortmerge: knobs.sortmerge(),
        }
    }

    /// Plans a bound SELECT into a physical operator tree.
    pub fn plan_select(&self, query: &BoundQuery) -> SableResult<StatementPlan> {
        let (mut filters, mut join_pool) = partition_conds(query);

        // One scan per table, absorbing that table's own predicates.
        let mut scans: HashMap<String, Plan> = HashMap::new();
        for table in &query.tables {
            let mut table_conds = Vec::new();
            filters.retain(|cond| {
                if cond.tables().iter().all(|t| t == table) {
                    table_conds.push(cond.clone());
                    false
                } else {
                    true
                }
            });
            scans.insert(table.clone(), self.build_scan(table, table_conds)?);
        }

        let mut take_scan = |table: &str| {
            scans
                .remove(table)
                .ok_or_else(|| SableError::internal(format!("no scan built for '{table}'")))
        };
        let mut plan = if query.tables.len() == 1 {
            take_scan(&query.tables[0])?
        } else {
            let steps = join_order(self.sys, &query.tables, &mut join_pool);
            let mut iter = steps.into_iter();
            let (first, _) = iter
                .next()
                .ok_or_else(|| SableError::internal("empty join order"))?;
            let mut tree = take_scan(&first)?;
            for (table, conds) in iter {
                let right = take_scan(&table)?;
                tree = self.build_join(tree, right, conds)?;
            }
            tree
        };

        // Residual predicates that fit no scan or join.
        filters.extend(join_pool);
        if !filters.is_empty() {
            plan = Plan::Filter {
                child: Box::new(plan),
                conds: filters,
            };
        }

        if let Some((col, desc)) = &query.order_by {
            plan = Plan::Sort {
                child: Box::new(plan),
                col: col.clone(),
                desc: *desc,
            };
        }

        Ok(StatementPlan::Select {
            plan: Plan::Projection {
                child: Box::new(plan),
                cols: query.cols.clone(),
            },
            cols: query.cols.clone(),
        })
    }

    /// Plans the scan of an UPDATE or DELETE target table.
    pub fn plan_dml_scan(&self, table: &str, query: &BoundQuery) -> SableResult<Plan> {
        self.build_scan(table, query.conds.clone())
    }

    fn build_scan(&self, table: &str, mut conds: Vec<Condition>) -> SableResult<Plan> {
        match self.match_index(table, &mut conds)? {
            Some(index_cols) => Ok(Plan::IndexScan {
                table: table.to_string(),
                conds,
                index_cols,
            }),
            None => Ok(Plan::SeqScan {
                table: table.to_string(),
                conds,
            }),
        }
    }

    fn build_join(&self, left: Plan, right: Plan, conds: Vec<Condition>) -> SableResult<Plan> {
        if self.enable_nestedloop {
            Ok(Plan::NestedLoopJoin {
                left: Box::new(left),
                right: Box::new(right),
                conds,
            })
        } else if self.enable_sortmerge {
            if !conds.iter().any(|c| c.op == CompOp::Eq && c.is_col_col()) {
                return Err(SableError::unsupported(
                    "sort-merge join requires an equality predicate",
                ));
            }
            Ok(Plan::SortMergeJoin {
                left: Box::new(left),
                right: Box::new(right),
                conds,
            })
        } else {
            Err(SableError::internal("no join executor enabled"))
        }
    }

    /// Index-match rule: over all of the table's indexes, choose the
    /// one maximizing `(matched_prefix_length, leading_equalities)`
    /// where matched predicate columns must form a prefix of the index.
    /// On a match the condition list is reordered so the matched prefix
    /// leads, in index-column order; the chosen index's full column
    /// list is returned.
    fn match_index(
        &self,
        table: &str,
        conds: &mut Vec<Condition>,
    ) -> SableResult<Option<Vec<String>>> {
        if conds.is_empty() {
            return Ok(None);
        }
        let tab = self.sys.db.get_table(table)?;

        // First usable predicate per column: literal comparisons whose
        // value family matches the column, so the raw bytes can feed
        // key construction directly.
        let mut conds_map: HashMap<&str, usize> = HashMap::new();
        for (i, cond) in conds.iter().enumerate() {
            let CondRhs::Val { value, .. } = &cond.rhs else {
                continue;
            };
            let col = tab.get_col(&cond.lhs.column)?;
            if value.col_type() != col.col_type {
                continue;
            }
            conds_map.entry(cond.lhs.column.as_str()).or_insert(i);
        }

        let mut best: Option<(usize, usize, Vec<String>)> = None;
        for index in tab.indexes.values() {
            let mut len = 0;
            let mut eqs = 0;
            let mut counting_eqs = true;
            for col in &index.cols {
                let Some(&i) = conds_map.get(col.name.as_str()) else {
                    break;
                };
                if conds[i].op == CompOp::Eq && counting_eqs {
                    eqs += 1;
                } else {
                    counting_eqs = false;
                }
                len += 1;
            }
            if len == 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_len, best_eqs, _)) => (len, eqs) > (*best_len, *best_eqs),
            };
            if better {
                best = Some((len, eqs, index.col_names()));
            }
        }

        let Some((prefix_len, _, index_cols)) = best else {
            return Ok(None);
        };

        // Reorder: matched prefix first in index order, everything else
        // after in original order.
        let mut used = vec![false; conds.len()];
        let mut fed = Vec::with_capacity(conds.len());
        for col in index_cols.iter().take(prefix_len) {
            let i = conds_map[col.as_str()];
            fed.push(conds[i].clone());
            used[i] = true;
        }
        for (i, cond) in conds.iter().enumerate() {
            if !used[i] {
                fed.push(cond.clone());
            }
        }
        *conds = fed;
        Ok(Some(index_cols))
    }
}
