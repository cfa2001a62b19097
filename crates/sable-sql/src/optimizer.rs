//! Rule-based optimizer over the logical tree.
//!
//! Three rewrites, applied in order while the tree is built:
//!
//! 1. **Greedy join ordering** - tables sorted by live cardinality
//!    build a left-deep tree; the tail is reordered so each step joins
//!    against a table the accumulated tree is already connected to, and
//!    disconnected tables fall back to a Cartesian join.
//! 2. **Predicate pushdown** - each predicate descends to the deepest
//!    node whose output still covers all tables it references.
//! 3. **Projection pushdown** - a scan feeding a join is narrowed to
//!    the columns the query actually consumes, when that is a strict
//!    subset of the table and covers at least one output column.
//!
//! Column-column predicates are always normalized so their left side
//! belongs to the left (accumulated) join input.

use crate::analyzer::{BoundQuery, Condition, TabCol};
use crate::plan::LogicalNode;
use crate::system::SystemManager;

/// Builds the optimized logical tree for a bound SELECT.
pub struct QueryOptimizer<'a> {
    sys: &'a SystemManager,
}

impl<'a> QueryOptimizer<'a> {
    /// Creates an optimizer over the open database.
    pub fn new(sys: &'a SystemManager) -> Self {
        Self { sys }
    }

    /// Produces the logical plan tree of a query.
    pub fn optimize(&self, query: &BoundQuery) -> LogicalNode {
        let (mut filters, mut join_pool) = partition_conds(query);

        let mut plan = if query.tables.len() == 1 {
            LogicalNode::Scan {
                table: query.tables[0].clone(),
            }
        } else {
            let steps = join_order(self.sys, &query.tables, &mut join_pool);
            let mut iter = steps.into_iter();
            let (first, _) = iter.next().expect("join order of at least one table");
            let mut tree = LogicalNode::Scan { table: first };
            for (table, conds) in iter {
                tree = LogicalNode::Join {
                    left: Box::new(tree),
                    right: Box::new(LogicalNode::Scan { table }),
                    conds,
                };
            }
            tree
        };

        // Anything the join builder could not place joins the filters.
        filters.extend(join_pool);
        plan = self.push_predicates(plan, &mut filters);
        plan = plan.filtered(filters);

        if !query.is_select_all {
            let required = required_columns(query);
            plan = self.push_projections(plan, &required, &query.cols, true);
        }

        LogicalNode::Project {
            cols: query.cols.clone(),
            select_all: query.is_select_all,
            child: Box::new(plan),
        }
    }

    /// Sinks predicates toward the scans that can evaluate them.
    /// Conditions that fit no child stay in `remaining`.
    fn push_predicates(
        &self,
        node: LogicalNode,
        remaining: &mut Vec<Condition>,
    ) -> LogicalNode {
        match node {
            LogicalNode::Join { left, right, conds } => {
                let left_tables = left.output_tables();
                let right_tables = right.output_tables();

                let mut left_conds = Vec::new();
                let mut right_conds = Vec::new();
                remaining.retain(|cond| {
                    let tables = cond.tables();
                    if tables.iter().all(|t| left_tables.iter().any(|l| l == t)) {
                        left_conds.push(cond.clone());
                        false
                    } else if tables.iter().all(|t| right_tables.iter().any(|r| r == t)) {
                        right_conds.push(cond.clone());
                        false
                    } else {
                        true
                    }
                });

                let left = self.push_predicates(*left, &mut left_conds);
                let right = self.push_predicates(*right, &mut right_conds);
                remaining.extend(left_conds);
                remaining.extend(right_conds);

                LogicalNode::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    conds,
                }
            }
            LogicalNode::Scan { table } => {
                let mut applicable = Vec::new();
                remaining.retain(|cond| {
                    if cond.tables().iter().all(|t| *t == table) {
                        applicable.push(cond.clone());
                        false
                    } else {
                        true
                    }
                });
                LogicalNode::Scan { table }.filtered(applicable)
            }
            other => other,
        }
    }

    /// Narrows scans below joins to the columns the query consumes.
    fn push_projections(
        &self,
        node: LogicalNode,
        required: &[TabCol],
        output: &[TabCol],
        is_root: bool,
    ) -> LogicalNode {
        match node {
            LogicalNode::Join { left, right, conds } => {
                let left = self.push_projections(*left, required, output, false);
                let right = self.push_projections(*right, required, output, false);
                LogicalNode::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    conds,
                }
            }
            LogicalNode::Filter { conds, child } => match *child {
                // A filter sits directly on its scan; any projection
                // goes above the pair so the filter sees whole records.
                scan @ LogicalNode::Scan { .. } => {
                    let table = scan.output_tables().remove(0);
                    let node = LogicalNode::Filter {
                        conds,
                        child: Box::new(scan),
                    };
                    self.maybe_project(node, &table, required, output, is_root)
                }
                other => LogicalNode::Filter {
                    conds,
                    child: Box::new(self.push_projections(other, required, output, false)),
                },
            },
            LogicalNode::Scan { table } => {
                let node = LogicalNode::Scan {
                    table: table.clone(),
                };
                self.maybe_project(node, &table, required, output, is_root)
            }
            other => other,
        }
    }

    fn maybe_project(
        &self,
        node: LogicalNode,
        table: &str,
        required: &[TabCol],
        output: &[TabCol],
        is_root: bool,
    ) -> LogicalNode {
        if is_root {
            return node;
        }
        let mut cols: Vec<TabCol> = Vec::new();
        for col in required {
            if col.table == table && !cols.iter().any(|c| c.column == col.column) {
                cols.push(col.clone());
            }
        }
        let total = self
            .sys
            .db
            .get_table(table)
            .map(|t| t.cols.len())
            .unwrap_or(0);
        let covers_output = cols
            .iter()
            .any(|c| output.iter().any(|o| o.table == c.table && o.column == c.column));
        if !cols.is_empty() && cols.len() < total && covers_output {
            LogicalNode::Project {
                cols,
                select_all: false,
                child: Box::new(node),
            }
        } else {
            node
        }
    }
}

/// Splits a query's predicates into per-table filters and the pool of
/// cross-table column-column predicates available for joining.
pub(crate) fn partition_conds(query: &BoundQuery) -> (Vec<Condition>, Vec<Condition>) {
    let mut filters = Vec::new();
    let mut join_pool = Vec::new();
    for cond in query.conds.iter().chain(&query.join_conds) {
        if cond.tables().len() > 1 {
            join_pool.push(cond.clone());
        } else {
            filters.push(cond.clone());
        }
    }
    (filters, join_pool)
}

/// Greedy left-deep join order: tables ascending by cardinality, each
/// step preferring a table connected to the accumulated tree by some
/// predicate in the pool. Matched predicates are removed from the pool
/// and normalized so their left side is in the accumulated tree.
pub(crate) fn join_order(
    sys: &SystemManager,
    tables: &[String],
    pool: &mut Vec<Condition>,
) -> Vec<(String, Vec<Condition>)> {
    let mut sorted: Vec<String> = tables.to_vec();
    sorted.sort_by_key(|t| sys.table_cardinality(t));

    let mut steps = vec![(sorted[0].clone(), Vec::new())];
    let mut current = vec![sorted[0].clone()];

    let mut i = 1;
    while i < sorted.len() {
        let mut conds = extract_join_conds(pool, &current, &sorted[i]);
        if conds.is_empty() {
            // Look ahead for a table the tree is connected to.
            for j in i + 1..sorted.len() {
                let candidate = extract_join_conds(pool, &current, &sorted[j]);
                if !candidate.is_empty() {
                    sorted.swap(i, j);
                    conds = candidate;
                    break;
                }
            }
        }
        steps.push((sorted[i].clone(), conds));
        current.push(sorted[i].clone());
        i += 1;
    }
    steps
}

/// Pulls every pool predicate connecting `current` to `next`, swapping
/// sides where needed so the left side is in `current`.
fn extract_join_conds(
    pool: &mut Vec<Condition>,
    current: &[String],
    next: &str,
) -> Vec<Condition> {
    let mut out = Vec::new();
    pool.retain(|cond| {
        let crate::analyzer::CondRhs::Col(rhs) = &cond.rhs else {
            return true;
        };
        let lhs_in = current.iter().any(|t| *t == cond.lhs.table);
        let rhs_in = current.iter().any(|t| *t == rhs.table);
        if lhs_in && rhs.table == next {
            out.push(cond.clone());
            false
        } else if rhs_in && cond.lhs.table == next {
            let mut cond = cond.clone();
            cond.swap_sides();
            out.push(cond);
            false
        } else {
            true
        }
    });
    out
}

/// Every column the query consumes: the output list plus both sides of
/// every predicate.
fn required_columns(query: &BoundQuery) -> Vec<TabCol> {
    let mut out: Vec<TabCol> = Vec::new();
    let mut push = |col: &TabCol| {
        if !out
            .iter()
            .any(|c| c.table == col.table && c.column == col.column)
        {
            out.push(col.clone());
        }
    };
    for col in &query.cols {
        push(col);
    }
    for cond in query.conds.iter().chain(&query.join_conds) {
        push(&cond.lhs);
        if let crate::analyzer::CondRhs::Col(rhs) = &cond.rhs {
            push(rhs);
        }
    }
    out
}
