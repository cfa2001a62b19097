//! Physical plans: the operator tree the executor actually runs, and
//! the statement-level plan that routes DDL, DML, and utilities.

use crate::analyzer::{Condition, SetClause, TabCol};
use crate::parser::{ColumnDef, Knob};
use crate::value::Value;

use super::LogicalNode;

/// A physical query plan node.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Full-table scan with pushed-down predicates.
    SeqScan {
        /// Scanned table.
        table: String,
        /// Predicates tested against each record.
        conds: Vec<Condition>,
    },
    /// Index-driven scan.
    IndexScan {
        /// Scanned table.
        table: String,
        /// Predicates, reordered so the matched index prefix leads;
        /// all of them are also re-checked per fetched record.
        conds: Vec<Condition>,
        /// Key columns of the chosen index, in index order.
        index_cols: Vec<String>,
    },
    /// Nested-loop join.
    NestedLoopJoin {
        /// Outer input.
        left: Box<Plan>,
        /// Inner input, rewound per outer row.
        right: Box<Plan>,
        /// Join predicates; LHS columns come from the left input.
        conds: Vec<Condition>,
    },
    /// Sort-merge join over the equality predicates.
    SortMergeJoin {
        /// Left input.
        left: Box<Plan>,
        /// Right input.
        right: Box<Plan>,
        /// Join predicates; at least one equality.
        conds: Vec<Condition>,
    },
    /// Residual predicate application.
    Filter {
        /// Input plan.
        child: Box<Plan>,
        /// Predicates to apply.
        conds: Vec<Condition>,
    },
    /// Column projection.
    Projection {
        /// Input plan.
        child: Box<Plan>,
        /// Output columns in requested order.
        cols: Vec<TabCol>,
    },
    /// Materializing sort.
    Sort {
        /// Input plan.
        child: Box<Plan>,
        /// Sort column.
        col: TabCol,
        /// True for descending order.
        desc: bool,
    },
}

/// Top-level plan for one statement.
#[derive(Debug, Clone)]
pub enum StatementPlan {
    /// CREATE TABLE.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions.
        columns: Vec<ColumnDef>,
    },
    /// DROP TABLE.
    DropTable {
        /// Table name.
        table: String,
    },
    /// CREATE INDEX.
    CreateIndex {
        /// Indexed table.
        table: String,
        /// Key columns in order.
        columns: Vec<String>,
    },
    /// DROP INDEX.
    DropIndex {
        /// Indexed table.
        table: String,
        /// Key columns in order.
        columns: Vec<String>,
    },
    /// INSERT.
    Insert {
        /// Target table.
        table: String,
        /// Coerced rows.
        rows: Vec<Vec<Value>>,
    },
    /// UPDATE driven by a scan of the target table.
    Update {
        /// Target table.
        table: String,
        /// Scan producing the affected rids.
        scan: Plan,
        /// Set clauses.
        sets: Vec<SetClause>,
    },
    /// DELETE driven by a scan of the target table.
    Delete {
        /// Target table.
        table: String,
        /// Scan producing the affected rids.
        scan: Plan,
    },
    /// SELECT.
    Select {
        /// Root of the physical operator tree.
        plan: Plan,
        /// Output columns, for the result header.
        cols: Vec<TabCol>,
    },
    /// EXPLAIN: the optimized logical tree to print.
    Explain {
        /// The tree.
        tree: LogicalNode,
    },
    /// SHOW TABLES.
    ShowTables,
    /// SHOW INDEX FROM table.
    ShowIndexes {
        /// Table name.
        table: String,
    },
    /// DESC table.
    DescTable {
        /// Table name.
        table: String,
    },
    /// BEGIN.
    Begin,
    /// COMMIT.
    Commit,
    /// ROLLBACK.
    Rollback,
    /// SET knob = value.
    SetKnob {
        /// Which knob.
        knob: Knob,
        /// New value.
        value: bool,
    },
    /// CREATE STATIC_CHECKPOINT.
    StaticCheckpoint,
}
