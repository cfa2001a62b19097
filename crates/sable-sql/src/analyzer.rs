//! Semantic analysis: turns a parsed statement into a bound query.
//!
//! Binding resolves table aliases and bare column names against the
//! catalog, verifies every referenced object exists, checks that both
//! sides of each predicate are comparable (INT widens to FLOAT), and
//! encodes literal operands into their raw field form. WHERE conjuncts
//! and JOIN ON conjuncts are kept separate on the bound query.

use std::collections::HashMap;
use std::fmt;

use sable_common::{SableError, SableResult};

use crate::catalog::{ColMeta, DbMeta};
use crate::parser::{BinaryExpr, ColumnRef, RhsExpr, SelectStmt, TableRef};
use crate::value::{ColType, CompOp, Value};

/// A bound column: real table, column name, and the display prefix the
/// query used for it (the alias, when one was given).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabCol {
    /// Real table name; never empty after binding.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Alias prefix used in the query, or empty.
    pub alias: String,
}

impl TabCol {
    /// Creates a bound column without an alias.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            alias: String::new(),
        }
    }

    /// The prefix shown for this column: the alias if present, else the
    /// table name.
    pub fn display_prefix(&self) -> &str {
        if self.alias.is_empty() {
            &self.table
        } else {
            &self.alias
        }
    }
}

impl fmt::Display for TabCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.display_prefix(), self.column)
    }
}

/// Right-hand side of a bound condition.
#[derive(Debug, Clone, PartialEq)]
pub enum CondRhs {
    /// Another column.
    Col(TabCol),
    /// A literal with its raw field encoding.
    Val {
        /// The (possibly widened) literal.
        value: Value,
        /// Raw encoding sized to the left column's width.
        raw: Vec<u8>,
    },
}

/// A bound predicate: `lhs op rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Left column.
    pub lhs: TabCol,
    /// Comparison operator.
    pub op: CompOp,
    /// Right operand.
    pub rhs: CondRhs,
}

impl Condition {
    /// True if both sides are columns.
    pub fn is_col_col(&self) -> bool {
        matches!(self.rhs, CondRhs::Col(_))
    }

    /// The tables this condition references.
    pub fn tables(&self) -> Vec<&str> {
        let mut out = vec![self.lhs.table.as_str()];
        if let CondRhs::Col(rhs) = &self.rhs {
            if rhs.table != self.lhs.table {
                out.push(rhs.table.as_str());
            }
        }
        out
    }

    /// Swaps the two sides, mirroring the operator. Only meaningful for
    /// column-column conditions.
    pub fn swap_sides(&mut self) {
        if let CondRhs::Col(rhs) = &mut self.rhs {
            std::mem::swap(&mut self.lhs, rhs);
            self.op = self.op.swapped();
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.lhs, self.op)?;
        match &self.rhs {
            CondRhs::Col(col) => write!(f, "{col}"),
            CondRhs::Val { value, .. } => write!(f, "{value}"),
        }
    }
}

/// One `SET column = value` clause of an UPDATE, with the value already
/// coerced to the column type.
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    /// Target column.
    pub column: String,
    /// Coerced literal.
    pub value: Value,
}

/// A statement after name resolution and type checking.
#[derive(Debug, Clone, Default)]
pub struct BoundQuery {
    /// Referenced tables in FROM order.
    pub tables: Vec<String>,
    /// Output columns (expanded for `SELECT *`).
    pub cols: Vec<TabCol>,
    /// WHERE conjuncts.
    pub conds: Vec<Condition>,
    /// JOIN ON conjuncts, never conflated with WHERE.
    pub join_conds: Vec<Condition>,
    /// UPDATE set clauses.
    pub set_clauses: Vec<SetClause>,
    /// INSERT rows, coerced per column.
    pub rows: Vec<Vec<Value>>,
    /// Alias to real table name.
    pub alias_to_table: HashMap<String, String>,
    /// True for `SELECT *`.
    pub is_select_all: bool,
    /// ORDER BY column and descending flag.
    pub order_by: Option<(TabCol, bool)>,
}

/// Name resolution and type checking against one catalog snapshot.
pub struct Analyzer<'a> {
    db: &'a DbMeta,
}

impl<'a> Analyzer<'a> {
    /// Creates an analyzer over the catalog.
    pub fn new(db: &'a DbMeta) -> Self {
        Self { db }
    }

    /// Binds a SELECT (also used for the EXPLAIN inner statement).
    pub fn analyze_select(&self, stmt: &SelectStmt) -> SableResult<BoundQuery> {
        let mut query = BoundQuery::default();

        for table in &stmt.tables {
            if !self.db.is_table(&table.name) {
                return Err(SableError::TableNotFound {
                    table: table.name.clone(),
                });
            }
            if query.tables.contains(&table.name) {
                return Err(SableError::unsupported(format!(
                    "table '{}' listed more than once",
                    table.name
                )));
            }
            query.tables.push(table.name.clone());
        }

        let (alias_to_table, table_to_alias) = alias_maps(&stmt.tables);
        query.alias_to_table = alias_to_table;

        let all_cols = self.all_cols(&query.tables)?;

        if stmt.columns.is_empty() {
            query.is_select_all = true;
            for col in &all_cols {
                query.cols.push(TabCol {
                    table: col.table.clone(),
                    column: col.name.clone(),
                    alias: table_to_alias.get(&col.table).cloned().unwrap_or_default(),
                });
            }
        } else {
            for col in &stmt.columns {
                query
                    .cols
                    .push(self.bind_column(col, &query.alias_to_table, &table_to_alias, &all_cols)?);
            }
        }

        query.conds = self.bind_conditions(
            &stmt.conditions,
            &query.alias_to_table,
            &table_to_alias,
            &all_cols,
        )?;
        query.join_conds = self.bind_conditions(
            &stmt.join_conditions,
            &query.alias_to_table,
            &table_to_alias,
            &all_cols,
        )?;

        if let Some(order) = &stmt.order_by {
            let col =
                self.bind_column(&order.column, &query.alias_to_table, &table_to_alias, &all_cols)?;
            query.order_by = Some((col, order.desc));
        }

        Ok(query)
    }

    /// Binds an UPDATE's set clauses and predicates.
    pub fn analyze_update(
        &self,
        table: &str,
        assignments: &[(String, Value)],
        conditions: &[BinaryExpr],
    ) -> SableResult<BoundQuery> {
        let tab = self.db.get_table(table)?;
        let mut query = self.analyze_dml_table(table, conditions)?;

        for (column, value) in assignments {
            let col = tab.get_col(column)?;
            // Widening an INT literal into a FLOAT column is the only
            // permitted conversion.
            let value = value.coerce_to(col.col_type)?;
            query.set_clauses.push(SetClause {
                column: column.clone(),
                value,
            });
        }
        Ok(query)
    }

    /// Binds a DELETE's predicates.
    pub fn analyze_delete(&self, table: &str, conditions: &[BinaryExpr]) -> SableResult<BoundQuery> {
        self.analyze_dml_table(table, conditions)
    }

    /// Binds INSERT rows, coercing each literal to its column type.
    pub fn analyze_insert(&self, table: &str, rows: &[Vec<Value>]) -> SableResult<BoundQuery> {
        let tab = self.db.get_table(table)?;
        let mut query = BoundQuery {
            tables: vec![table.to_string()],
            ..Default::default()
        };
        for row in rows {
            if row.len() != tab.cols.len() {
                return Err(SableError::InvalidValueCount {
                    table: table.to_string(),
                    expected: tab.cols.len(),
                    got: row.len(),
                });
            }
            let coerced = row
                .iter()
                .zip(&tab.cols)
                .map(|(value, col)| value.coerce_to(col.col_type))
                .collect::<SableResult<Vec<_>>>()?;
            query.rows.push(coerced);
        }
        Ok(query)
    }

    fn analyze_dml_table(
        &self,
        table: &str,
        conditions: &[BinaryExpr],
    ) -> SableResult<BoundQuery> {
        if !self.db.is_table(table) {
            return Err(SableError::TableNotFound {
                table: table.to_string(),
            });
        }
        let tables = vec![table.to_string()];
        let all_cols = self.all_cols(&tables)?;
        let empty = HashMap::new();
        let conds = self.bind_conditions(conditions, &empty, &empty, &all_cols)?;
        Ok(BoundQuery {
            tables,
            conds,
            ..Default::default()
        })
    }

    /// Collects the columns of every listed table, in order.
    fn all_cols(&self, tables: &[String]) -> SableResult<Vec<ColMeta>> {
        let mut all = Vec::new();
        for table in tables {
            all.extend(self.db.get_table(table)?.cols.iter().cloned());
        }
        Ok(all)
    }

    /// Resolves a column reference to a real `(table, column)` pair,
    /// preserving the alias for display.
    fn bind_column(
        &self,
        col: &ColumnRef,
        alias_to_table: &HashMap<String, String>,
        table_to_alias: &HashMap<String, String>,
        all_cols: &[ColMeta],
    ) -> SableResult<TabCol> {
        match &col.table {
            Some(prefix) => {
                let (table, alias) = match alias_to_table.get(prefix) {
                    Some(real) => (real.clone(), prefix.clone()),
                    None => (
                        prefix.clone(),
                        table_to_alias.get(prefix).cloned().unwrap_or_default(),
                    ),
                };
                if !all_cols
                    .iter()
                    .any(|c| c.table == table && c.name == col.column)
                {
                    return Err(SableError::ColumnNotFound {
                        column: col.column.clone(),
                    });
                }
                Ok(TabCol {
                    table,
                    column: col.column.clone(),
                    alias,
                })
            }
            None => {
                let mut table = None;
                for meta in all_cols {
                    if meta.name == col.column {
                        if table.is_some() {
                            return Err(SableError::AmbiguousColumn {
                                column: col.column.clone(),
                            });
                        }
                        table = Some(meta.table.clone());
                    }
                }
                let table = table.ok_or_else(|| SableError::ColumnNotFound {
                    column: col.column.clone(),
                })?;
                let alias = table_to_alias.get(&table).cloned().unwrap_or_default();
                Ok(TabCol {
                    table,
                    column: col.column.clone(),
                    alias,
                })
            }
        }
    }

    /// Binds a conjunct list, verifying both sides are comparable and
    /// encoding literal operands.
    fn bind_conditions(
        &self,
        exprs: &[BinaryExpr],
        alias_to_table: &HashMap<String, String>,
        table_to_alias: &HashMap<String, String>,
        all_cols: &[ColMeta],
    ) -> SableResult<Vec<Condition>> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let lhs = self.bind_column(&expr.lhs, alias_to_table, table_to_alias, all_cols)?;
            let lhs_meta = self.db.get_table(&lhs.table)?.get_col(&lhs.column)?;

            let rhs = match &expr.rhs {
                RhsExpr::Col(col) => {
                    let rhs = self.bind_column(col, alias_to_table, table_to_alias, all_cols)?;
                    let rhs_meta = self.db.get_table(&rhs.table)?.get_col(&rhs.column)?;
                    check_comparable(lhs_meta.col_type, rhs_meta.col_type)?;
                    CondRhs::Col(rhs)
                }
                RhsExpr::Val(value) => {
                    check_comparable(lhs_meta.col_type, value.col_type())?;
                    // Widen an INT literal compared against a FLOAT
                    // column; a FLOAT literal against an INT column
                    // stays FLOAT and compares numerically at runtime.
                    let value = if lhs_meta.col_type == ColType::Float
                        && value.col_type() == ColType::Int
                    {
                        value.coerce_to(ColType::Float)?
                    } else {
                        value.clone()
                    };
                    let raw_len = match value.col_type() {
                        ColType::Char => lhs_meta.len,
                        _ => 4,
                    };
                    let raw = value.encode(value.col_type(), raw_len)?;
                    CondRhs::Val { value, raw }
                }
            };
            out.push(Condition {
                lhs,
                op: expr.op,
                rhs,
            });
        }
        Ok(out)
    }
}

/// Builds the alias maps of a FROM list.
fn alias_maps(tables: &[TableRef]) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut alias_to_table = HashMap::new();
    let mut table_to_alias = HashMap::new();
    for table in tables {
        if let Some(alias) = &table.alias {
            alias_to_table.insert(alias.clone(), table.name.clone());
            table_to_alias.insert(table.name.clone(), alias.clone());
        }
    }
    (alias_to_table, table_to_alias)
}

fn check_comparable(lhs: ColType, rhs: ColType) -> SableResult<()> {
    if lhs == rhs || (lhs.is_numeric() && rhs.is_numeric()) {
        Ok(())
    } else {
        Err(SableError::incompatible(lhs.to_string(), rhs.to_string()))
    }
}
