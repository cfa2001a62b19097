//! Internal statement tree and its translation from the `sqlparser`
//! AST.
//!
//! The engine only consumes this internal form; everything downstream
//! of the parser is independent of the SQL grammar library.

use sqlparser::ast as sql_ast;

use sable_common::{SableError, SableResult};

use crate::value::{ColType, CompOp, Value};

/// A parsed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions in order.
        columns: Vec<ColumnDef>,
    },
    /// DROP TABLE.
    DropTable {
        /// Table name.
        table: String,
    },
    /// CREATE INDEX over one or more columns.
    CreateIndex {
        /// Indexed table.
        table: String,
        /// Key columns in order.
        columns: Vec<String>,
    },
    /// DROP INDEX over one or more columns.
    DropIndex {
        /// Indexed table.
        table: String,
        /// Key columns in order.
        columns: Vec<String>,
    },
    /// INSERT INTO ... VALUES.
    Insert {
        /// Target table.
        table: String,
        /// Literal rows.
        rows: Vec<Vec<Value>>,
    },
    /// DELETE FROM.
    Delete {
        /// Target table.
        table: String,
        /// WHERE conjuncts.
        conditions: Vec<BinaryExpr>,
    },
    /// UPDATE ... SET.
    Update {
        /// Target table.
        table: String,
        /// `column = literal` assignments.
        assignments: Vec<(String, Value)>,
        /// WHERE conjuncts.
        conditions: Vec<BinaryExpr>,
    },
    /// SELECT.
    Select(SelectStmt),
    /// EXPLAIN of a SELECT.
    Explain(SelectStmt),
    /// BEGIN.
    Begin,
    /// COMMIT.
    Commit,
    /// ROLLBACK.
    Rollback,
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
    /// SET knob = bool.
    SetKnob {
        /// Which knob.
        knob: Knob,
        /// New value.
        value: bool,
    },
    /// CREATE STATIC_CHECKPOINT.
    StaticCheckpoint,
}

/// Session/planner knobs settable via `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Knob {
    /// `enable_nestloop`
    NestLoop,
    /// `enable_sortmerge`
    SortMerge,
    /// `enable_output_file`
    OutputFile,
}

/// One column of a CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub col_type: ColType,
    /// Field width in bytes.
    pub len: usize,
}

/// A table in a FROM clause, with its optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Table name.
    pub name: String,
    /// Alias, if given.
    pub alias: Option<String>,
}

/// A possibly qualified column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// Table name or alias prefix, if given.
    pub table: Option<String>,
    /// Column name.
    pub column: String,
}

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum RhsExpr {
    /// Another column.
    Col(ColumnRef),
    /// A literal.
    Val(Value),
}

/// One conjunct of a WHERE or ON clause: `col op {col | literal}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    /// Left column.
    pub lhs: ColumnRef,
    /// Comparison operator.
    pub op: CompOp,
    /// Right operand.
    pub rhs: RhsExpr,
}

/// ORDER BY clause: one column, ascending or descending.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Sort column.
    pub column: ColumnRef,
    /// True for DESC.
    pub desc: bool,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStmt {
    /// Selected columns; empty means `SELECT *`.
    pub columns: Vec<ColumnRef>,
    /// FROM tables in order, including JOINed ones.
    pub tables: Vec<TableRef>,
    /// Conjuncts from JOIN ON clauses, kept apart from WHERE.
    pub join_conditions: Vec<BinaryExpr>,
    /// Conjuncts from the WHERE clause.
    pub conditions: Vec<BinaryExpr>,
    /// ORDER BY, if present.
    pub order_by: Option<OrderBy>,
}

// =============================================================================
// Translation from the sqlparser AST
// =============================================================================

impl Statement {
    /// Converts from sqlparser's statement.
    pub fn from_sql_ast(stmt: sql_ast::Statement) -> SableResult<Self> {
        match stmt {
            sql_ast::Statement::Query(query) => {
                Ok(Statement::Select(SelectStmt::from_sql_ast(*query)?))
            }
            sql_ast::Statement::Insert {
                table_name, source, ..
            } => from_insert(table_name, source),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => from_update(table, assignments, selection),
            sql_ast::Statement::Delete {
                from, selection, ..
            } => from_delete(from, selection),
            sql_ast::Statement::CreateTable { name, columns, .. } => Ok(Statement::CreateTable {
                table: object_name(&name),
                columns: columns
                    .into_iter()
                    .map(column_def)
                    .collect::<SableResult<_>>()?,
            }),
            sql_ast::Statement::Drop {
                object_type: sql_ast::ObjectType::Table,
                names,
                ..
            } => {
                if names.len() != 1 {
                    return Err(SableError::unsupported("DROP of multiple tables"));
                }
                Ok(Statement::DropTable {
                    table: object_name(&names[0]),
                })
            }
            sql_ast::Statement::CreateIndex {
                table_name,
                columns,
                ..
            } => {
                let columns = columns
                    .into_iter()
                    .map(|c| match c.expr {
                        sql_ast::Expr::Identifier(id) => Ok(id.value),
                        other => Err(SableError::unsupported(format!(
                            "index expression: {other}"
                        ))),
                    })
                    .collect::<SableResult<_>>()?;
                Ok(Statement::CreateIndex {
                    table: object_name(&table_name),
                    columns,
                })
            }
            sql_ast::Statement::StartTransaction { .. } => Ok(Statement::Begin),
            sql_ast::Statement::Commit { .. } => Ok(Statement::Commit),
            sql_ast::Statement::Rollback { .. } => Ok(Statement::Rollback),
            sql_ast::Statement::Explain { statement, .. } => match *statement {
                sql_ast::Statement::Query(query) => {
                    Ok(Statement::Explain(SelectStmt::from_sql_ast(*query)?))
                }
                other => Err(SableError::unsupported(format!(
                    "EXPLAIN of non-SELECT: {other}"
                ))),
            },
            sql_ast::Statement::ExplainTable { table_name, .. } => Ok(Statement::DescTable {
                table: object_name(&table_name),
            }),
            sql_ast::Statement::SetVariable {
                variable, value, ..
            } => from_set_variable(variable, value),
            other => Err(SableError::unsupported(format!("statement: {other}"))),
        }
    }
}

impl SelectStmt {
    /// Converts from sqlparser's query.
    pub fn from_sql_ast(query: sql_ast::Query) -> SableResult<Self> {
        if query.with.is_some() {
            return Err(SableError::unsupported("WITH clause"));
        }
        if query.limit.is_some() || query.offset.is_some() {
            return Err(SableError::unsupported("LIMIT/OFFSET"));
        }

        let select = match *query.body {
            sql_ast::SetExpr::Select(select) => select,
            other => return Err(SableError::unsupported(format!("set expression: {other}"))),
        };
        if select.distinct.is_some() {
            return Err(SableError::unsupported("DISTINCT"));
        }
        if select.having.is_some() {
            return Err(SableError::unsupported("HAVING"));
        }
        match &select.group_by {
            sql_ast::GroupByExpr::Expressions(exprs) if exprs.is_empty() => {}
            _ => return Err(SableError::unsupported("GROUP BY")),
        }

        let mut columns = Vec::new();
        let mut select_all = false;
        for item in select.projection {
            match item {
                sql_ast::SelectItem::Wildcard(_) => select_all = true,
                sql_ast::SelectItem::UnnamedExpr(expr) => columns.push(column_ref(expr)?),
                other => {
                    return Err(SableError::unsupported(format!("select item: {other}")));
                }
            }
        }
        if select_all && !columns.is_empty() {
            return Err(SableError::unsupported("mixing * with explicit columns"));
        }

        let mut tables = Vec::new();
        let mut join_conditions = Vec::new();
        for twj in select.from {
            tables.push(table_ref(twj.relation)?);
            for join in twj.joins {
                tables.push(table_ref(join.relation)?);
                match join.join_operator {
                    sql_ast::JoinOperator::Inner(constraint) => match constraint {
                        sql_ast::JoinConstraint::On(expr) => {
                            collect_conjuncts(expr, &mut join_conditions)?;
                        }
                        sql_ast::JoinConstraint::None => {}
                        other => {
                            return Err(SableError::unsupported(format!(
                                "join constraint: {other:?}"
                            )));
                        }
                    },
                    sql_ast::JoinOperator::CrossJoin => {}
                    other => {
                        return Err(SableError::unsupported(format!("join type: {other:?}")));
                    }
                }
            }
        }

        let mut conditions = Vec::new();
        if let Some(expr) = select.selection {
            collect_conjuncts(expr, &mut conditions)?;
        }

        let order_by = match query.order_by.len() {
            0 => None,
            1 => {
                let item = query.order_by.into_iter().next().unwrap();
                Some(OrderBy {
                    column: column_ref(item.expr)?,
                    desc: item.asc == Some(false),
                })
            }
            _ => return Err(SableError::unsupported("ORDER BY over multiple columns")),
        };

        Ok(SelectStmt {
            columns,
            tables,
            join_conditions,
            conditions,
            order_by,
        })
    }
}

fn from_insert(
    table_name: sql_ast::ObjectName,
    source: Option<Box<sql_ast::Query>>,
) -> SableResult<Statement> {
    let source = source.ok_or_else(|| SableError::unsupported("INSERT without VALUES"))?;
    let values = match *source.body {
        sql_ast::SetExpr::Values(values) => values,
        other => return Err(SableError::unsupported(format!("INSERT source: {other}"))),
    };
    let rows = values
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(literal).collect::<SableResult<_>>())
        .collect::<SableResult<_>>()?;
    Ok(Statement::Insert {
        table: object_name(&table_name),
        rows,
    })
}

fn from_update(
    table: sql_ast::TableWithJoins,
    assignments: Vec<sql_ast::Assignment>,
    selection: Option<sql_ast::Expr>,
) -> SableResult<Statement> {
    if !table.joins.is_empty() {
        return Err(SableError::unsupported("UPDATE over a join"));
    }
    let table = table_ref(table.relation)?;
    let assignments = assignments
        .into_iter()
        .map(|a| {
            if a.id.len() != 1 {
                return Err(SableError::unsupported("qualified SET column"));
            }
            // Only `column = literal` is accepted; arithmetic over the
            // old value is not part of the surface.
            Ok((a.id[0].value.clone(), literal(a.value)?))
        })
        .collect::<SableResult<_>>()?;
    let mut conditions = Vec::new();
    if let Some(expr) = selection {
        collect_conjuncts(expr, &mut conditions)?;
    }
    Ok(Statement::Update {
        table: table.name,
        assignments,
        conditions,
    })
}

fn from_delete(
    from: Vec<sql_ast::TableWithJoins>,
    selection: Option<sql_ast::Expr>,
) -> SableResult<Statement> {
    if from.len() != 1 || !from[0].joins.is_empty() {
        return Err(SableError::unsupported("DELETE over multiple tables"));
    }
    let table = table_ref(from.into_iter().next().unwrap().relation)?;
    let mut conditions = Vec::new();
    if let Some(expr) = selection {
        collect_conjuncts(expr, &mut conditions)?;
    }
    Ok(Statement::Delete {
        table: table.name,
        conditions,
    })
}

fn from_set_variable(
    variable: sql_ast::ObjectName,
    value: Vec<sql_ast::Expr>,
) -> SableResult<Statement> {
    let knob = match variable.to_string().to_lowercase().as_str() {
        "enable_nestloop" => Knob::NestLoop,
        "enable_sortmerge" => Knob::SortMerge,
        "enable_output_file" => Knob::OutputFile,
        other => return Err(SableError::unsupported(format!("SET variable: {other}"))),
    };
    let value = match value.first() {
        Some(sql_ast::Expr::Value(sql_ast::Value::Boolean(b))) => *b,
        Some(sql_ast::Expr::Identifier(id)) => match id.value.to_lowercase().as_str() {
            "true" | "on" => true,
            "false" | "off" => false,
            other => {
                return Err(SableError::unsupported(format!("SET value: {other}")));
            }
        },
        other => {
            return Err(SableError::unsupported(format!("SET value: {other:?}")));
        }
    };
    Ok(Statement::SetKnob { knob, value })
}

// =============================================================================
// Leaf conversions
// =============================================================================

fn object_name(name: &sql_ast::ObjectName) -> String {
    name.0
        .iter()
        .map(|id| id.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn table_ref(factor: sql_ast::TableFactor) -> SableResult<TableRef> {
    match factor {
        sql_ast::TableFactor::Table { name, alias, .. } => Ok(TableRef {
            name: object_name(&name),
            alias: alias.map(|a| a.name.value),
        }),
        other => Err(SableError::unsupported(format!("table factor: {other}"))),
    }
}

fn column_ref(expr: sql_ast::Expr) -> SableResult<ColumnRef> {
    match expr {
        sql_ast::Expr::Identifier(id) => Ok(ColumnRef {
            table: None,
            column: id.value,
        }),
        sql_ast::Expr::CompoundIdentifier(ids) if ids.len() == 2 => Ok(ColumnRef {
            table: Some(ids[0].value.clone()),
            column: ids[1].value.clone(),
        }),
        other => Err(SableError::unsupported(format!("column expression: {other}"))),
    }
}

fn literal(expr: sql_ast::Expr) -> SableResult<Value> {
    match expr {
        sql_ast::Expr::Value(sql_ast::Value::Number(text, _)) => parse_number(&text),
        sql_ast::Expr::Value(sql_ast::Value::SingleQuotedString(s)) => Ok(Value::Str(s)),
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Minus,
            expr,
        } => match literal(*expr)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Str(_) => Err(SableError::unsupported("negated string literal")),
        },
        sql_ast::Expr::Nested(expr) => literal(*expr),
        other => Err(SableError::unsupported(format!("literal: {other}"))),
    }
}

fn parse_number(text: &str) -> SableResult<Value> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(v) = text.parse::<i32>() {
            return Ok(Value::Int(v));
        }
    }
    text.parse::<f32>().map(Value::Float).map_err(|_| {
        SableError::Syntax {
            message: format!("invalid numeric literal '{text}'"),
        }
    })
}

/// Splits a conjunction into `col op operand` leaves. A literal on the
/// left is swapped to the right with the operator mirrored.
fn collect_conjuncts(expr: sql_ast::Expr, out: &mut Vec<BinaryExpr>) -> SableResult<()> {
    match expr {
        sql_ast::Expr::BinaryOp {
            left,
            op: sql_ast::BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(*left, out)?;
            collect_conjuncts(*right, out)?;
            Ok(())
        }
        sql_ast::Expr::Nested(inner) => collect_conjuncts(*inner, out),
        sql_ast::Expr::BinaryOp { left, op, right } => {
            let op = comp_op(&op)?;
            let (lhs, rhs, op) = match (operand(*left)?, operand(*right)?) {
                (Operand::Col(l), Operand::Col(r)) => (l, RhsExpr::Col(r), op),
                (Operand::Col(l), Operand::Lit(v)) => (l, RhsExpr::Val(v), op),
                (Operand::Lit(v), Operand::Col(r)) => (r, RhsExpr::Val(v), op.swapped()),
                (Operand::Lit(_), Operand::Lit(_)) => {
                    return Err(SableError::unsupported("literal-only comparison"));
                }
            };
            out.push(BinaryExpr { lhs, op, rhs });
            Ok(())
        }
        other => Err(SableError::unsupported(format!("predicate: {other}"))),
    }
}

enum Operand {
    Col(ColumnRef),
    Lit(Value),
}

fn operand(expr: sql_ast::Expr) -> SableResult<Operand> {
    match expr {
        sql_ast::Expr::Identifier(_) | sql_ast::Expr::CompoundIdentifier(_) => {
            Ok(Operand::Col(column_ref(expr)?))
        }
        sql_ast::Expr::Nested(inner) => operand(*inner),
        other => Ok(Operand::Lit(literal(other)?)),
    }
}

fn comp_op(op: &sql_ast::BinaryOperator) -> SableResult<CompOp> {
    match op {
        sql_ast::BinaryOperator::Eq => Ok(CompOp::Eq),
        sql_ast::BinaryOperator::NotEq => Ok(CompOp::Ne),
        sql_ast::BinaryOperator::Lt => Ok(CompOp::Lt),
        sql_ast::BinaryOperator::Gt => Ok(CompOp::Gt),
        sql_ast::BinaryOperator::LtEq => Ok(CompOp::Le),
        sql_ast::BinaryOperator::GtEq => Ok(CompOp::Ge),
        other => Err(SableError::unsupported(format!("operator: {other}"))),
    }
}

fn column_def(def: sql_ast::ColumnDef) -> SableResult<ColumnDef> {
    let (col_type, len) = match &def.data_type {
        sql_ast::DataType::Int(_) | sql_ast::DataType::Integer(_) => (ColType::Int, 4),
        sql_ast::DataType::Float(_) | sql_ast::DataType::Real => (ColType::Float, 4),
        sql_ast::DataType::Char(len) | sql_ast::DataType::Character(len) => {
            let n = match len {
                Some(sql_ast::CharacterLength::IntegerLength { length, .. }) => *length as usize,
                _ => {
                    return Err(SableError::unsupported("CHAR without a length"));
                }
            };
            (ColType::Char, n)
        }
        other => return Err(SableError::unsupported(format!("column type: {other}"))),
    };
    Ok(ColumnDef {
        name: def.name.value,
        col_type,
        len,
    })
}
