//! SQL parser for SableDB.
//!
//! Grammar work is delegated to the `sqlparser` crate (PostgreSQL
//! dialect); the resulting AST is translated into the engine's internal
//! statement tree. A few utility commands that sit outside the SQL
//! grammar (`SHOW ...`, `CREATE STATIC_CHECKPOINT`, and the compact
//! `CREATE INDEX t(cols)` index DDL) are recognized up front.

mod ast;

pub use ast::{
    BinaryExpr, ColumnDef, ColumnRef, Knob, OrderBy, RhsExpr, SelectStmt, Statement, TableRef,
};

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SqlParser;

use sable_common::{SableError, SableResult};

/// Statement parser.
pub struct Parser;

impl Parser {
    /// Parses one SQL statement.
    pub fn parse(sql: &str) -> SableResult<Statement> {
        if let Some(stmt) = Self::parse_utility(sql)? {
            return Ok(stmt);
        }

        let mut statements = SqlParser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| SableError::Syntax {
                message: e.to_string(),
            })?;
        if statements.len() != 1 {
            return Err(SableError::unsupported(
                "expected exactly one statement per call",
            ));
        }
        Statement::from_sql_ast(statements.remove(0))
    }

    /// Recognizes the utility commands outside the SQL grammar.
    fn parse_utility(sql: &str) -> SableResult<Option<Statement>> {
        let text = sql.trim().trim_end_matches(';').trim();
        let upper = text.to_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();

        match words.as_slice() {
            ["SHOW", "TABLES"] => return Ok(Some(Statement::ShowTables)),
            ["CREATE", "STATIC_CHECKPOINT"] => return Ok(Some(Statement::StaticCheckpoint)),
            ["SHOW", "INDEX" | "INDEXES", "FROM", _] => {
                let table = text.split_whitespace().nth(3).unwrap().to_string();
                return Ok(Some(Statement::ShowIndexes { table }));
            }
            _ => {}
        }

        // Compact index DDL: CREATE INDEX t(c1, c2) / DROP INDEX t(c1, c2).
        // The standard `CREATE INDEX [name] ON t(...)` form goes through
        // the SQL grammar instead.
        if (upper.starts_with("CREATE INDEX") || upper.starts_with("DROP INDEX"))
            && !upper.contains(" ON ")
        {
            let create = upper.starts_with("CREATE");
            let prefix = if create { "CREATE INDEX" } else { "DROP INDEX" };
            let rest = text[prefix.len()..].trim();
            let (table, columns) = parse_index_target(rest)?;
            return Ok(Some(if create {
                Statement::CreateIndex { table, columns }
            } else {
                Statement::DropIndex { table, columns }
            }));
        }

        Ok(None)
    }
}

/// Parses `table(col1, col2, ...)`.
fn parse_index_target(text: &str) -> SableResult<(String, Vec<String>)> {
    let open = text.find('(').ok_or_else(|| SableError::Syntax {
        message: format!("expected 'table(columns)' in '{text}'"),
    })?;
    let close = text.rfind(')').ok_or_else(|| SableError::Syntax {
        message: format!("unclosed column list in '{text}'"),
    })?;
    let table = text[..open].trim();
    if table.is_empty() || table.contains(char::is_whitespace) {
        return Err(SableError::Syntax {
            message: format!("invalid table name in '{text}'"),
        });
    }
    let columns: Vec<String> = text[open + 1..close]
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(SableError::Syntax {
            message: format!("empty column list in '{text}'"),
        });
    }
    Ok((table.to_string(), columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{CompOp, Value};

    #[test]
    fn test_parse_select_with_where() {
        let stmt = Parser::parse("SELECT id, v FROM t WHERE id = 2 AND v > 10;").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!("expected select");
        };
        assert_eq!(sel.tables.len(), 1);
        assert_eq!(sel.tables[0].name, "t");
        assert_eq!(sel.columns.len(), 2);
        assert_eq!(sel.conditions.len(), 2);
        assert_eq!(sel.conditions[0].op, CompOp::Eq);
        assert_eq!(sel.conditions[0].rhs, RhsExpr::Val(Value::Int(2)));
    }

    #[test]
    fn test_parse_select_star_and_order() {
        let stmt = Parser::parse("SELECT * FROM t ORDER BY id DESC").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!("expected select");
        };
        assert!(sel.columns.is_empty());
        let order = sel.order_by.unwrap();
        assert_eq!(order.column.column, "id");
        assert!(order.desc);
    }

    #[test]
    fn test_parse_join_on_kept_separate() {
        let stmt =
            Parser::parse("SELECT a.x, b.y FROM a JOIN b ON a.id = b.id WHERE a.x > 50").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!("expected select");
        };
        assert_eq!(sel.tables.len(), 2);
        assert_eq!(sel.join_conditions.len(), 1);
        assert_eq!(sel.conditions.len(), 1);
        assert!(matches!(sel.join_conditions[0].rhs, RhsExpr::Col(_)));
    }

    #[test]
    fn test_parse_table_alias() {
        let stmt = Parser::parse("SELECT u.id FROM users u WHERE u.id = 1").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!("expected select");
        };
        assert_eq!(sel.tables[0].alias.as_deref(), Some("u"));
    }

    #[test]
    fn test_literal_on_left_is_swapped() {
        let stmt = Parser::parse("SELECT * FROM t WHERE 5 < id").unwrap();
        let Statement::Select(sel) = stmt else {
            panic!("expected select");
        };
        assert_eq!(sel.conditions[0].lhs.column, "id");
        assert_eq!(sel.conditions[0].op, CompOp::Gt);
    }

    #[test]
    fn test_parse_insert_multi_row() {
        let stmt = Parser::parse("INSERT INTO t VALUES (1, 10), (2, -20), (3, 3.5)").unwrap();
        let Statement::Insert { table, rows } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(table, "t");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Int(-20)]);
        assert_eq!(rows[2][1], Value::Float(3.5));
    }

    #[test]
    fn test_parse_update_literal_only() {
        let stmt = Parser::parse("UPDATE t SET v = 7 WHERE id = 2").unwrap();
        let Statement::Update { assignments, .. } = stmt else {
            panic!("expected update");
        };
        assert_eq!(assignments, vec![("v".to_string(), Value::Int(7))]);

        // Arithmetic over the old value is not part of the surface.
        assert!(Parser::parse("UPDATE t SET v = v + 1 WHERE id = 2").is_err());
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = Parser::parse("CREATE TABLE t (id INT, score FLOAT, name CHAR(8))").unwrap();
        let Statement::CreateTable { table, columns } = stmt else {
            panic!("expected create table");
        };
        assert_eq!(table, "t");
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].len, 8);
    }

    #[test]
    fn test_parse_compact_index_ddl() {
        let stmt = Parser::parse("CREATE INDEX t(id, v);").unwrap();
        assert_eq!(
            stmt,
            Statement::CreateIndex {
                table: "t".into(),
                columns: vec!["id".into(), "v".into()],
            }
        );
        let stmt = Parser::parse("DROP INDEX t(id)").unwrap();
        assert_eq!(
            stmt,
            Statement::DropIndex {
                table: "t".into(),
                columns: vec!["id".into()],
            }
        );
    }

    #[test]
    fn test_parse_standard_index_ddl() {
        let stmt = Parser::parse("CREATE INDEX t_id ON t(id)").unwrap();
        assert_eq!(
            stmt,
            Statement::CreateIndex {
                table: "t".into(),
                columns: vec!["id".into()],
            }
        );
    }

    #[test]
    fn test_parse_utility_statements() {
        assert_eq!(Parser::parse("SHOW TABLES;").unwrap(), Statement::ShowTables);
        assert_eq!(
            Parser::parse("SHOW INDEX FROM t").unwrap(),
            Statement::ShowIndexes { table: "t".into() }
        );
        assert_eq!(
            Parser::parse("CREATE STATIC_CHECKPOINT").unwrap(),
            Statement::StaticCheckpoint
        );
        assert_eq!(Parser::parse("BEGIN;").unwrap(), Statement::Begin);
        assert_eq!(Parser::parse("COMMIT;").unwrap(), Statement::Commit);
        assert_eq!(Parser::parse("ROLLBACK;").unwrap(), Statement::Rollback);
    }

    #[test]
    fn test_parse_set_knob() {
        assert_eq!(
            Parser::parse("SET enable_nestloop = false").unwrap(),
            Statement::SetKnob {
                knob: Knob::NestLoop,
                value: false,
            }
        );
        assert_eq!(
            Parser::parse("SET enable_output_file = true").unwrap(),
            Statement::SetKnob {
                knob: Knob::OutputFile,
                value: true,
            }
        );
    }

    #[test]
    fn test_parse_explain() {
        let stmt = Parser::parse("EXPLAIN SELECT * FROM t WHERE id = 1").unwrap();
        assert!(matches!(stmt, Statement::Explain(_)));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            Parser::parse("SELEC id FROM t"),
            Err(SableError::Syntax { .. })
        ));
    }
}
