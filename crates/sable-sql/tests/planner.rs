//! Physical plan selection: index matching and join ordering.

use tempfile::TempDir;

use sable_common::config::{EngineConfig, PlannerKnobs};
use sable_sql::analyzer::{Analyzer, BoundQuery, CondRhs};
use sable_sql::parser::{Parser, Statement};
use sable_sql::plan::{Plan, StatementPlan};
use sable_sql::planner::Planner;
use sable_sql::system::SystemManager;
use sable_sql::value::CompOp;

struct Fixture {
    _dir: TempDir,
    sys: SystemManager,
}

fn open_sys() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("testdb");
    SystemManager::create_db(&path).unwrap();
    let sys = SystemManager::open_db(&path, &EngineConfig::default()).unwrap();
    Fixture { _dir: dir, sys }
}

fn columns(defs: &[(&str, usize)]) -> Vec<sable_sql::parser::ColumnDef> {
    defs.iter()
        .map(|(name, len)| sable_sql::parser::ColumnDef {
            name: name.to_string(),
            col_type: if *len == 4 {
                sable_sql::value::ColType::Int
            } else {
                sable_sql::value::ColType::Char
            },
            len: *len,
        })
        .collect()
}

fn bind_select(sys: &SystemManager, sql: &str) -> BoundQuery {
    let Statement::Select(sel) = Parser::parse(sql).unwrap() else {
        panic!("expected select");
    };
    Analyzer::new(&sys.db).analyze_select(&sel).unwrap()
}

fn plan_select(sys: &SystemManager, sql: &str) -> Plan {
    let query = bind_select(sys, sql);
    let knobs = PlannerKnobs::default();
    let StatementPlan::Select { plan, .. } =
        Planner::new(sys, &knobs).plan_select(&query).unwrap()
    else {
        panic!("expected select plan");
    };
    plan
}

/// Unwraps Projection/Sort/Filter down to the scan or join beneath.
fn strip(plan: &Plan) -> &Plan {
    match plan {
        Plan::Projection { child, .. } | Plan::Sort { child, .. } | Plan::Filter { child, .. } => {
            strip(child)
        }
        other => other,
    }
}

#[test]
fn test_equality_on_indexed_column_uses_index_scan() {
    let mut fx = open_sys();
    fx.sys
        .create_table("t", &columns(&[("id", 4), ("v", 4)]))
        .unwrap();
    fx.sys.create_index("t", &["id".into()]).unwrap();

    let plan = plan_select(&fx.sys, "SELECT v FROM t WHERE id = 2");
    match strip(&plan) {
        Plan::IndexScan { index_cols, .. } => {
            assert_eq!(index_cols, &["id".to_string()]);
        }
        other => panic!("expected IndexScan, got {other:?}"),
    }
}

#[test]
fn test_unindexed_predicate_uses_seq_scan() {
    let mut fx = open_sys();
    fx.sys
        .create_table("t", &columns(&[("id", 4), ("v", 4)]))
        .unwrap();
    fx.sys.create_index("t", &["id".into()]).unwrap();

    let plan = plan_select(&fx.sys, "SELECT v FROM t WHERE v = 2");
    assert!(matches!(strip(&plan), Plan::SeqScan { .. }));
}

#[test]
fn test_prefix_match_reorders_conditions() {
    let mut fx = open_sys();
    fx.sys
        .create_table("r", &columns(&[("a", 4), ("b", 4), ("c", 4)]))
        .unwrap();
    fx.sys
        .create_index("r", &["a".into(), "b".into()])
        .unwrap();

    // WHERE order is scrambled; the matched prefix must lead.
    let plan = plan_select(&fx.sys, "SELECT c FROM r WHERE c = 9 AND b >= 2 AND a = 1");
    match strip(&plan) {
        Plan::IndexScan {
            conds, index_cols, ..
        } => {
            assert_eq!(index_cols, &["a".to_string(), "b".to_string()]);
            assert_eq!(conds[0].lhs.column, "a");
            assert_eq!(conds[0].op, CompOp::Eq);
            assert_eq!(conds[1].lhs.column, "b");
            assert_eq!(conds[1].op, CompOp::Ge);
            assert_eq!(conds[2].lhs.column, "c");
        }
        other => panic!("expected IndexScan, got {other:?}"),
    }
}

#[test]
fn test_longer_prefix_wins() {
    let mut fx = open_sys();
    fx.sys
        .create_table("r", &columns(&[("a", 4), ("b", 4), ("c", 4)]))
        .unwrap();
    fx.sys.create_index("r", &["a".into()]).unwrap();
    fx.sys
        .create_index("r", &["a".into(), "b".into()])
        .unwrap();

    let plan = plan_select(&fx.sys, "SELECT c FROM r WHERE a = 1 AND b = 2");
    match strip(&plan) {
        Plan::IndexScan { index_cols, .. } => {
            assert_eq!(index_cols, &["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected IndexScan, got {other:?}"),
    }
}

#[test]
fn test_index_not_matched_without_leading_column() {
    let mut fx = open_sys();
    fx.sys
        .create_table("r", &columns(&[("a", 4), ("b", 4)]))
        .unwrap();
    fx.sys
        .create_index("r", &["a".into(), "b".into()])
        .unwrap();

    // b alone does not form a prefix of (a, b).
    let plan = plan_select(&fx.sys, "SELECT a FROM r WHERE b = 2");
    assert!(matches!(strip(&plan), Plan::SeqScan { .. }));
}

#[test]
fn test_join_predicates_absorbed_and_normalized() {
    let mut fx = open_sys();
    fx.sys
        .create_table("a", &columns(&[("id", 4), ("x", 4)]))
        .unwrap();
    fx.sys
        .create_table("b", &columns(&[("id", 4), ("y", 4)]))
        .unwrap();

    let plan = plan_select(
        &fx.sys,
        "SELECT a.x FROM a, b WHERE b.id = a.id AND a.x > 50",
    );
    match strip(&plan) {
        Plan::NestedLoopJoin { left, right, conds } => {
            // The single-table predicate sank into a's scan.
            match strip(left) {
                Plan::SeqScan { table, conds } => {
                    assert_eq!(table, "a");
                    assert_eq!(conds.len(), 1);
                    assert_eq!(conds[0].lhs.column, "x");
                }
                other => panic!("expected SeqScan of a, got {other:?}"),
            }
            assert!(matches!(strip(right), Plan::SeqScan { table, .. } if table == "b"));
            // b.id = a.id was normalized so the left side is in the
            // left (accumulated) input.
            assert_eq!(conds.len(), 1);
            assert_eq!(conds[0].lhs.table, "a");
            let CondRhs::Col(rhs) = &conds[0].rhs else {
                panic!("expected column rhs");
            };
            assert_eq!(rhs.table, "b");
        }
        other => panic!("expected NestedLoopJoin, got {other:?}"),
    }
}

#[test]
fn test_order_by_adds_sort_above_join() {
    let mut fx = open_sys();
    fx.sys
        .create_table("t", &columns(&[("id", 4), ("v", 4)]))
        .unwrap();

    let plan = plan_select(&fx.sys, "SELECT * FROM t ORDER BY v DESC");
    let Plan::Projection { child, .. } = &plan else {
        panic!("expected projection root");
    };
    match child.as_ref() {
        Plan::Sort { col, desc, .. } => {
            assert_eq!(col.column, "v");
            assert!(*desc);
        }
        other => panic!("expected Sort, got {other:?}"),
    }
}

#[test]
fn test_float_literal_on_int_index_is_not_matched() {
    let mut fx = open_sys();
    fx.sys
        .create_table("t", &columns(&[("id", 4), ("v", 4)]))
        .unwrap();
    fx.sys.create_index("t", &["id".into()]).unwrap();

    // A FLOAT literal cannot feed INT key construction; the predicate
    // stays a residual filter over a sequential scan.
    let plan = plan_select(&fx.sys, "SELECT v FROM t WHERE id = 2.5");
    assert!(matches!(strip(&plan), Plan::SeqScan { .. }));
}
