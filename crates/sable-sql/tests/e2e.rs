//! End-to-end statement tests over a real on-disk database.

use tempfile::TempDir;

use sable_common::config::EngineConfig;
use sable_common::SableError;
use sable_sql::{Database, Session};

struct Fixture {
    _dir: TempDir,
    db: Database,
}

fn open_db() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("testdb");
    Database::create(&path).unwrap();
    let db = Database::open(&path, EngineConfig::default()).unwrap();
    Fixture { _dir: dir, db }
}

fn run(session: &mut Session<'_>, sql: &str) -> String {
    match session.execute(sql) {
        Ok(out) => out,
        Err(err) => panic!("statement failed: {sql}: {err}"),
    }
}

/// Extracts the data cells of a framed result, skipping the header.
fn rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter(|l| l.starts_with('|'))
        .skip(1)
        .map(|l| {
            l.split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

fn seed_t(session: &mut Session<'_>) {
    run(session, "CREATE TABLE t (id INT, v INT);");
    run(session, "INSERT INTO t VALUES (1, 10), (2, 20), (3, 30);");
}

#[test]
fn test_point_select() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    let out = run(&mut s, "SELECT * FROM t WHERE id = 2;");
    assert_eq!(rows(&out), vec![vec!["2", "20"]]);
    assert!(out.contains("Total record(s): 1"));
}

#[test]
fn test_index_range_select_in_order() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);
    run(&mut s, "CREATE INDEX t(id);");

    let out = run(&mut s, "SELECT v FROM t WHERE id >= 2;");
    assert_eq!(rows(&out), vec![vec!["20"], vec!["30"]]);
}

#[test]
fn test_join_matches_only() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE a (id INT, x INT);");
    run(&mut s, "CREATE TABLE b (id INT, y INT);");
    run(&mut s, "INSERT INTO a VALUES (1, 100), (2, 200);");
    run(&mut s, "INSERT INTO b VALUES (1, 7), (3, 9);");

    let out = run(&mut s, "SELECT a.x, b.y FROM a JOIN b ON a.id = b.id;");
    assert_eq!(rows(&out), vec![vec!["100", "7"]]);
}

#[test]
fn test_explain_pushdown_tree() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE a (id INT, x INT);");
    run(&mut s, "CREATE TABLE b (id INT, y INT);");
    run(&mut s, "INSERT INTO a VALUES (1, 100), (2, 200);");
    run(&mut s, "INSERT INTO b VALUES (1, 7), (3, 9);");

    let out = run(
        &mut s,
        "EXPLAIN SELECT a.x FROM a, b WHERE a.id = b.id AND a.x > 50;",
    );
    assert_eq!(
        out,
        "Project(columns=[a.x])\n\
         \tJoin(tables=[a,b],condition=[a.id=b.id])\n\
         \t\tFilter(condition=[a.x>50])\n\
         \t\t\tScan(table=a)\n\
         \t\tScan(table=b)\n"
    );
}

#[test]
fn test_unique_index_rejects_duplicate() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE t (id INT, v INT);");
    run(&mut s, "CREATE INDEX t(id);");
    run(&mut s, "INSERT INTO t VALUES (1, 10);");

    let err = s.execute("INSERT INTO t VALUES (1, 11);").unwrap_err();
    assert!(matches!(err, SableError::DuplicateKey { .. }));

    let out = run(&mut s, "SELECT * FROM t;");
    assert_eq!(rows(&out), vec![vec!["1", "10"]]);
}

#[test]
fn test_update_literal_only_and_index_refresh() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);
    run(&mut s, "CREATE INDEX t(v);");

    // Arithmetic over the old value is rejected at the front-end.
    assert!(s.execute("UPDATE t SET v = v + 1 WHERE id = 2;").is_err());

    run(&mut s, "UPDATE t SET v = 21 WHERE id = 2;");
    // The refreshed index answers range queries over v correctly.
    let out = run(&mut s, "SELECT id FROM t WHERE v >= 21 AND v <= 29;");
    assert_eq!(rows(&out), vec![vec!["2"]]);
    let out = run(&mut s, "SELECT id FROM t WHERE v = 20;");
    assert!(rows(&out).is_empty());
}

#[test]
fn test_composite_index_range() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE r (a INT, b INT, c INT);");
    run(&mut s, "CREATE INDEX r(a, b);");
    for (a, b, c) in [
        (1, 1, 100),
        (1, 2, 200),
        (1, 5, 500),
        (1, 6, 600),
        (2, 3, 300),
    ] {
        run(&mut s, &format!("INSERT INTO r VALUES ({a}, {b}, {c});"));
    }

    let out = run(&mut s, "SELECT c FROM r WHERE a = 1 AND b >= 2 AND b <= 5;");
    assert_eq!(rows(&out), vec![vec!["200"], vec!["500"]]);
}

#[test]
fn test_select_star_order_by_desc() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    let out = run(&mut s, "SELECT * FROM t ORDER BY v DESC;");
    assert_eq!(
        rows(&out),
        vec![
            vec!["3", "30"],
            vec!["2", "20"],
            vec!["1", "10"],
        ]
    );
}

#[test]
fn test_int_float_comparison_semantics() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE m (id INT, score FLOAT);");
    run(&mut s, "INSERT INTO m VALUES (3, 3.0), (4, 3.5);");

    // INT(3) = FLOAT(3.0) holds.
    let out = run(&mut s, "SELECT id FROM m WHERE score = 3;");
    assert_eq!(rows(&out), vec![vec!["3"]]);

    // FLOAT(3.5) compared with the INT column 3 is greater.
    let out = run(&mut s, "SELECT id FROM m WHERE id < 3.5;");
    assert_eq!(rows(&out), vec![vec!["3"]]);
}

#[test]
fn test_char_columns_round_trip() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE names (id INT, name CHAR(8));");
    run(&mut s, "INSERT INTO names VALUES (1, 'ada'), (2, 'grace');");

    let out = run(&mut s, "SELECT name FROM names WHERE name = 'ada';");
    assert_eq!(rows(&out), vec![vec!["ada"]]);

    // Byte-lexicographic ordering over the fixed width.
    let out = run(&mut s, "SELECT name FROM names ORDER BY name ASC;");
    assert_eq!(rows(&out), vec![vec!["ada"], vec!["grace"]]);
}

#[test]
fn test_delete_with_predicate() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    run(&mut s, "DELETE FROM t WHERE id <> 2;");
    let out = run(&mut s, "SELECT * FROM t;");
    assert_eq!(rows(&out), vec![vec!["2", "20"]]);
}

#[test]
fn test_failed_statement_rolls_back_its_writes() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE t (id INT, v INT);");
    run(&mut s, "CREATE INDEX t(id);");
    run(&mut s, "INSERT INTO t VALUES (1, 10);");

    // The second row collides; the first row of the same statement
    // must not survive.
    let err = s
        .execute("INSERT INTO t VALUES (4, 40), (1, 99);")
        .unwrap_err();
    assert!(matches!(err, SableError::DuplicateKey { .. }));

    let out = run(&mut s, "SELECT * FROM t;");
    assert_eq!(rows(&out), vec![vec!["1", "10"]]);
}

#[test]
fn test_explicit_transaction_rollback() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);
    run(&mut s, "CREATE INDEX t(id);");

    run(&mut s, "BEGIN;");
    run(&mut s, "INSERT INTO t VALUES (9, 90);");
    run(&mut s, "UPDATE t SET v = 99 WHERE id = 1;");
    run(&mut s, "DELETE FROM t WHERE id = 2;");
    run(&mut s, "ROLLBACK;");

    let out = run(&mut s, "SELECT * FROM t;");
    assert_eq!(
        rows(&out),
        vec![
            vec!["1", "10"],
            vec!["2", "20"],
            vec!["3", "30"],
        ]
    );
    // The index was unwound too.
    let out = run(&mut s, "SELECT v FROM t WHERE id = 9;");
    assert!(rows(&out).is_empty());
}

#[test]
fn test_explicit_transaction_commit() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    run(&mut s, "BEGIN;");
    run(&mut s, "INSERT INTO t VALUES (9, 90);");
    run(&mut s, "COMMIT;");

    let out = run(&mut s, "SELECT v FROM t WHERE id = 9;");
    assert_eq!(rows(&out), vec![vec!["90"]]);
}

#[test]
fn test_ddl_round_trip_leaves_clean_catalog() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE t (id INT, v INT);");
    let desc_before = run(&mut s, "DESC t;");
    run(&mut s, "DROP TABLE t;");
    run(&mut s, "CREATE TABLE t (id INT, v INT);");
    let desc_after = run(&mut s, "DESC t;");
    assert_eq!(desc_before, desc_after);

    let out = run(&mut s, "SELECT * FROM t;");
    assert!(out.contains("Total record(s): 0"));
}

#[test]
fn test_show_and_desc_output() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE t (id INT, name CHAR(4));");
    run(&mut s, "CREATE INDEX t(id);");

    let out = run(&mut s, "SHOW TABLES;");
    assert!(out.contains("Tables"));
    assert!(out.contains(&format!("| {:>16} |", "t")));

    let out = run(&mut s, "DESC t;");
    assert_eq!(
        rows(&out),
        vec![
            vec!["id", "INT", "YES"],
            vec!["name", "CHAR", "NO"],
        ]
    );

    let out = run(&mut s, "SHOW INDEX FROM t;");
    assert_eq!(out, "| t | unique | (id) |\n");
}

#[test]
fn test_create_index_with_duplicates_fails_and_cleans_up() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE t (id INT, v INT);");
    run(&mut s, "INSERT INTO t VALUES (1, 10), (1, 20);");

    let err = s.execute("CREATE INDEX t(id);").unwrap_err();
    assert!(matches!(err, SableError::DuplicateKey { .. }));

    // The partial index is gone; a non-duplicate column still works.
    run(&mut s, "CREATE INDEX t(v);");
    let out = run(&mut s, "SELECT v FROM t WHERE v = 20;");
    assert_eq!(rows(&out), vec![vec!["20"]]);

    let out = run(&mut s, "SHOW INDEX FROM t;");
    assert_eq!(out, "| t | unique | (v) |\n");
}

#[test]
fn test_drop_index_falls_back_to_seq_scan() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);
    run(&mut s, "CREATE INDEX t(id);");
    run(&mut s, "DROP INDEX t(id);");

    let out = run(&mut s, "SELECT v FROM t WHERE id = 2;");
    assert_eq!(rows(&out), vec![vec!["20"]]);

    let err = s.execute("DROP INDEX t(id);").unwrap_err();
    assert!(matches!(err, SableError::IndexNotFound { .. }));
}

#[test]
fn test_output_file_mirror() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    run(&mut s, "SET enable_output_file = true;");
    run(&mut s, "SELECT * FROM t WHERE id = 1;");

    let path = fx._dir.path().join("testdb").join("output.txt");
    let text = std::fs::read_to_string(path).unwrap();
    assert_eq!(text, "| id | v |\n| 1 | 10 |\n");
}

#[test]
fn test_static_checkpoint_truncates_log() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    let log = fx._dir.path().join("testdb").join("log.log");
    assert!(std::fs::metadata(&log).unwrap().len() > 0);

    run(&mut s, "CREATE STATIC_CHECKPOINT;");
    assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);

    // Data survives the checkpoint.
    let out = run(&mut s, "SELECT * FROM t;");
    assert!(out.contains("Total record(s): 3"));
}

#[test]
fn test_reopen_preserves_data_and_indexes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("testdb");
    Database::create(&path).unwrap();
    {
        let db = Database::open(&path, EngineConfig::default()).unwrap();
        let mut s = db.session();
        seed_t(&mut s);
        run(&mut s, "CREATE INDEX t(id);");
        db.close().unwrap();
    }
    let db = Database::open(&path, EngineConfig::default()).unwrap();
    let mut s = db.session();
    let out = run(&mut s, "SELECT v FROM t WHERE id >= 2;");
    assert_eq!(rows(&out), vec![vec!["20"], vec!["30"]]);

    let out = run(&mut s, "SHOW INDEX FROM t;");
    assert_eq!(out, "| t | unique | (id) |\n");
}

#[test]
fn test_errors_leave_session_usable() {
    let fx = open_db();
    let mut s = fx.db.session();
    seed_t(&mut s);

    assert!(s.execute("SELECT * FROM missing;").is_err());
    assert!(s.execute("SELECT zz FROM t;").is_err());
    assert!(s.execute("CREATE TABLE t (id INT);").is_err());

    let out = run(&mut s, "SELECT * FROM t WHERE id = 3;");
    assert_eq!(rows(&out), vec![vec!["3", "30"]]);
}

#[test]
fn test_comma_join_with_where_predicates() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE a (id INT, x INT);");
    run(&mut s, "CREATE TABLE b (id INT, y INT);");
    run(&mut s, "INSERT INTO a VALUES (1, 100), (2, 200), (3, 300);");
    run(&mut s, "INSERT INTO b VALUES (1, 7), (2, 8), (4, 9);");

    let out = run(
        &mut s,
        "SELECT a.x, b.y FROM a, b WHERE a.id = b.id AND a.x > 150;",
    );
    assert_eq!(rows(&out), vec![vec!["200", "8"]]);
}

#[test]
fn test_cartesian_product_when_disconnected() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE a (id INT, x INT);");
    run(&mut s, "CREATE TABLE b (id INT, y INT);");
    run(&mut s, "INSERT INTO a VALUES (1, 100), (2, 200);");
    run(&mut s, "INSERT INTO b VALUES (5, 7);");

    let out = run(&mut s, "SELECT a.x, b.y FROM a, b;");
    assert!(out.contains("Total record(s): 2"));
}

#[test]
fn test_sort_merge_join_knob() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE a (id INT, x INT);");
    run(&mut s, "CREATE TABLE b (id INT, y INT);");
    run(&mut s, "INSERT INTO a VALUES (1, 100), (2, 200), (2, 201);");
    run(&mut s, "INSERT INTO b VALUES (2, 7), (2, 8), (3, 9);");

    run(&mut s, "SET enable_nestloop = false;");
    run(&mut s, "SET enable_sortmerge = true;");

    // Equal-key groups expand as a cross product: 2 x 2 pairs.
    let out = run(&mut s, "SELECT a.x, b.y FROM a JOIN b ON a.id = b.id;");
    let mut got = rows(&out);
    got.sort();
    assert_eq!(
        got,
        vec![
            vec!["200", "7"],
            vec!["200", "8"],
            vec!["201", "7"],
            vec!["201", "8"],
        ]
    );

    run(&mut s, "SET enable_nestloop = true;");
}

#[test]
fn test_alias_queries() {
    let fx = open_db();
    let mut s = fx.db.session();
    run(&mut s, "CREATE TABLE users (id INT, age INT);");
    run(&mut s, "INSERT INTO users VALUES (1, 30), (2, 40);");

    let out = run(&mut s, "SELECT u.age FROM users u WHERE u.id = 2;");
    assert_eq!(rows(&out), vec![vec!["40"]]);
}
