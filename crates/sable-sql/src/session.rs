//! Database handle and session: statement dispatch, transactions, and
//! result formatting.
//!
//! A [`Database`] is shared across sessions; each session runs its
//! statements synchronously and owns its transaction context. DDL
//! serializes on the catalog lock; queries and DML share it.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use parking_lot::RwLock;
use tracing::debug;

use sable_common::config::{EngineConfig, PlannerKnobs};
use sable_common::constants::{LOG_FILE_NAME, OUTPUT_FILE_NAME};
use sable_common::{SableError, SableResult};
use sable_storage::LogManager;

use crate::analyzer::Analyzer;
use crate::executor::{self, execute_delete, execute_insert, execute_update};
use crate::optimizer::QueryOptimizer;
use crate::parser::{Knob, Parser, SelectStmt, Statement};
use crate::plan::StatementPlan;
use crate::planner::Planner;
use crate::printer::{format_field, pipe_row, TablePrinter};
use crate::system::SystemManager;
use crate::txn::Transaction;

/// An open SableDB database.
pub struct Database {
    sys: RwLock<SystemManager>,
    knobs: PlannerKnobs,
    log: LogManager,
    root: PathBuf,
}

impl Database {
    /// Creates a new database directory.
    pub fn create(path: impl AsRef<Path>) -> SableResult<()> {
        SystemManager::create_db(path.as_ref())
    }

    /// Removes a database directory. The database must not be open.
    pub fn destroy(path: impl AsRef<Path>) -> SableResult<()> {
        SystemManager::drop_db(path.as_ref())
    }

    /// Opens a database directory.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> SableResult<Self> {
        let root = path.as_ref().to_path_buf();
        let sys = SystemManager::open_db(&root, &config)?;
        let log = LogManager::open(root.join(LOG_FILE_NAME))?;
        Ok(Self {
            sys: RwLock::new(sys),
            knobs: PlannerKnobs::default(),
            log,
            root,
        })
    }

    /// Flushes everything and closes the underlying files.
    pub fn close(&self) -> SableResult<()> {
        self.sys.write().close_db()
    }

    /// Opens a session on this database.
    pub fn session(&self) -> Session<'_> {
        Session {
            db: self,
            txn: Transaction::new(),
        }
    }

    /// The session knobs.
    pub fn knobs(&self) -> &PlannerKnobs {
        &self.knobs
    }

    fn append_output(&self, text: &str) -> SableResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(OUTPUT_FILE_NAME))?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database({})", self.root.display())
    }
}

/// One client session: a transaction context over a shared database.
pub struct Session<'a> {
    db: &'a Database,
    txn: Transaction,
}

impl Session<'_> {
    /// Parses and executes one statement, returning its printable
    /// output. Errors abort the statement, undo its writes, and leave
    /// the session usable.
    pub fn execute(&mut self, sql: &str) -> SableResult<String> {
        let stmt = Parser::parse(sql)?;
        debug!(?stmt, "executing statement");
        self.dispatch(stmt)
    }

    fn dispatch(&mut self, stmt: Statement) -> SableResult<String> {
        match stmt {
            // DDL runs serially under the catalog write lock.
            Statement::CreateTable { table, columns } => {
                self.db.sys.write().create_table(&table, &columns)?;
                Ok(String::new())
            }
            Statement::DropTable { table } => {
                self.db.sys.write().drop_table(&table)?;
                Ok(String::new())
            }
            Statement::CreateIndex { table, columns } => {
                self.db.sys.write().create_index(&table, &columns)?;
                Ok(String::new())
            }
            Statement::DropIndex { table, columns } => {
                self.db.sys.write().drop_index(&table, &columns)?;
                Ok(String::new())
            }

            Statement::Insert { table, rows } => {
                let sys = self.db.sys.read();
                let query = Analyzer::new(&sys.db).analyze_insert(&table, &rows)?;
                self.run_dml(&sys, |sys, txn| {
                    execute_insert(sys, txn, &table, &query.rows)
                })?;
                Ok(String::new())
            }
            Statement::Delete { table, conditions } => {
                let sys = self.db.sys.read();
                let query = Analyzer::new(&sys.db).analyze_delete(&table, &conditions)?;
                let scan = Planner::new(&sys, &self.db.knobs).plan_dml_scan(&table, &query)?;
                self.run_dml(&sys, |sys, txn| execute_delete(sys, txn, &table, &scan))?;
                Ok(String::new())
            }
            Statement::Update {
                table,
                assignments,
                conditions,
            } => {
                let sys = self.db.sys.read();
                let query =
                    Analyzer::new(&sys.db).analyze_update(&table, &assignments, &conditions)?;
                let scan = Planner::new(&sys, &self.db.knobs).plan_dml_scan(&table, &query)?;
                self.run_dml(&sys, |sys, txn| {
                    execute_update(sys, txn, &table, &scan, &query.set_clauses)
                })?;
                Ok(String::new())
            }

            Statement::Select(sel) => {
                let sys = self.db.sys.read();
                self.run_select(&sys, &sel)
            }
            Statement::Explain(sel) => {
                let sys = self.db.sys.read();
                let query = Analyzer::new(&sys.db).analyze_select(&sel)?;
                let tree = QueryOptimizer::new(&sys).optimize(&query);
                Ok(tree.render())
            }

            Statement::ShowTables => {
                let sys = self.db.sys.read();
                let mut printer = TablePrinter::new(1);
                printer.separator();
                printer.record(&["Tables".to_string()]);
                printer.separator();
                let mut mirror = String::from("| Tables |\n");
                for name in sys.db.tables.keys() {
                    printer.record(&[name.clone()]);
                    mirror.push_str(&pipe_row(&[name.clone()]));
                }
                printer.separator();
                if self.db.knobs.output_file() {
                    self.db.append_output(&mirror)?;
                }
                Ok(printer.finish())
            }
            Statement::ShowIndexes { table } => {
                let sys = self.db.sys.read();
                let tab = sys.db.get_table(&table)?;
                let mut out = String::new();
                for index in tab.indexes.values() {
                    let cols = format!("({})", index.col_names().join(","));
                    out.push_str(&pipe_row(&[
                        table.clone(),
                        "unique".to_string(),
                        cols,
                    ]));
                }
                if self.db.knobs.output_file() {
                    self.db.append_output(&out)?;
                }
                Ok(out)
            }
            Statement::DescTable { table } => {
                let sys = self.db.sys.read();
                let tab = sys.db.get_table(&table)?;
                let mut printer = TablePrinter::new(3);
                printer.separator();
                printer.record(&["Field".into(), "Type".into(), "Index".into()]);
                printer.separator();
                for col in &tab.cols {
                    printer.record(&[
                        col.name.clone(),
                        col.col_type.to_string(),
                        if col.has_index { "YES" } else { "NO" }.to_string(),
                    ]);
                }
                printer.separator();
                Ok(printer.finish())
            }

            Statement::Begin => {
                self.txn.set_explicit(true);
                Ok(String::new())
            }
            Statement::Commit => {
                self.txn.commit(&self.db.log)?;
                Ok(String::new())
            }
            Statement::Rollback => {
                let sys = self.db.sys.read();
                self.txn.rollback(&sys)?;
                Ok(String::new())
            }
            Statement::SetKnob { knob, value } => {
                let target = match knob {
                    Knob::NestLoop => &self.db.knobs.enable_nestedloop_join,
                    Knob::SortMerge => &self.db.knobs.enable_sortmerge_join,
                    Knob::OutputFile => &self.db.knobs.enable_output_file,
                };
                target.store(value, Ordering::Relaxed);
                Ok(String::new())
            }
            Statement::StaticCheckpoint => {
                // Best effort: settle outstanding writes, flush all
                // state, and truncate the log. No checkpoint record is
                // written, so this point is not crash-consistent.
                self.txn.commit(&self.db.log)?;
                let sys = self.db.sys.read();
                sys.checkpoint()?;
                self.db.log.truncate()?;
                Ok(String::new())
            }
        }
    }

    /// Runs a DML closure with statement-level undo: on error, writes
    /// made by this statement are rolled back before the error
    /// surfaces. Outside an explicit transaction the statement commits
    /// immediately.
    fn run_dml<F>(&mut self, sys: &SystemManager, op: F) -> SableResult<usize>
    where
        F: FnOnce(&SystemManager, &mut Transaction) -> SableResult<usize>,
    {
        let mark = self.txn.mark();
        match op(sys, &mut self.txn) {
            Ok(n) => {
                if !self.txn.is_explicit() {
                    self.txn.commit(&self.db.log)?;
                }
                Ok(n)
            }
            Err(err) => {
                self.txn.rollback_to(sys, mark)?;
                Err(err)
            }
        }
    }

    fn run_select(&self, sys: &SystemManager, sel: &SelectStmt) -> SableResult<String> {
        let query = Analyzer::new(&sys.db).analyze_select(sel)?;
        let planner = Planner::new(sys, &self.db.knobs);
        let StatementPlan::Select { plan, cols } = planner.plan_select(&query)? else {
            return Err(SableError::internal("planner produced a non-select plan"));
        };
        let mut exec = executor::build(sys, &plan)?;

        let captions: Vec<String> = cols.iter().map(|c| c.column.clone()).collect();
        let mut printer = TablePrinter::new(captions.len());
        printer.separator();
        printer.record(&captions);
        printer.separator();

        let mirror = self.db.knobs.output_file();
        let mut file_out = String::new();
        if mirror {
            file_out.push_str(&pipe_row(&captions));
        }

        let mut count = 0;
        exec.begin()?;
        while let Some(record) = exec.current() {
            let cells: Vec<String> = exec
                .columns()
                .iter()
                .map(|col| format_field(record, col))
                .collect();
            printer.record(&cells);
            if mirror {
                file_out.push_str(&pipe_row(&cells));
            }
            count += 1;
            exec.next()?;
        }
        printer.separator();
        printer.record_count(count);

        if mirror {
            self.db.append_output(&file_out)?;
        }
        Ok(printer.finish())
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("explicit_txn", &self.txn.is_explicit())
            .finish()
    }
}
