//! # sable-sql
//!
//! The query layer of SableDB:
//!
//! - SQL parsing (via the `sqlparser` crate, translated into an
//!   internal statement tree)
//! - Catalog: table, column, and index metadata with persistence
//! - Analyzer: name resolution and type checking into a bound query
//! - Optimizer: rule-based rewrites and the printable logical tree
//! - Planner: physical plan selection (index matching, join ordering)
//! - Executors: volcano-style operators over the storage layer
//! - System manager: DDL and database lifecycle
//! - Session: statement dispatch, transactions, result formatting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod catalog;
pub mod executor;
pub mod optimizer;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod printer;
pub mod session;
pub mod system;
pub mod txn;
pub mod value;

pub use session::{Database, Session};
