//! SableDB interactive shell.
//!
//! Usage: `sable <database-dir>` - the directory is created on first
//! use. Statements end with `;`; `\q` quits.

mod repl;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use sable_common::config::EngineConfig;
use sable_sql::Database;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: sable <database-dir>")?;
    let path = std::path::PathBuf::from(path);

    if !path.is_dir() {
        Database::create(&path).with_context(|| format!("creating {}", path.display()))?;
        println!("Created database {}", path.display());
    }
    let db = Database::open(&path, EngineConfig::default())
        .with_context(|| format!("opening {}", path.display()))?;

    let result = repl::run(&db);
    db.close().context("closing database")?;
    result
}
