//! Interactive read-eval-print loop.
//!
//! Statements may span lines and end with `;`. Backslash commands:
//! `\q` quits, `\h` prints help.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use sable_sql::Database;

const PROMPT: &str = "sable> ";
const CONTINUATION_PROMPT: &str = "    -> ";

const HELP: &str = "\
Supported SQL:
  CREATE TABLE t (col type [, ...])        type: INT | FLOAT | CHAR(n)
  DROP TABLE t
  CREATE INDEX t(col [, ...])
  DROP INDEX t(col [, ...])
  INSERT INTO t VALUES (v [, ...])[, ...]
  DELETE FROM t [WHERE cond [AND ...]]
  UPDATE t SET col = v [, ...] [WHERE ...]
  SELECT {* | col [, ...]} FROM t [JOIN t ON ...] [WHERE ...] [ORDER BY col [ASC|DESC]]
  EXPLAIN <select>
  SHOW TABLES | SHOW INDEX FROM t | DESC t
  BEGIN | COMMIT | ROLLBACK
  SET {enable_nestloop | enable_sortmerge | enable_output_file} = {true | false}
  CREATE STATIC_CHECKPOINT
";

/// Runs the shell until EOF or `\q`.
pub fn run(db: &Database) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut session = db.session();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if buffer.is_empty() {
                    match trimmed {
                        "" => continue,
                        "\\q" | "\\quit" | "exit" => break,
                        "\\h" | "\\help" | "help" => {
                            print!("{HELP}");
                            continue;
                        }
                        _ => {}
                    }
                }
                buffer.push_str(&line);
                buffer.push('\n');
                if !trimmed.ends_with(';') {
                    continue;
                }

                let statement = std::mem::take(&mut buffer);
                let _ = editor.add_history_entry(statement.trim());
                debug!(statement = statement.trim(), "dispatching");
                match session.execute(&statement) {
                    Ok(output) => print!("{output}"),
                    Err(err) => {
                        eprintln!("error: {err}");
                        if err.is_fatal() {
                            return Err(err.into());
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
