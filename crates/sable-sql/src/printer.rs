//! Result formatting: framed, pipe-delimited ASCII tables.
//!
//! Each cell is right-aligned in a 16-character column; overlong cells
//! are truncated with `...`. A result ends with a separator and a
//! `Total record(s): N` line.

use crate::catalog::ColMeta;
use crate::value::{ColType, Value};

/// Cell width of the framed table output.
pub const COL_WIDTH: usize = 16;

/// Accumulates one statement's framed output.
#[derive(Debug)]
pub struct TablePrinter {
    num_cols: usize,
    out: String,
}

impl TablePrinter {
    /// Creates a printer for `num_cols` columns.
    pub fn new(num_cols: usize) -> Self {
        debug_assert!(num_cols > 0);
        Self {
            num_cols,
            out: String::new(),
        }
    }

    /// Appends a `+---+---+` separator line.
    pub fn separator(&mut self) {
        for _ in 0..self.num_cols {
            self.out.push('+');
            self.out.push_str(&"-".repeat(COL_WIDTH + 2));
        }
        self.out.push_str("+\n");
    }

    /// Appends one framed row.
    pub fn record(&mut self, cells: &[String]) {
        debug_assert_eq!(cells.len(), self.num_cols);
        for cell in cells {
            let cell = clip(cell);
            self.out.push_str(&format!("| {cell:>COL_WIDTH$} "));
        }
        self.out.push_str("|\n");
    }

    /// Appends the record-count footer.
    pub fn record_count(&mut self, n: usize) {
        self.out.push_str(&format!("Total record(s): {n}\n"));
    }

    /// The accumulated text.
    pub fn finish(self) -> String {
        self.out
    }
}

/// Truncates a cell to the column width, marking the cut with `...`.
fn clip(cell: &str) -> String {
    if cell.len() > COL_WIDTH {
        format!("{}...", &cell[..COL_WIDTH - 3])
    } else {
        cell.to_string()
    }
}

/// Renders one record field for display.
pub fn format_field(record: &[u8], col: &ColMeta) -> String {
    let raw = &record[col.offset..col.offset + col.len];
    match Value::decode(raw, col.col_type) {
        Value::Int(v) => v.to_string(),
        Value::Float(v) => format!("{v:.6}"),
        Value::Str(s) => s,
    }
}

/// Renders rows in the unpadded `| v | v |` form used for the output
/// file mirror and index listings.
pub fn pipe_row(cells: &[String]) -> String {
    let mut out = String::from("|");
    for cell in cells {
        out.push(' ');
        out.push_str(cell);
        out.push_str(" |");
    }
    out.push('\n');
    out
}
