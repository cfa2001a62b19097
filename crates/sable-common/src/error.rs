//! Error handling for SableDB.
//!
//! Provides the unified error type and result alias used across all
//! SableDB components. Schema and type errors abort the current
//! statement; I/O errors are fatal to the statement and propagate
//! unchanged from the storage layer.

use thiserror::Error;

use crate::types::Rid;

/// Result type alias for SableDB operations.
pub type SableResult<T> = std::result::Result<T, SableError>;

/// The main error type for SableDB.
///
/// Each variant carries the context a client needs to understand what
/// went wrong (object names, type names, record ids).
#[derive(Debug, Error)]
pub enum SableError {
    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    /// A database with this name already exists.
    #[error("database '{name}' already exists")]
    DatabaseExists {
        /// The database name.
        name: String,
    },

    /// The database does not exist.
    #[error("database '{name}' not found")]
    DatabaseNotFound {
        /// The missing database.
        name: String,
    },

    /// A table with this name already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The table name.
        table: String,
    },

    /// The table does not exist.
    #[error("table '{table}' not found")]
    TableNotFound {
        /// The missing table.
        table: String,
    },

    /// The column does not exist in any referenced table.
    #[error("column '{column}' not found")]
    ColumnNotFound {
        /// The missing column.
        column: String,
    },

    /// A bare column name matches more than one referenced table.
    #[error("column '{column}' is ambiguous")]
    AmbiguousColumn {
        /// The ambiguous column.
        column: String,
    },

    /// An index over these columns already exists.
    #[error("index on '{table}'({columns}) already exists")]
    IndexExists {
        /// The indexed table.
        table: String,
        /// Comma-joined column list.
        columns: String,
    },

    /// No index over these columns exists.
    #[error("index on '{table}'({columns}) not found")]
    IndexNotFound {
        /// The indexed table.
        table: String,
        /// Comma-joined column list.
        columns: String,
    },

    // ==========================================================================
    // Type Errors
    // ==========================================================================
    /// Two sides of an assignment or comparison have incompatible types.
    #[error("incompatible types: {lhs} and {rhs}")]
    IncompatibleType {
        /// Left/target type name.
        lhs: String,
        /// Right/source type name.
        rhs: String,
    },

    // ==========================================================================
    // Data Errors
    // ==========================================================================
    /// A unique index rejected an insert.
    #[error("duplicate key for index '{index}'")]
    DuplicateKey {
        /// The violated index.
        index: String,
    },

    /// A record id points at no live record.
    #[error("record not found at {rid}")]
    RecordNotFound {
        /// The invalid record id.
        rid: Rid,
    },

    /// An INSERT row does not match the table's column count.
    #[error("value count mismatch for table '{table}': expected {expected}, got {got}")]
    InvalidValueCount {
        /// Target table.
        table: String,
        /// Number of columns.
        expected: usize,
        /// Number of supplied values.
        got: usize,
    },

    // ==========================================================================
    // Front-end Errors
    // ==========================================================================
    /// The statement could not be parsed.
    #[error("syntax error: {message}")]
    Syntax {
        /// Parser diagnostic.
        message: String,
    },

    /// The statement parses but uses an unsupported construct.
    #[error("unsupported: {message}")]
    Unsupported {
        /// What was unsupported.
        message: String,
    },

    // ==========================================================================
    // I/O and Internal Errors
    // ==========================================================================
    /// I/O error from the underlying system; fatal to the statement.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Internal invariant violation - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl SableError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an unsupported-construct error.
    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates an incompatible-type error from two type names.
    #[must_use]
    pub fn incompatible(lhs: impl Into<String>, rhs: impl Into<String>) -> Self {
        Self::IncompatibleType {
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }

    /// Returns true if this error aborts the whole session rather than
    /// just the current statement.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SableError::TableNotFound {
            table: "users".into(),
        };
        assert_eq!(err.to_string(), "table 'users' not found");

        let err = SableError::DuplicateKey {
            index: "t_id".into(),
        };
        assert_eq!(err.to_string(), "duplicate key for index 't_id'");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SableError = io_err.into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_schema_errors_not_fatal() {
        let err = SableError::AmbiguousColumn { column: "id".into() };
        assert!(!err.is_fatal());
    }
}
