//! Engine-wide constants.

/// Size of a disk page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel page number meaning "no page".
pub const NO_PAGE: i32 = -1;

/// File name of the persisted catalog inside a database directory.
pub const DB_META_NAME: &str = "db.meta";

/// File name of the write-ahead log inside a database directory.
pub const LOG_FILE_NAME: &str = "log.log";

/// File name query output is mirrored to when enabled.
pub const OUTPUT_FILE_NAME: &str = "output.txt";

/// Suffix of table heap files.
pub const HEAP_FILE_SUFFIX: &str = ".tbl";

/// Suffix of B+-tree index files.
pub const INDEX_FILE_SUFFIX: &str = ".idx";
