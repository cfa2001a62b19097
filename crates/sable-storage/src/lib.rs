//! # sable-storage
//!
//! The paged storage layer of SableDB:
//!
//! - Disk manager: per-file page I/O inside a database directory
//! - Buffer pool: fixed frame cache with clock eviction and pin counts
//! - Record file: heap of fixed-width records with slot bitmaps
//! - B+-tree: ordered multi-column index over record ids
//! - Write-ahead log: append-only statement journal

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod btree;
pub mod buffer;
pub mod disk;
pub mod heap;
pub mod wal;

pub use btree::{BTreeIndex, BTreeScan, KeyColumn, KeyKind, KeySchema};
pub use buffer::{BufferPool, PageGuard};
pub use disk::DiskManager;
pub use heap::{HeapScan, RecordFile};
pub use wal::LogManager;
