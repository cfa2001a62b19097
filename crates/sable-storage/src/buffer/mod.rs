//! Buffer pool: a fixed-size page cache between the disk manager and
//! the access methods.
//!
//! Pages are fetched into frames, pinned while in use, and written back
//! on eviction or flush. Pin release is RAII via [`PageGuard`], so pins
//! are dropped on every exit path.

mod frame;
mod pool;
mod replacer;

pub use frame::BufferFrame;
pub use pool::{BufferPool, PageGuard};
pub use replacer::ClockReplacer;
