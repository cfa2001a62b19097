//! A single buffer frame holding one resident page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use sable_common::constants::PAGE_SIZE;
use sable_common::types::PageId;

/// One slot of the buffer pool.
///
/// The frame's data is protected by its own lock; residency metadata
/// (which page lives here) is only changed by the pool while the frame
/// is unpinned.
pub struct BufferFrame {
    data: RwLock<Box<[u8]>>,
    page: Mutex<Option<PageId>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    referenced: AtomicBool,
}

impl BufferFrame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            page: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            referenced: AtomicBool::new(false),
        }
    }

    /// Shared access to the page bytes.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Exclusive access to the page bytes.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// The page currently resident in this frame, if any.
    pub fn page(&self) -> Option<PageId> {
        *self.page.lock()
    }

    pub(crate) fn set_page(&self, page: Option<PageId>) {
        *self.page.lock() = page;
    }

    /// Increments the pin count and marks the frame recently used.
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
        self.referenced.store(true, Ordering::Relaxed);
    }

    /// Decrements the pin count.
    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unpin of unpinned frame");
    }

    /// Current pin count.
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Marks the frame dirty.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns and clears the dirty bit.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Whether the frame holds unwritten changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Returns and clears the clock reference bit.
    pub fn take_referenced(&self) -> bool {
        self.referenced.swap(false, Ordering::Relaxed)
    }
}

impl Default for BufferFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("page", &self.page())
            .field("pins", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
