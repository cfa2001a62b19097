//! The buffer pool proper: page table, fetch/new/flush, eviction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use sable_common::config::EngineConfig;
use sable_common::types::{FileId, PageId};
use sable_common::{SableError, SableResult};

use super::frame::BufferFrame;
use super::replacer::ClockReplacer;
use crate::disk::DiskManager;

/// Shared page cache for every file of the database.
///
/// All mapping changes (fetch miss, eviction, discard) happen under the
/// page-table lock, so a frame's residency never changes while a
/// [`PageGuard`] pins it.
pub struct BufferPool {
    frames: Vec<Arc<BufferFrame>>,
    page_table: Mutex<HashMap<PageId, usize>>,
    replacer: ClockReplacer,
    disk: Arc<DiskManager>,
}

impl BufferPool {
    /// Creates a pool with the configured number of frames.
    pub fn new(config: &EngineConfig, disk: Arc<DiskManager>) -> Self {
        let frames = (0..config.buffer_pool_frames)
            .map(|_| Arc::new(BufferFrame::new()))
            .collect();
        Self {
            frames,
            page_table: Mutex::new(HashMap::new()),
            replacer: ClockReplacer::new(),
            disk,
        }
    }

    /// Fetches a page, reading it from disk on a miss. The returned
    /// guard keeps the page pinned until dropped.
    pub fn fetch_page(&self, page: PageId) -> SableResult<PageGuard> {
        let mut table = self.page_table.lock();
        if let Some(&idx) = table.get(&page) {
            let frame = Arc::clone(&self.frames[idx]);
            frame.pin();
            return Ok(PageGuard { frame, page });
        }

        let idx = self.take_victim(&mut table)?;
        let frame = Arc::clone(&self.frames[idx]);
        {
            let mut data = frame.data_mut();
            self.disk.read_page(page.file, page.page_no, &mut data)?;
        }
        frame.set_page(Some(page));
        frame.pin();
        table.insert(page, idx);
        Ok(PageGuard { frame, page })
    }

    /// Allocates a fresh page in `file` and returns it pinned, zeroed
    /// and marked dirty.
    pub fn new_page(&self, file: FileId) -> SableResult<PageGuard> {
        let page_no = self.disk.allocate_page(file)?;
        let page = PageId::new(file, page_no);

        let mut table = self.page_table.lock();
        let idx = self.take_victim(&mut table)?;
        let frame = Arc::clone(&self.frames[idx]);
        frame.data_mut().fill(0);
        frame.set_page(Some(page));
        frame.mark_dirty();
        frame.pin();
        table.insert(page, idx);
        Ok(PageGuard { frame, page })
    }

    /// Evicts one unpinned frame, writing it back if dirty, and returns
    /// its index. The page table entry of the evicted page is removed.
    fn take_victim(&self, table: &mut HashMap<PageId, usize>) -> SableResult<usize> {
        let idx = self
            .replacer
            .victim(&self.frames)
            .ok_or_else(|| SableError::internal("buffer pool exhausted: all frames pinned"))?;
        let frame = &self.frames[idx];
        if let Some(old) = frame.page() {
            if frame.take_dirty() {
                let data = frame.data();
                self.disk.write_page(old.file, old.page_no, &data)?;
            }
            table.remove(&old);
            debug!(page = %old, "evicted page");
        }
        frame.set_page(None);
        Ok(idx)
    }

    /// Writes one resident page back to disk if dirty.
    pub fn flush_page(&self, page: PageId) -> SableResult<()> {
        let table = self.page_table.lock();
        if let Some(&idx) = table.get(&page) {
            let frame = &self.frames[idx];
            if frame.take_dirty() {
                let data = frame.data();
                self.disk.write_page(page.file, page.page_no, &data)?;
            }
        }
        Ok(())
    }

    /// Writes back every dirty page of one file.
    pub fn flush_file(&self, file: FileId) -> SableResult<()> {
        let table = self.page_table.lock();
        for (&page, &idx) in table.iter() {
            if page.file != file {
                continue;
            }
            let frame = &self.frames[idx];
            if frame.take_dirty() {
                let data = frame.data();
                self.disk.write_page(page.file, page.page_no, &data)?;
            }
        }
        Ok(())
    }

    /// Writes back every dirty page in the pool.
    pub fn flush_all(&self) -> SableResult<()> {
        let table = self.page_table.lock();
        for (&page, &idx) in table.iter() {
            let frame = &self.frames[idx];
            if frame.take_dirty() {
                let data = frame.data();
                self.disk.write_page(page.file, page.page_no, &data)?;
            }
        }
        Ok(())
    }

    /// Drops every resident page of `file` without write-back. Used
    /// when the file itself is being destroyed. Fails if any page of
    /// the file is still pinned.
    pub fn evict_file(&self, file: FileId) -> SableResult<()> {
        let mut table = self.page_table.lock();
        let pages: Vec<PageId> = table
            .keys()
            .filter(|p| p.file == file)
            .copied()
            .collect();
        for page in &pages {
            let idx = table[page];
            let frame = &self.frames[idx];
            if frame.pin_count() > 0 {
                return Err(SableError::internal(format!(
                    "evict_file: page {page} still pinned"
                )));
            }
            frame.take_dirty();
            frame.set_page(None);
            table.remove(page);
        }
        Ok(())
    }

    /// Number of frames.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("frames", &self.frames.len())
            .field("resident", &self.page_table.lock().len())
            .finish()
    }
}

/// RAII pin on one resident page.
///
/// Dropping the guard unpins the page. Writing through the guard marks
/// the frame dirty, so mutation and the dirty bit cannot get out of
/// sync.
pub struct PageGuard {
    frame: Arc<BufferFrame>,
    page: PageId,
}

impl PageGuard {
    /// The pinned page's address.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page
    }

    /// Shared access to the page bytes.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.data()
    }

    /// Exclusive access to the page bytes; marks the page dirty.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.mark_dirty();
        self.frame.data_mut()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PageGuard({})", self.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_common::constants::PAGE_SIZE;
    use tempfile::TempDir;

    fn setup(frames: usize) -> (TempDir, Arc<DiskManager>, BufferPool) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()));
        disk.create_file("t.tbl").unwrap();
        let config = EngineConfig {
            buffer_pool_frames: frames,
        };
        let pool = BufferPool::new(&config, Arc::clone(&disk));
        (dir, disk, pool)
    }

    #[test]
    fn test_new_page_is_zeroed_and_survives_eviction() {
        let (_dir, disk, pool) = setup(2);
        let file = disk.open_file("t.tbl").unwrap();

        let page_id = {
            let guard = pool.new_page(file).unwrap();
            assert!(guard.read().iter().all(|&b| b == 0));
            guard.write()[0] = 42;
            guard.page_id()
        };

        // Force eviction by cycling more pages than frames.
        for _ in 0..4 {
            let _ = pool.new_page(file).unwrap();
        }

        let guard = pool.fetch_page(page_id).unwrap();
        assert_eq!(guard.read()[0], 42);
    }

    #[test]
    fn test_pool_exhaustion() {
        let (_dir, disk, pool) = setup(2);
        let file = disk.open_file("t.tbl").unwrap();
        let _g1 = pool.new_page(file).unwrap();
        let _g2 = pool.new_page(file).unwrap();
        assert!(pool.new_page(file).is_err());
    }

    #[test]
    fn test_guard_drop_unpins() {
        let (_dir, disk, pool) = setup(1);
        let file = disk.open_file("t.tbl").unwrap();
        {
            let _g = pool.new_page(file).unwrap();
        }
        // Frame is free again.
        assert!(pool.new_page(file).is_ok());
    }

    #[test]
    fn test_flush_writes_to_disk() {
        let (_dir, disk, pool) = setup(4);
        let file = disk.open_file("t.tbl").unwrap();
        let page_id = {
            let guard = pool.new_page(file).unwrap();
            guard.write()[7] = 9;
            guard.page_id()
        };
        pool.flush_file(file).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(file, page_id.page_no, &mut buf).unwrap();
        assert_eq!(buf[7], 9);
    }
}
