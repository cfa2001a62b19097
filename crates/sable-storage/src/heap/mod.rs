//! Record file: a heap of fixed-width records.
//!
//! # File layout
//!
//! ```text
//! page 0            file header (record size, slots per page, counters,
//!                   head of the free-page list)
//! page 1..          data pages
//! ```
//!
//! # Data page layout
//!
//! ```text
//! +--------------------+
//! |  next_free: i32    |  link in the free-page list
//! |  used: u32         |  occupied slot count
//! +--------------------+
//! |  slot bitmap       |  one bit per slot
//! +--------------------+
//! |  slot 0            |  record_size bytes each
//! |  slot 1            |
//! |  ...               |
//! +--------------------+
//! ```
//!
//! A page is reachable from the free-page list exactly while it has at
//! least one vacant slot, so insertion never scans the file.

mod scan;

pub use scan::HeapScan;

use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use tracing::debug;

use sable_common::constants::{NO_PAGE, PAGE_SIZE};
use sable_common::types::{FileId, PageId, Rid};
use sable_common::{SableError, SableResult};

use crate::buffer::BufferPool;
use crate::disk::DiskManager;

/// Byte size of the data-page header (`next_free` + `used`).
const DATA_HEADER: usize = 8;

/// `next_free` sentinel for a page that is not on the free list.
/// Distinct from [`NO_PAGE`], which marks the list tail.
const NOT_ON_LIST: i32 = -2;

/// Cached copy of the file header page.
#[derive(Debug, Clone)]
pub(crate) struct HeapHeader {
    pub record_size: usize,
    pub records_per_page: usize,
    pub bitmap_bytes: usize,
    /// Total allocated pages, including the header page.
    pub num_pages: i32,
    /// Head of the free-page list.
    pub first_free: i32,
    pub num_records: u64,
}

impl HeapHeader {
    fn encode(&self, buf: &mut [u8]) {
        let mut w = &mut buf[..];
        w.put_u32_le(self.record_size as u32);
        w.put_u32_le(self.records_per_page as u32);
        w.put_u32_le(self.bitmap_bytes as u32);
        w.put_i32_le(self.num_pages);
        w.put_i32_le(self.first_free);
        w.put_u64_le(self.num_records);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut r = buf;
        Self {
            record_size: r.get_u32_le() as usize,
            records_per_page: r.get_u32_le() as usize,
            bitmap_bytes: r.get_u32_le() as usize,
            num_pages: r.get_i32_le(),
            first_free: r.get_i32_le(),
            num_records: r.get_u64_le(),
        }
    }
}

/// Computes how many fixed-width slots fit on a data page.
fn slots_per_page(record_size: usize) -> usize {
    let usable = (PAGE_SIZE - DATA_HEADER) * 8;
    let mut n = usable / (record_size * 8 + 1);
    while n > 0 && DATA_HEADER + n.div_ceil(8) + n * record_size > PAGE_SIZE {
        n -= 1;
    }
    n
}

/// An open table heap.
pub struct RecordFile {
    pool: Arc<BufferPool>,
    file: FileId,
    hdr: Mutex<HeapHeader>,
}

impl RecordFile {
    /// Creates a new heap file for records of `record_size` bytes.
    pub fn create(disk: &DiskManager, name: &str, record_size: usize) -> SableResult<()> {
        let records_per_page = slots_per_page(record_size);
        if records_per_page == 0 {
            return Err(SableError::internal(format!(
                "record of {record_size} bytes does not fit a page"
            )));
        }
        disk.create_file(name)?;
        let file = disk.open_file(name)?;
        let hdr = HeapHeader {
            record_size,
            records_per_page,
            bitmap_bytes: records_per_page.div_ceil(8),
            num_pages: 1,
            first_free: NO_PAGE,
            num_records: 0,
        };
        let mut page = vec![0u8; PAGE_SIZE];
        hdr.encode(&mut page);
        let page_no = disk.allocate_page(file)?;
        debug_assert_eq!(page_no, 0);
        disk.write_page(file, 0, &page)?;
        disk.close_file(file)?;
        debug!(name, record_size, records_per_page, "created heap file");
        Ok(())
    }

    /// Opens an existing heap file.
    pub fn open(disk: &DiskManager, pool: Arc<BufferPool>, name: &str) -> SableResult<Self> {
        let file = disk.open_file(name)?;
        let hdr = {
            let guard = pool.fetch_page(PageId::new(file, 0))?;
            let data = guard.read();
            HeapHeader::decode(&data)
        };
        Ok(Self {
            pool,
            file,
            hdr: Mutex::new(hdr),
        })
    }

    /// The underlying file handle.
    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Record size in bytes.
    pub fn record_size(&self) -> usize {
        self.hdr.lock().record_size
    }

    /// Number of live records.
    pub fn num_records(&self) -> u64 {
        self.hdr.lock().num_records
    }

    pub(crate) fn header(&self) -> HeapHeader {
        self.hdr.lock().clone()
    }

    fn write_header(&self, hdr: &HeapHeader) -> SableResult<()> {
        let guard = self.pool.fetch_page(PageId::new(self.file, 0))?;
        hdr.encode(&mut guard.write());
        Ok(())
    }

    /// Inserts a record, returning its stable id.
    pub fn insert(&self, record: &[u8]) -> SableResult<Rid> {
        let mut hdr = self.hdr.lock();
        if record.len() != hdr.record_size {
            return Err(SableError::internal(format!(
                "record length {} != schema length {}",
                record.len(),
                hdr.record_size
            )));
        }

        loop {
            let guard = if hdr.first_free == NO_PAGE {
                let guard = self.pool.new_page(self.file)?;
                {
                    let mut data = guard.write();
                    (&mut data[..]).put_i32_le(NO_PAGE);
                }
                hdr.num_pages += 1;
                hdr.first_free = guard.page_id().page_no;
                guard
            } else {
                self.pool.fetch_page(PageId::new(self.file, hdr.first_free))?
            };

            let page_no = guard.page_id().page_no;
            let slot_no;
            {
                let mut data = guard.write();
                let used = (&data[4..8]).get_u32_le() as usize;
                if used == hdr.records_per_page {
                    // A full page can linger at the head after a
                    // targeted reinsert; unlink it and retry.
                    hdr.first_free = (&data[0..4]).get_i32_le();
                    (&mut data[0..4]).put_i32_le(NOT_ON_LIST);
                    continue;
                }
                slot_no = first_clear_bit(&data[DATA_HEADER..DATA_HEADER + hdr.bitmap_bytes])
                    .ok_or_else(|| SableError::internal("free-list page has no vacant slot"))?;
                if slot_no >= hdr.records_per_page {
                    return Err(SableError::internal("slot bitmap out of bounds"));
                }
                set_bit(&mut data[DATA_HEADER..], slot_no);
                let off = DATA_HEADER + hdr.bitmap_bytes + slot_no * hdr.record_size;
                data[off..off + hdr.record_size].copy_from_slice(record);
                let used = used + 1;
                (&mut data[4..8]).put_u32_le(used as u32);
                if used == hdr.records_per_page {
                    // Page is full: unlink it from the free list.
                    hdr.first_free = (&data[0..4]).get_i32_le();
                    (&mut data[0..4]).put_i32_le(NOT_ON_LIST);
                }
            }
            hdr.num_records += 1;
            self.write_header(&hdr)?;
            return Ok(Rid::new(page_no, slot_no as i32));
        }
    }

    /// Reinserts a record at a specific rid, e.g. when a delete is
    /// rolled back. The slot must be vacant on an already allocated
    /// page. The page is not relinked into the free list here; a later
    /// insert pass skips full pages it finds at the list head.
    pub fn insert_at(&self, rid: Rid, record: &[u8]) -> SableResult<()> {
        let mut hdr = self.hdr.lock();
        self.check_rid(&hdr, rid)?;
        if record.len() != hdr.record_size {
            return Err(SableError::internal(format!(
                "record length {} != schema length {}",
                record.len(),
                hdr.record_size
            )));
        }
        let guard = self.pool.fetch_page(PageId::new(self.file, rid.page_no))?;
        {
            let mut data = guard.write();
            if bit_set(&data[DATA_HEADER..], rid.slot_no as usize) {
                return Err(SableError::internal(format!(
                    "reinsert into occupied slot at {rid}"
                )));
            }
            set_bit(&mut data[DATA_HEADER..], rid.slot_no as usize);
            let off = DATA_HEADER + hdr.bitmap_bytes + rid.slot_no as usize * hdr.record_size;
            data[off..off + hdr.record_size].copy_from_slice(record);
            let used = (&data[4..8]).get_u32_le() as usize;
            (&mut data[4..8]).put_u32_le((used + 1) as u32);
        }
        hdr.num_records += 1;
        self.write_header(&hdr)?;
        Ok(())
    }

    /// Fetches the record at `rid`.
    pub fn get(&self, rid: Rid) -> SableResult<Vec<u8>> {
        let hdr = self.hdr.lock();
        self.check_rid(&hdr, rid)?;
        let guard = self.pool.fetch_page(PageId::new(self.file, rid.page_no))?;
        let data = guard.read();
        if !bit_set(&data[DATA_HEADER..], rid.slot_no as usize) {
            return Err(SableError::RecordNotFound { rid });
        }
        let off = DATA_HEADER + hdr.bitmap_bytes + rid.slot_no as usize * hdr.record_size;
        Ok(data[off..off + hdr.record_size].to_vec())
    }

    /// Overwrites the record at `rid` in place.
    pub fn update(&self, rid: Rid, record: &[u8]) -> SableResult<()> {
        let hdr = self.hdr.lock();
        self.check_rid(&hdr, rid)?;
        let guard = self.pool.fetch_page(PageId::new(self.file, rid.page_no))?;
        let mut data = guard.write();
        if !bit_set(&data[DATA_HEADER..], rid.slot_no as usize) {
            return Err(SableError::RecordNotFound { rid });
        }
        let off = DATA_HEADER + hdr.bitmap_bytes + rid.slot_no as usize * hdr.record_size;
        data[off..off + hdr.record_size].copy_from_slice(record);
        Ok(())
    }

    /// Deletes the record at `rid`, invalidating the id.
    pub fn delete(&self, rid: Rid) -> SableResult<()> {
        let mut hdr = self.hdr.lock();
        self.check_rid(&hdr, rid)?;
        let guard = self.pool.fetch_page(PageId::new(self.file, rid.page_no))?;
        {
            let mut data = guard.write();
            if !bit_set(&data[DATA_HEADER..], rid.slot_no as usize) {
                return Err(SableError::RecordNotFound { rid });
            }
            clear_bit(&mut data[DATA_HEADER..], rid.slot_no as usize);
            let used = (&data[4..8]).get_u32_le() as usize;
            (&mut data[4..8]).put_u32_le((used - 1) as u32);
            if (&data[0..4]).get_i32_le() == NOT_ON_LIST {
                // Page regained a vacancy while off the list; relink.
                (&mut data[0..4]).put_i32_le(hdr.first_free);
                hdr.first_free = rid.page_no;
            }
        }
        hdr.num_records -= 1;
        self.write_header(&hdr)?;
        Ok(())
    }

    /// Forward scan over live records in page-then-slot order.
    pub fn scan(self: &Arc<Self>) -> HeapScan {
        HeapScan::new(Arc::clone(self))
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    fn check_rid(&self, hdr: &HeapHeader, rid: Rid) -> SableResult<()> {
        if rid.page_no < 1
            || rid.page_no >= hdr.num_pages
            || rid.slot_no < 0
            || rid.slot_no as usize >= hdr.records_per_page
        {
            return Err(SableError::RecordNotFound { rid });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hdr = self.hdr.lock();
        f.debug_struct("RecordFile")
            .field("file", &self.file)
            .field("record_size", &hdr.record_size)
            .field("num_records", &hdr.num_records)
            .finish()
    }
}

fn bit_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap[idx / 8] & (1 << (idx % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], idx: usize) {
    bitmap[idx / 8] |= 1 << (idx % 8);
}

fn clear_bit(bitmap: &mut [u8], idx: usize) {
    bitmap[idx / 8] &= !(1 << (idx % 8));
}

fn first_clear_bit(bitmap: &[u8]) -> Option<usize> {
    for (i, &byte) in bitmap.iter().enumerate() {
        if byte != 0xFF {
            return Some(i * 8 + byte.trailing_ones() as usize);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_common::config::EngineConfig;
    use tempfile::TempDir;

    fn open_heap(record_size: usize) -> (TempDir, Arc<DiskManager>, Arc<RecordFile>) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()));
        let pool = Arc::new(BufferPool::new(
            &EngineConfig::default(),
            Arc::clone(&disk),
        ));
        RecordFile::create(&disk, "t.tbl", record_size).unwrap();
        let heap = Arc::new(RecordFile::open(&disk, pool, "t.tbl").unwrap());
        (dir, disk, heap)
    }

    fn rec(record_size: usize, tag: u8) -> Vec<u8> {
        let mut r = vec![0u8; record_size];
        r[0] = tag;
        r
    }

    #[test]
    fn test_insert_get_round_trip() {
        let (_dir, _disk, heap) = open_heap(16);
        let rid = heap.insert(&rec(16, 1)).unwrap();
        assert_eq!(heap.get(rid).unwrap()[0], 1);
        assert_eq!(heap.num_records(), 1);
    }

    #[test]
    fn test_update_in_place_keeps_rid() {
        let (_dir, _disk, heap) = open_heap(16);
        let rid = heap.insert(&rec(16, 1)).unwrap();
        heap.update(rid, &rec(16, 2)).unwrap();
        assert_eq!(heap.get(rid).unwrap()[0], 2);
    }

    #[test]
    fn test_delete_invalidates_rid() {
        let (_dir, _disk, heap) = open_heap(16);
        let rid = heap.insert(&rec(16, 1)).unwrap();
        heap.delete(rid).unwrap();
        assert!(matches!(
            heap.get(rid),
            Err(SableError::RecordNotFound { .. })
        ));
        assert_eq!(heap.num_records(), 0);
    }

    #[test]
    fn test_out_of_range_rid() {
        let (_dir, _disk, heap) = open_heap(16);
        assert!(matches!(
            heap.get(Rid::new(99, 0)),
            Err(SableError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_slot_reuse_after_delete() {
        let (_dir, _disk, heap) = open_heap(16);
        let per_page = slots_per_page(16);
        // Fill one page completely, delete in the middle, reinsert.
        let rids: Vec<Rid> = (0..per_page)
            .map(|i| heap.insert(&rec(16, i as u8)).unwrap())
            .collect();
        heap.delete(rids[3]).unwrap();
        let rid = heap.insert(&rec(16, 0xEE)).unwrap();
        assert_eq!(rid, rids[3]);
        assert_eq!(heap.get(rid).unwrap()[0], 0xEE);
    }

    #[test]
    fn test_scan_spans_pages_in_order() {
        let (_dir, _disk, heap) = open_heap(64);
        let n = slots_per_page(64) * 3 + 5;
        let mut expected = Vec::new();
        for i in 0..n {
            expected.push(heap.insert(&rec(64, (i % 251) as u8)).unwrap());
        }
        let seen: Vec<Rid> = heap.scan().map(|r| r.unwrap()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_skips_deleted() {
        let (_dir, _disk, heap) = open_heap(16);
        let a = heap.insert(&rec(16, 1)).unwrap();
        let b = heap.insert(&rec(16, 2)).unwrap();
        let c = heap.insert(&rec(16, 3)).unwrap();
        heap.delete(b).unwrap();
        let seen: Vec<Rid> = heap.scan().map(|r| r.unwrap()).collect();
        assert_eq!(seen, vec![a, c]);
    }

    #[test]
    fn test_insert_at_restores_deleted_record() {
        let (_dir, _disk, heap) = open_heap(16);
        let a = heap.insert(&rec(16, 1)).unwrap();
        let b = heap.insert(&rec(16, 2)).unwrap();
        let old = heap.get(b).unwrap();
        heap.delete(b).unwrap();

        heap.insert_at(b, &old).unwrap();
        assert_eq!(heap.get(b).unwrap()[0], 2);
        assert_eq!(heap.num_records(), 2);
        // Reinsert into an occupied slot is refused.
        assert!(heap.insert_at(a, &old).is_err());
    }

    #[test]
    fn test_reopen_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path()));
        let pool = Arc::new(BufferPool::new(
            &EngineConfig::default(),
            Arc::clone(&disk),
        ));
        RecordFile::create(&disk, "t.tbl", 16).unwrap();
        let rid;
        {
            let heap = RecordFile::open(&disk, Arc::clone(&pool), "t.tbl").unwrap();
            rid = heap.insert(&rec(16, 7)).unwrap();
            pool.flush_file(heap.file_id()).unwrap();
            pool.evict_file(heap.file_id()).unwrap();
            disk.close_file(heap.file_id()).unwrap();
        }
        let heap = RecordFile::open(&disk, pool, "t.tbl").unwrap();
        assert_eq!(heap.get(rid).unwrap()[0], 7);
        assert_eq!(heap.num_records(), 1);
    }
}
