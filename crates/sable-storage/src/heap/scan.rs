//! Forward scan over a record file.

use std::sync::Arc;

use sable_common::constants::NO_PAGE;
use sable_common::types::{PageId, Rid};
use sable_common::SableResult;

use super::{bit_set, HeapHeader, RecordFile, DATA_HEADER};

/// Iterator over the live records of a heap, in page-then-slot order.
///
/// Concurrent insertions behind the current position may or may not be
/// observed; positions already passed are never revisited.
pub struct HeapScan {
    file: Arc<RecordFile>,
    hdr: HeapHeader,
    page_no: i32,
    slot_no: i32,
}

impl HeapScan {
    pub(crate) fn new(file: Arc<RecordFile>) -> Self {
        let hdr = file.header();
        Self {
            file,
            hdr,
            page_no: 1,
            slot_no: -1,
        }
    }

    /// Advances to the next occupied slot, or `None` at end of file.
    fn advance(&mut self) -> SableResult<Option<Rid>> {
        while self.page_no < self.hdr.num_pages {
            let guard = self
                .file
                .pool()
                .fetch_page(PageId::new(self.file.file_id(), self.page_no))?;
            let data = guard.read();
            let bitmap = &data[DATA_HEADER..DATA_HEADER + self.hdr.bitmap_bytes];
            let mut slot = self.slot_no + 1;
            while (slot as usize) < self.hdr.records_per_page {
                if bit_set(bitmap, slot as usize) {
                    self.slot_no = slot;
                    return Ok(Some(Rid::new(self.page_no, slot)));
                }
                slot += 1;
            }
            self.page_no += 1;
            self.slot_no = -1;
        }
        self.page_no = NO_PAGE;
        Ok(None)
    }
}

impl std::fmt::Debug for HeapScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapScan")
            .field("page", &self.page_no)
            .field("slot", &self.slot_no)
            .finish()
    }
}

impl Iterator for HeapScan {
    type Item = SableResult<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page_no == NO_PAGE {
            return None;
        }
        self.advance().transpose()
    }
}
