//! Disk manager: raw page I/O over files in a database directory.
//!
//! Every table heap, index, and the log live in their own file. Files
//! are addressed by [`FileId`] once opened; pages by `i32` page number.
//! Reading a page that was allocated but never written yields zeroes,
//! so callers can treat fresh pages as zero-initialized.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use sable_common::constants::PAGE_SIZE;
use sable_common::types::FileId;
use sable_common::{SableError, SableResult};

struct OpenFile {
    file: File,
    path: PathBuf,
    /// Next page number to hand out, seeded from the file length.
    next_page_no: AtomicI32,
}

/// Manages the page files of one database directory.
pub struct DiskManager {
    root: PathBuf,
    files: RwLock<HashMap<FileId, OpenFile>>,
    next_file_id: AtomicU32,
}

impl DiskManager {
    /// Creates a disk manager rooted at the given database directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(HashMap::new()),
            next_file_id: AtomicU32::new(0),
        }
    }

    /// Returns the database directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns true if the named file exists.
    pub fn is_file(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    /// Creates a new empty file. Fails if it already exists.
    pub fn create_file(&self, name: &str) -> SableResult<()> {
        let path = self.resolve(name);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        debug!(file = %path.display(), "created file");
        Ok(())
    }

    /// Opens an existing file and registers it for page I/O.
    pub fn open_file(&self, name: &str) -> SableResult<FileId> {
        let path = self.resolve(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        let next_page_no = (len as usize).div_ceil(PAGE_SIZE) as i32;

        let id = FileId::new(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        self.files.write().insert(
            id,
            OpenFile {
                file,
                path,
                next_page_no: AtomicI32::new(next_page_no),
            },
        );
        Ok(id)
    }

    /// Closes an open file handle.
    pub fn close_file(&self, id: FileId) -> SableResult<()> {
        self.files
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| SableError::internal(format!("close of unknown file {id}")))
    }

    /// Removes a file from disk. The file must not be open.
    pub fn remove_file(&self, name: &str) -> SableResult<()> {
        let path = self.resolve(name);
        std::fs::remove_file(&path)?;
        debug!(file = %path.display(), "removed file");
        Ok(())
    }

    /// Reads one page into `buf`. Short reads past the end of the file
    /// are zero-filled.
    pub fn read_page(&self, id: FileId, page_no: i32, buf: &mut [u8]) -> SableResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let files = self.files.read();
        let entry = files
            .get(&id)
            .ok_or_else(|| SableError::internal(format!("read from unknown file {id}")))?;
        let offset = page_no as u64 * PAGE_SIZE as u64;

        let mut read = 0;
        while read < buf.len() {
            match entry.file.read_at(&mut buf[read..], offset + read as u64)? {
                0 => break,
                n => read += n,
            }
        }
        buf[read..].fill(0);
        Ok(())
    }

    /// Writes one page.
    pub fn write_page(&self, id: FileId, page_no: i32, buf: &[u8]) -> SableResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let files = self.files.read();
        let entry = files
            .get(&id)
            .ok_or_else(|| SableError::internal(format!("write to unknown file {id}")))?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        entry.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Hands out the next unused page number of a file.
    pub fn allocate_page(&self, id: FileId) -> SableResult<i32> {
        let files = self.files.read();
        let entry = files
            .get(&id)
            .ok_or_else(|| SableError::internal(format!("allocation in unknown file {id}")))?;
        Ok(entry.next_page_no.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of pages currently allocated in the file.
    pub fn num_pages(&self, id: FileId) -> SableResult<i32> {
        let files = self.files.read();
        let entry = files
            .get(&id)
            .ok_or_else(|| SableError::internal(format!("unknown file {id}")))?;
        Ok(entry.next_page_no.load(Ordering::Relaxed))
    }

    /// Syncs a file's contents to durable storage.
    pub fn sync_file(&self, id: FileId) -> SableResult<()> {
        let files = self.files.read();
        let entry = files
            .get(&id)
            .ok_or_else(|| SableError::internal(format!("sync of unknown file {id}")))?;
        entry.file.sync_data()?;
        Ok(())
    }

    /// Path of an open file, for diagnostics.
    pub fn file_path(&self, id: FileId) -> Option<PathBuf> {
        self.files.read().get(&id).map(|f| f.path.clone())
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("root", &self.root)
            .field("open_files", &self.files.read().len())
            .finish()
    }
}
