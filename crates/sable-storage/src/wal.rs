//! Minimal write-ahead log.
//!
//! An append-only journal of length-prefixed records. Recovery is out
//! of scope for the engine; the log exists so the checkpoint command
//! has something to flush and truncate, and so committed statements
//! leave a durable trace.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::BufMut;
use parking_lot::Mutex;
use tracing::debug;

use sable_common::SableResult;

/// Append-only log file.
pub struct LogManager {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogManager {
    /// Opens (creating if absent) the log file.
    pub fn open(path: impl Into<PathBuf>) -> SableResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one length-prefixed record.
    pub fn append(&self, record: &[u8]) -> SableResult<()> {
        let mut buf = Vec::with_capacity(4 + record.len());
        buf.put_u32_le(record.len() as u32);
        buf.extend_from_slice(record);
        let mut file = self.file.lock();
        file.write_all(&buf)?;
        Ok(())
    }

    /// Forces buffered records to durable storage.
    pub fn flush(&self) -> SableResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Discards the log contents. Best effort: no checkpoint record is
    /// written, so the truncation point is not crash-consistent.
    pub fn truncate(&self) -> SableResult<()> {
        let mut file = self.file.lock();
        *file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        debug!(path = %self.path.display(), "truncated log");
        Ok(())
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogManager({})", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.log");
        let log = LogManager::open(&path).unwrap();
        log.append(b"hello").unwrap();
        log.append(b"world").unwrap();
        log.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * (4 + 5));

        log.truncate().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        // Still usable after truncation.
        log.append(b"again").unwrap();
        log.flush().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 + 5);
    }
}
