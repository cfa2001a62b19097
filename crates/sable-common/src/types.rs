//! Typed identifiers used across the storage and query layers.
//!
//! Pages within a file are numbered by `i32` with `NO_PAGE` (-1) as the
//! sentinel, matching the on-disk header encoding. A record or index
//! position is always a (page, slot) pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::NO_PAGE;

/// Handle to an open page file, assigned by the disk manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FileId(u32);

impl FileId {
    /// Creates a file id from its raw index.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique page address: a page number within a specific file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    /// The owning file.
    pub file: FileId,
    /// Page number within the file.
    pub page_no: i32,
}

impl PageId {
    /// Creates a page id.
    #[inline]
    #[must_use]
    pub const fn new(file: FileId, page_no: i32) -> Self {
        Self { file, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.page_no)
    }
}

/// Record id: the stable address of a record in a table heap.
///
/// A `Rid` survives in-place updates and is invalidated by delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Heap page number.
    pub page_no: i32,
    /// Slot within the page.
    pub slot_no: i32,
}

impl Rid {
    /// A rid that addresses nothing.
    pub const INVALID: Self = Self {
        page_no: NO_PAGE,
        slot_no: -1,
    };

    /// Creates a rid.
    #[inline]
    #[must_use]
    pub const fn new(page_no: i32, slot_no: i32) -> Self {
        Self { page_no, slot_no }
    }

    /// Returns true unless this is the invalid sentinel.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.page_no != NO_PAGE
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// Index position: a key slot inside a B+-tree leaf page.
///
/// Unlike a [`Rid`], an `Iid` is internal to the index and moves as keys
/// shift within and between leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid {
    /// Leaf page number.
    pub page_no: i32,
    /// Key slot within the leaf.
    pub slot_no: i32,
}

impl Iid {
    /// Creates an index position.
    #[inline]
    #[must_use]
    pub const fn new(page_no: i32, slot_no: i32) -> Self {
        Self { page_no, slot_no }
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_validity() {
        assert!(!Rid::INVALID.is_valid());
        assert!(Rid::new(0, 0).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Rid::new(3, 7).to_string(), "(3, 7)");
        assert_eq!(PageId::new(FileId::new(1), 4).to_string(), "1:4");
    }
}
