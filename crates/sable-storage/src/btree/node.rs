//! B+-tree node pages.
//!
//! # Node layout
//!
//! ```text
//! +---------------------+
//! | num_keys:  u32      |
//! | is_leaf:   u32      |
//! | parent:    i32      |
//! | prev_leaf: i32      |
//! | next_leaf: i32      |
//! +---------------------+
//! | keys   [max_size]   |  key_len bytes each, sorted ascending
//! +---------------------+
//! | values [max_size]   |  8 bytes each: (page_no, slot_no)
//! +---------------------+
//! ```
//!
//! In a leaf, `values[i]` is the record id paired with `keys[i]`. In an
//! internal node, `values[i].page_no` is the child holding the subtree
//! whose first key is `keys[i]`; `slot_no` is unused (-1).

use std::cmp::Ordering;

use bytes::{Buf, BufMut};

use sable_common::constants::NO_PAGE;
use sable_common::types::Rid;

use super::KeySchema;
use crate::buffer::PageGuard;

/// Byte size of the node header.
pub(crate) const NODE_HEADER: usize = 20;

/// Byte size of one stored value.
pub(crate) const VALUE_LEN: usize = 8;

const OFF_NUM_KEYS: usize = 0;
const OFF_IS_LEAF: usize = 4;
const OFF_PARENT: usize = 8;
const OFF_PREV_LEAF: usize = 12;
const OFF_NEXT_LEAF: usize = 16;

/// A pinned B+-tree node.
///
/// Dropping the node unpins its page. Every accessor takes the frame
/// lock for just that access; structural consistency across accesses is
/// provided by the tree latch in [`super::BTreeIndex`].
pub(crate) struct Node {
    guard: PageGuard,
    key_len: usize,
    max_size: usize,
}

impl Node {
    pub fn new(guard: PageGuard, key_len: usize, max_size: usize) -> Self {
        Self {
            guard,
            key_len,
            max_size,
        }
    }

    #[inline]
    pub fn page_no(&self) -> i32 {
        self.guard.page_id().page_no
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Minimum occupancy of a non-root node. Half the capacity,
    /// rounded down so a split of a full node leaves both halves
    /// legal at any fan-out.
    #[inline]
    pub fn min_size(&self) -> usize {
        self.max_size / 2
    }

    fn read_u32(&self, off: usize) -> u32 {
        let data = self.guard.read();
        (&data[off..off + 4]).get_u32_le()
    }

    fn read_i32(&self, off: usize) -> i32 {
        let data = self.guard.read();
        (&data[off..off + 4]).get_i32_le()
    }

    fn write_u32(&self, off: usize, v: u32) {
        let mut data = self.guard.write();
        (&mut data[off..off + 4]).put_u32_le(v);
    }

    fn write_i32(&self, off: usize, v: i32) {
        let mut data = self.guard.write();
        (&mut data[off..off + 4]).put_i32_le(v);
    }

    pub fn num_keys(&self) -> usize {
        self.read_u32(OFF_NUM_KEYS) as usize
    }

    pub fn set_num_keys(&self, n: usize) {
        self.write_u32(OFF_NUM_KEYS, n as u32);
    }

    pub fn is_leaf(&self) -> bool {
        self.read_u32(OFF_IS_LEAF) != 0
    }

    pub fn parent(&self) -> i32 {
        self.read_i32(OFF_PARENT)
    }

    pub fn set_parent(&self, page_no: i32) {
        self.write_i32(OFF_PARENT, page_no);
    }

    pub fn prev_leaf(&self) -> i32 {
        self.read_i32(OFF_PREV_LEAF)
    }

    pub fn set_prev_leaf(&self, page_no: i32) {
        self.write_i32(OFF_PREV_LEAF, page_no);
    }

    pub fn next_leaf(&self) -> i32 {
        self.read_i32(OFF_NEXT_LEAF)
    }

    pub fn set_next_leaf(&self, page_no: i32) {
        self.write_i32(OFF_NEXT_LEAF, page_no);
    }

    /// Initializes a zeroed page as an empty node.
    pub fn init(&self, is_leaf: bool, parent: i32) {
        let mut data = self.guard.write();
        let mut w = &mut data[..NODE_HEADER];
        w.put_u32_le(0);
        w.put_u32_le(u32::from(is_leaf));
        w.put_i32_le(parent);
        w.put_i32_le(NO_PAGE);
        w.put_i32_le(NO_PAGE);
    }

    #[inline]
    fn key_off(&self, idx: usize) -> usize {
        NODE_HEADER + idx * self.key_len
    }

    #[inline]
    fn value_off(&self, idx: usize) -> usize {
        NODE_HEADER + self.max_size * self.key_len + idx * VALUE_LEN
    }

    /// Copies out the key at `idx`.
    pub fn key(&self, idx: usize) -> Vec<u8> {
        debug_assert!(idx < self.num_keys());
        let data = self.guard.read();
        let off = self.key_off(idx);
        data[off..off + self.key_len].to_vec()
    }

    /// Overwrites the key at `idx`.
    pub fn set_key(&self, idx: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.key_len);
        let mut data = self.guard.write();
        let off = self.key_off(idx);
        data[off..off + self.key_len].copy_from_slice(key);
    }

    /// Reads the value at `idx`.
    pub fn value(&self, idx: usize) -> Rid {
        let data = self.guard.read();
        let mut r = &data[self.value_off(idx)..];
        Rid::new(r.get_i32_le(), r.get_i32_le())
    }

    /// Child page number at `idx` (internal nodes).
    #[inline]
    pub fn child(&self, idx: usize) -> i32 {
        self.value(idx).page_no
    }

    /// First index whose key is >= `target`.
    pub fn lower_bound(&self, schema: &KeySchema, target: &[u8]) -> usize {
        let data = self.guard.read();
        let (mut lo, mut hi) = (0, self.count(&data));
        while lo < hi {
            let mid = (lo + hi) / 2;
            let off = self.key_off(mid);
            match schema.compare(&data[off..off + self.key_len], target) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    /// First index whose key is > `target`.
    pub fn upper_bound(&self, schema: &KeySchema, target: &[u8]) -> usize {
        let data = self.guard.read();
        let (mut lo, mut hi) = (0, self.count(&data));
        while lo < hi {
            let mid = (lo + hi) / 2;
            let off = self.key_off(mid);
            match schema.compare(&data[off..off + self.key_len], target) {
                Ordering::Greater => hi = mid,
                _ => lo = mid + 1,
            }
        }
        lo
    }

    fn count(&self, data: &[u8]) -> usize {
        (&data[OFF_NUM_KEYS..OFF_NUM_KEYS + 4]).get_u32_le() as usize
    }

    /// Child slot descending for `target` in an internal node: the last
    /// child whose separator is <= `target`, never less than child 0.
    pub fn internal_lookup(&self, schema: &KeySchema, target: &[u8]) -> i32 {
        let pos = self.upper_bound(schema, target).max(1);
        self.child(pos - 1)
    }

    /// Index of the child pointing at `page_no` (internal nodes).
    pub fn find_child(&self, page_no: i32) -> Option<usize> {
        let n = self.num_keys();
        (0..n).find(|&i| self.child(i) == page_no)
    }

    /// Inserts `count` consecutive entries at `pos`, shifting the tail.
    pub fn insert_entries(&self, pos: usize, keys: &[u8], values: &[Rid]) {
        let count = values.len();
        debug_assert_eq!(keys.len(), count * self.key_len);
        let n = self.count(&self.guard.read());
        debug_assert!(pos <= n && n + count <= self.max_size);

        let mut data = self.guard.write();
        // Shift keys.
        let src = self.key_off(pos);
        data.copy_within(src..self.key_off(n), self.key_off(pos + count));
        data[src..src + keys.len()].copy_from_slice(keys);
        // Shift values.
        let src = self.value_off(pos);
        data.copy_within(src..self.value_off(n), self.value_off(pos + count));
        let mut w = &mut data[src..];
        for v in values {
            w.put_i32_le(v.page_no);
            w.put_i32_le(v.slot_no);
        }
        (&mut data[OFF_NUM_KEYS..OFF_NUM_KEYS + 4]).put_u32_le((n + count) as u32);
    }

    /// Inserts one entry at `pos`.
    pub fn insert_at(&self, pos: usize, key: &[u8], value: Rid) {
        self.insert_entries(pos, key, &[value]);
    }

    /// Removes the entry at `pos`, shifting the tail left.
    pub fn erase_at(&self, pos: usize) {
        let n = self.count(&self.guard.read());
        debug_assert!(pos < n);
        let mut data = self.guard.write();
        data.copy_within(self.key_off(pos + 1)..self.key_off(n), self.key_off(pos));
        data.copy_within(
            self.value_off(pos + 1)..self.value_off(n),
            self.value_off(pos),
        );
        (&mut data[OFF_NUM_KEYS..OFF_NUM_KEYS + 4]).put_u32_le((n - 1) as u32);
    }

    /// Copies out `count` entries starting at `from`.
    pub fn entries(&self, from: usize, count: usize) -> (Vec<u8>, Vec<Rid>) {
        let data = self.guard.read();
        let koff = self.key_off(from);
        let keys = data[koff..koff + count * self.key_len].to_vec();
        let mut values = Vec::with_capacity(count);
        let mut r = &data[self.value_off(from)..];
        for _ in 0..count {
            values.push(Rid::new(r.get_i32_le(), r.get_i32_le()));
        }
        (keys, values)
    }

    /// Link slot reused on freed pages (overlays `num_keys`).
    pub fn free_next(&self) -> i32 {
        self.read_i32(OFF_NUM_KEYS)
    }

    /// Marks this page free, chaining to the previous free head.
    pub fn set_free_next(&self, page_no: i32) {
        self.write_i32(OFF_NUM_KEYS, page_no);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("page", &self.page_no())
            .field("leaf", &self.is_leaf())
            .field("keys", &self.num_keys())
            .finish()
    }
}
