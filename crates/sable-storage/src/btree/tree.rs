//! The B+-tree proper: descent, insert with splits, delete with
//! coalesce/redistribute, bound lookups.
//!
//! Writers hold the tree latch for the whole operation; readers share
//! it and rely on page pins while descending. The root page number and
//! the leaf-chain endpoints live in the file header page and are only
//! read or written under the latch.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use tracing::debug;

use sable_common::constants::{NO_PAGE, PAGE_SIZE};
use sable_common::types::{FileId, Iid, PageId, Rid};
use sable_common::{SableError, SableResult};

use super::node::{Node, NODE_HEADER, VALUE_LEN};
use super::scan::BTreeScan;
use super::KeySchema;
use crate::buffer::BufferPool;
use crate::disk::DiskManager;

/// Mutable header state of an index file, cached under the tree latch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeState {
    pub root: i32,
    pub first_leaf: i32,
    pub last_leaf: i32,
    pub free_head: i32,
    pub num_pages: i32,
}

impl TreeState {
    fn encode(&self, key_len: usize, buf: &mut [u8]) {
        let mut w = &mut buf[..];
        w.put_u32_le(key_len as u32);
        w.put_i32_le(self.root);
        w.put_i32_le(self.first_leaf);
        w.put_i32_le(self.last_leaf);
        w.put_i32_le(self.free_head);
        w.put_i32_le(self.num_pages);
    }

    fn decode(buf: &[u8]) -> (usize, Self) {
        let mut r = buf;
        let key_len = r.get_u32_le() as usize;
        let state = Self {
            root: r.get_i32_le(),
            first_leaf: r.get_i32_le(),
            last_leaf: r.get_i32_le(),
            free_head: r.get_i32_le(),
            num_pages: r.get_i32_le(),
        };
        (key_len, state)
    }
}

/// An open B+-tree index file.
pub struct BTreeIndex {
    pool: Arc<BufferPool>,
    file: FileId,
    schema: KeySchema,
    max_size: usize,
    state: RwLock<TreeState>,
}

impl BTreeIndex {
    /// Creates a new index file with an empty root leaf.
    pub fn create(disk: &DiskManager, name: &str, schema: &KeySchema) -> SableResult<()> {
        let max_size = node_capacity(schema.total_len())?;
        disk.create_file(name)?;
        let file = disk.open_file(name)?;

        let state = TreeState {
            root: 1,
            first_leaf: 1,
            last_leaf: 1,
            free_head: NO_PAGE,
            num_pages: 2,
        };
        let mut header = vec![0u8; PAGE_SIZE];
        state.encode(schema.total_len(), &mut header);
        let mut root = vec![0u8; PAGE_SIZE];
        {
            let mut w = &mut root[..NODE_HEADER];
            w.put_u32_le(0); // num_keys
            w.put_u32_le(1); // is_leaf
            w.put_i32_le(NO_PAGE); // parent
            w.put_i32_le(NO_PAGE); // prev_leaf
            w.put_i32_le(NO_PAGE); // next_leaf
        }
        disk.allocate_page(file)?;
        disk.allocate_page(file)?;
        disk.write_page(file, 0, &header)?;
        disk.write_page(file, 1, &root)?;
        disk.close_file(file)?;
        debug!(name, key_len = schema.total_len(), max_size, "created index");
        Ok(())
    }

    /// Opens an existing index file.
    pub fn open(
        disk: &DiskManager,
        pool: Arc<BufferPool>,
        name: &str,
        schema: KeySchema,
    ) -> SableResult<Self> {
        let max_size = node_capacity(schema.total_len())?;
        let file = disk.open_file(name)?;
        let (key_len, state) = {
            let guard = pool.fetch_page(PageId::new(file, 0))?;
            let data = guard.read();
            TreeState::decode(&data)
        };
        if key_len != schema.total_len() {
            return Err(SableError::internal(format!(
                "index key length mismatch: file has {key_len}, schema has {}",
                schema.total_len()
            )));
        }
        Ok(Self {
            pool,
            file,
            schema,
            max_size,
            state: RwLock::new(state),
        })
    }

    /// The underlying file handle.
    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// The key layout.
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Maximum entries per node.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Point lookup: the rid stored under `key`, if present.
    pub fn get(&self, key: &[u8]) -> SableResult<Option<Rid>> {
        let st = self.state.read();
        let leaf = self.find_leaf(st.root, key)?;
        let pos = leaf.lower_bound(&self.schema, key);
        if pos < leaf.num_keys()
            && self.schema.compare(&leaf.key(pos), key) == Ordering::Equal
        {
            return Ok(Some(leaf.value(pos)));
        }
        Ok(None)
    }

    /// Position of the first entry >= `key`.
    ///
    /// If the position falls past the end of a leaf that has a right
    /// sibling, it is normalized to slot 0 of that sibling.
    pub fn lower_bound(&self, key: &[u8]) -> SableResult<Iid> {
        let st = self.state.read();
        let leaf = self.find_leaf(st.root, key)?;
        let pos = leaf.lower_bound(&self.schema, key);
        Ok(self.position(&st, &leaf, pos))
    }

    /// Position of the first entry > `key`, with the same leaf-boundary
    /// normalization as [`Self::lower_bound`].
    pub fn upper_bound(&self, key: &[u8]) -> SableResult<Iid> {
        let st = self.state.read();
        let leaf = self.find_leaf(st.root, key)?;
        let pos = leaf.upper_bound(&self.schema, key);
        Ok(self.position(&st, &leaf, pos))
    }

    fn position(&self, st: &TreeState, leaf: &Node, pos: usize) -> Iid {
        if pos == leaf.num_keys() && leaf.page_no() != st.last_leaf {
            Iid::new(leaf.next_leaf(), 0)
        } else {
            Iid::new(leaf.page_no(), pos as i32)
        }
    }

    /// Position of the first entry in the tree.
    pub fn leaf_begin(&self) -> SableResult<Iid> {
        let st = self.state.read();
        Ok(Iid::new(st.first_leaf, 0))
    }

    /// Position one past the last entry in the tree.
    pub fn leaf_end(&self) -> SableResult<Iid> {
        let st = self.state.read();
        let leaf = self.fetch_node(st.last_leaf)?;
        Ok(Iid::new(st.last_leaf, leaf.num_keys() as i32))
    }

    /// The rid stored at an index position.
    pub fn rid_at(&self, iid: Iid) -> SableResult<Rid> {
        let node = self.fetch_node(iid.page_no)?;
        if iid.slot_no < 0 || iid.slot_no as usize >= node.num_keys() {
            return Err(SableError::internal(format!(
                "index position {iid} out of bounds"
            )));
        }
        Ok(node.value(iid.slot_no as usize))
    }

    /// Forward scan of `[lower, upper)`.
    pub fn scan(self: &Arc<Self>, lower: Iid, upper: Iid) -> BTreeScan {
        BTreeScan::new(Arc::clone(self), lower, upper)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts a key. Returns false (and changes nothing) if the key is
    /// already present.
    pub fn insert(&self, key: &[u8], rid: Rid) -> SableResult<bool> {
        let mut st = self.state.write();
        let leaf = self.find_leaf(st.root, key)?;
        let pos = leaf.lower_bound(&self.schema, key);
        if pos < leaf.num_keys()
            && self.schema.compare(&leaf.key(pos), key) == Ordering::Equal
        {
            return Ok(false);
        }
        leaf.insert_at(pos, key, rid);
        // Only an insert at slot 0 can change the subtree's first key.
        if pos == 0 {
            self.maintain_parent(&leaf)?;
        }
        if leaf.num_keys() == self.max_size {
            let was_last = leaf.page_no() == st.last_leaf;
            let sibling = self.split_node(&mut st, &leaf)?;
            if was_last {
                st.last_leaf = sibling.page_no();
            }
            let separator = sibling.key(0);
            self.insert_into_parent(&mut st, &leaf, &separator, &sibling)?;
        }
        self.write_state(&st)?;
        Ok(true)
    }

    /// Deletes a key. Returns false if the key was absent.
    pub fn delete(&self, key: &[u8]) -> SableResult<bool> {
        let mut st = self.state.write();
        let leaf = self.find_leaf(st.root, key)?;
        let pos = leaf.lower_bound(&self.schema, key);
        if pos == leaf.num_keys()
            || self.schema.compare(&leaf.key(pos), key) != Ordering::Equal
        {
            return Ok(false);
        }
        leaf.erase_at(pos);
        if pos == 0 && leaf.num_keys() > 0 {
            self.maintain_parent(&leaf)?;
        }
        self.coalesce_or_redistribute(&mut st, leaf)?;
        self.write_state(&st)?;
        Ok(true)
    }

    // =========================================================================
    // Descent and node management
    // =========================================================================

    pub(crate) fn fetch_node(&self, page_no: i32) -> SableResult<Node> {
        let guard = self.pool.fetch_page(PageId::new(self.file, page_no))?;
        Ok(Node::new(guard, self.schema.total_len(), self.max_size))
    }

    /// Walks from `root` to the leaf that owns `key`. Parent pins are
    /// released as the descent passes them.
    fn find_leaf(&self, root: i32, key: &[u8]) -> SableResult<Node> {
        let mut node = self.fetch_node(root)?;
        while !node.is_leaf() {
            let child = node.internal_lookup(&self.schema, key);
            node = self.fetch_node(child)?;
        }
        Ok(node)
    }

    /// Allocates a node page, reusing the free list when possible.
    fn create_node(&self, st: &mut TreeState, is_leaf: bool, parent: i32) -> SableResult<Node> {
        let node = if st.free_head != NO_PAGE {
            let node = self.fetch_node(st.free_head)?;
            st.free_head = node.free_next();
            node
        } else {
            let guard = self.pool.new_page(self.file)?;
            Node::new(guard, self.schema.total_len(), self.max_size)
        };
        st.num_pages += 1;
        node.init(is_leaf, parent);
        Ok(node)
    }

    /// Returns a node's page to the free list.
    fn free_node(&self, st: &mut TreeState, node: &Node) {
        node.set_free_next(st.free_head);
        st.free_head = node.page_no();
        st.num_pages -= 1;
    }

    fn write_state(&self, st: &TreeState) -> SableResult<()> {
        let guard = self.pool.fetch_page(PageId::new(self.file, 0))?;
        st.encode(self.schema.total_len(), &mut guard.write());
        Ok(())
    }

    // =========================================================================
    // Split path
    // =========================================================================

    /// Splits a full node: the left half stays, the right half moves to
    /// a fresh sibling. Leaf siblings are stitched into the chain;
    /// internal siblings reparent the children they received.
    fn split_node(&self, st: &mut TreeState, node: &Node) -> SableResult<Node> {
        let is_leaf = node.is_leaf();
        let sibling = self.create_node(st, is_leaf, node.parent())?;
        if is_leaf {
            sibling.set_prev_leaf(node.page_no());
            sibling.set_next_leaf(node.next_leaf());
            node.set_next_leaf(sibling.page_no());
            if sibling.next_leaf() != NO_PAGE {
                let next = self.fetch_node(sibling.next_leaf())?;
                next.set_prev_leaf(sibling.page_no());
            }
        }
        let split = self.max_size / 2;
        let count = node.num_keys() - split;
        let (keys, values) = node.entries(split, count);
        sibling.insert_entries(0, &keys, &values);
        node.set_num_keys(split);
        if !is_leaf {
            for i in 0..sibling.num_keys() {
                self.maintain_child(&sibling, i)?;
            }
        }
        debug!(
            page = node.page_no(),
            sibling = sibling.page_no(),
            "split node"
        );
        Ok(sibling)
    }

    /// Propagates a split upward: the separator (first key of the new
    /// right sibling) is inserted after the old node's slot. A root
    /// split grows the tree by one level.
    fn insert_into_parent(
        &self,
        st: &mut TreeState,
        old: &Node,
        separator: &[u8],
        new: &Node,
    ) -> SableResult<()> {
        if old.page_no() == st.root {
            let root = self.create_node(st, false, NO_PAGE)?;
            root.insert_at(0, &old.key(0), Rid::new(old.page_no(), -1));
            root.insert_at(1, separator, Rid::new(new.page_no(), -1));
            old.set_parent(root.page_no());
            new.set_parent(root.page_no());
            st.root = root.page_no();
            debug!(root = st.root, "grew new root");
            return Ok(());
        }

        let parent = self.fetch_node(old.parent())?;
        let idx = parent.find_child(old.page_no()).ok_or_else(|| {
            SableError::internal(format!(
                "page {} not found in parent {}",
                old.page_no(),
                parent.page_no()
            ))
        })?;
        parent.insert_at(idx + 1, separator, Rid::new(new.page_no(), -1));
        new.set_parent(parent.page_no());
        if parent.num_keys() == self.max_size {
            let sibling = self.split_node(st, &parent)?;
            let separator = sibling.key(0);
            self.insert_into_parent(st, &parent, &separator, &sibling)?;
        }
        Ok(())
    }

    // =========================================================================
    // Delete path
    // =========================================================================

    /// Restores the occupancy invariant after a removal. Prefers the
    /// left sibling; redistributes when both nodes together still fill
    /// a node, merges otherwise, rebalancing the parent recursively.
    fn coalesce_or_redistribute(&self, st: &mut TreeState, node: Node) -> SableResult<()> {
        if node.page_no() == st.root {
            return self.adjust_root(st, node);
        }
        if node.num_keys() >= node.min_size() {
            return Ok(());
        }
        let parent = self.fetch_node(node.parent())?;
        let idx = parent.find_child(node.page_no()).ok_or_else(|| {
            SableError::internal(format!(
                "page {} not found in parent {}",
                node.page_no(),
                parent.page_no()
            ))
        })?;
        let neighbor_idx = if idx > 0 { idx - 1 } else { 1 };
        let neighbor = self.fetch_node(parent.child(neighbor_idx))?;

        if node.num_keys() + neighbor.num_keys() >= self.max_size {
            self.redistribute(&neighbor, &node, &parent, idx)?;
            Ok(())
        } else {
            self.coalesce(st, neighbor, node, parent, idx)
        }
    }

    /// Collapses the root when it has shrunk below usefulness: an
    /// internal root with a single child hands the root role to that
    /// child; an empty leaf root simply stays the (empty) tree.
    fn adjust_root(&self, st: &mut TreeState, root: Node) -> SableResult<()> {
        if !root.is_leaf() && root.num_keys() == 1 {
            let child_no = root.child(0);
            let child = self.fetch_node(child_no)?;
            child.set_parent(NO_PAGE);
            st.root = child_no;
            self.free_node(st, &root);
            debug!(root = st.root, "collapsed root");
        }
        Ok(())
    }

    /// Moves one entry from `neighbor` into `node` and refreshes the
    /// separator in the parent.
    ///
    /// `idx` is the node's slot in the parent: `idx == 0` means the
    /// neighbor is the right sibling (its first entry moves to the
    /// node's tail and the parent key at `idx + 1` is refreshed);
    /// otherwise the neighbor is the left sibling (its last entry moves
    /// to the node's head and the parent key at `idx` is refreshed).
    fn redistribute(
        &self,
        neighbor: &Node,
        node: &Node,
        parent: &Node,
        idx: usize,
    ) -> SableResult<()> {
        if idx == 0 {
            let key = neighbor.key(0);
            let value = neighbor.value(0);
            node.insert_at(node.num_keys(), &key, value);
            neighbor.erase_at(0);
            parent.set_key(idx + 1, &neighbor.key(0));
            if !node.is_leaf() {
                self.maintain_child(node, node.num_keys() - 1)?;
            }
        } else {
            let last = neighbor.num_keys() - 1;
            let key = neighbor.key(last);
            let value = neighbor.value(last);
            node.insert_at(0, &key, value);
            neighbor.set_num_keys(last);
            parent.set_key(idx, &node.key(0));
            if !node.is_leaf() {
                self.maintain_child(node, 0)?;
            }
        }
        Ok(())
    }

    /// Merges `node` into its left sibling and erases the separator.
    /// When `node` is the left of the pair the two are swapped first so
    /// the survivor is always the left node.
    fn coalesce(
        &self,
        st: &mut TreeState,
        mut neighbor: Node,
        mut node: Node,
        parent: Node,
        mut idx: usize,
    ) -> SableResult<()> {
        if idx == 0 {
            std::mem::swap(&mut neighbor, &mut node);
            idx = 1;
        }
        let start = neighbor.num_keys();
        let (keys, values) = node.entries(0, node.num_keys());
        neighbor.insert_entries(start, &keys, &values);
        if !node.is_leaf() {
            for i in start..neighbor.num_keys() {
                self.maintain_child(&neighbor, i)?;
            }
        }
        if node.is_leaf() {
            neighbor.set_next_leaf(node.next_leaf());
            if node.next_leaf() != NO_PAGE {
                let next = self.fetch_node(node.next_leaf())?;
                next.set_prev_leaf(neighbor.page_no());
            } else {
                st.last_leaf = neighbor.page_no();
            }
        }
        parent.erase_at(idx);
        self.free_node(st, &node);
        debug!(
            merged = node.page_no(),
            into = neighbor.page_no(),
            "coalesced nodes"
        );
        if parent.num_keys() < parent.min_size() {
            self.coalesce_or_redistribute(st, parent)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Invariant maintenance
    // =========================================================================

    /// After a node's first key changed, rewrites the ancestor slots
    /// that quoted it, stopping at the first ancestor left unchanged.
    fn maintain_parent(&self, node: &Node) -> SableResult<()> {
        let mut child_page = node.page_no();
        let mut first_key = node.key(0);
        let mut parent_no = node.parent();
        while parent_no != NO_PAGE {
            let parent = self.fetch_node(parent_no)?;
            let rank = parent.find_child(child_page).ok_or_else(|| {
                SableError::internal(format!(
                    "page {child_page} not found in parent {parent_no}"
                ))
            })?;
            if parent.key(rank) == first_key {
                break;
            }
            parent.set_key(rank, &first_key);
            child_page = parent_no;
            first_key = parent.key(0);
            parent_no = parent.parent();
        }
        Ok(())
    }

    /// Repoints the parent link of the child at `idx` to `node`.
    fn maintain_child(&self, node: &Node, idx: usize) -> SableResult<()> {
        let child = self.fetch_node(node.child(idx))?;
        child.set_parent(node.page_no());
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Tree height: 1 for a lone leaf root, +1 per internal level.
    pub fn height(&self) -> SableResult<usize> {
        let st = self.state.read();
        let mut height = 1;
        let mut node = self.fetch_node(st.root)?;
        while !node.is_leaf() {
            height += 1;
            node = self.fetch_node(node.child(0))?;
        }
        Ok(height)
    }

    /// Walks the whole tree checking structural invariants: occupancy
    /// bounds, key ordering, parent links, separator keys, and the leaf
    /// chain. Intended for tests and debugging.
    pub fn validate(&self) -> SableResult<()> {
        let st = self.state.read();
        let mut leaves = Vec::new();
        self.validate_node(&st, st.root, None, &mut leaves)?;

        // Leaf chain endpoints and stitching.
        if leaves.first() != Some(&st.first_leaf) {
            return Err(SableError::internal("first_leaf does not match leftmost leaf"));
        }
        if leaves.last() != Some(&st.last_leaf) {
            return Err(SableError::internal("last_leaf does not match rightmost leaf"));
        }
        for (i, &page_no) in leaves.iter().enumerate() {
            let leaf = self.fetch_node(page_no)?;
            let want_prev = if i > 0 { leaves[i - 1] } else { NO_PAGE };
            let want_next = if i + 1 < leaves.len() {
                leaves[i + 1]
            } else {
                NO_PAGE
            };
            if leaf.prev_leaf() != want_prev || leaf.next_leaf() != want_next {
                return Err(SableError::internal(format!(
                    "leaf {page_no} has broken chain links"
                )));
            }
        }
        Ok(())
    }

    fn validate_node(
        &self,
        st: &TreeState,
        page_no: i32,
        parent: Option<i32>,
        leaves: &mut Vec<i32>,
    ) -> SableResult<()> {
        let node = self.fetch_node(page_no)?;
        let n = node.num_keys();

        if let Some(parent_no) = parent {
            if node.parent() != parent_no {
                return Err(SableError::internal(format!(
                    "node {page_no} has parent {} instead of {parent_no}",
                    node.parent()
                )));
            }
            if n < node.min_size() || n >= self.max_size {
                return Err(SableError::internal(format!(
                    "node {page_no} occupancy {n} outside [{}, {})",
                    node.min_size(),
                    self.max_size
                )));
            }
        } else if !node.is_leaf() && n < 2 {
            return Err(SableError::internal("internal root has fewer than 2 children"));
        }

        for i in 1..n {
            if self.schema.compare(&node.key(i - 1), &node.key(i)) != Ordering::Less {
                return Err(SableError::internal(format!(
                    "node {page_no} keys not strictly ascending at {i}"
                )));
            }
        }

        if node.is_leaf() {
            leaves.push(page_no);
            return Ok(());
        }
        for i in 0..n {
            let child_no = node.child(i);
            if i > 0 {
                let child = self.fetch_node(child_no)?;
                if child.num_keys() > 0
                    && self.schema.compare(&node.key(i), &child.key(0)) != Ordering::Equal
                {
                    return Err(SableError::internal(format!(
                        "separator {i} of node {page_no} does not quote child's first key"
                    )));
                }
            }
            self.validate_node(st, child_no, Some(page_no), leaves)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.read();
        f.debug_struct("BTreeIndex")
            .field("file", &self.file)
            .field("key_len", &self.schema.total_len())
            .field("root", &st.root)
            .finish()
    }
}

/// Entries per node for a key width; fails for keys too wide to give a
/// workable fan-out.
fn node_capacity(key_len: usize) -> SableResult<usize> {
    let max_size = (PAGE_SIZE - NODE_HEADER) / (key_len + VALUE_LEN);
    if max_size < 4 {
        return Err(SableError::internal(format!(
            "key of {key_len} bytes leaves fan-out {max_size}, need at least 4"
        )));
    }
    Ok(max_size)
}
