//! Forward leaf-chain scan over a key range.

use std::sync::Arc;

use sable_common::types::{Iid, Rid};
use sable_common::SableResult;

use super::BTreeIndex;

/// Iterator over `[lower, upper)` positions of an index, yielding the
/// stored record ids in key order.
pub struct BTreeScan {
    index: Arc<BTreeIndex>,
    cur: Iid,
    upper: Iid,
}

impl BTreeScan {
    pub(crate) fn new(index: Arc<BTreeIndex>, lower: Iid, upper: Iid) -> Self {
        Self {
            index,
            cur: lower,
            upper,
        }
    }

    fn step(&mut self) -> SableResult<Option<Rid>> {
        if self.cur == self.upper {
            return Ok(None);
        }
        let node = self.index.fetch_node(self.cur.page_no)?;
        let rid = node.value(self.cur.slot_no as usize);

        self.cur.slot_no += 1;
        if self.cur.slot_no as usize >= node.num_keys() && self.cur.page_no != self.upper.page_no {
            self.cur = Iid::new(node.next_leaf(), 0);
        }
        Ok(Some(rid))
    }
}

impl std::fmt::Debug for BTreeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeScan")
            .field("cur", &self.cur)
            .field("upper", &self.upper)
            .finish()
    }
}

impl Iterator for BTreeScan {
    type Item = SableResult<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
