use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::table::RecordId;

// ┌──────────────────────────────────────────────────────────────────────────┐
// │ LEAF                                                                     │
// │   0            4      count u32                                          │
// │   4 + 16*i    16      entry i: key u64 | rid.pid u32 | rid.sid u32       │
// │   PAGE_SIZE-4  4      next leaf pid (0 = last leaf)                      │
// │──────────────────────────────────────────────────────────────────────────│
// │ NON-LEAF                                                                 │
// │   0            4      count u32 (number of separator keys)               │
// │   4            4      first child pid                                    │
// │   8 + 12*i    12      slot i: separator u64 | child pid u32              │
// └──────────────────────────────────────────────────────────────────────────┘

const COUNT_SIZE: usize = 4;
const LEAF_ENTRY_SIZE: usize = 16;
const LEAF_NEXT_OFFSET: usize = PAGE_SIZE - 4;
const NON_LEAF_FIRST_CHILD: usize = 4;
const NON_LEAF_SLOT_SIZE: usize = 12;
const NON_LEAF_SLOTS: usize = 8;

pub const MAX_LEAF_KEYS: usize = (PAGE_SIZE - 2 * COUNT_SIZE) / LEAF_ENTRY_SIZE;
pub const MAX_NON_LEAF_KEYS: usize = (PAGE_SIZE - NON_LEAF_SLOTS) / NON_LEAF_SLOT_SIZE;

/// Smallest node capacity a tree accepts.
pub const MIN_NODE_KEYS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: u64,
    pub rid: RecordId,
}

/// A decoded leaf page. Entries are kept sorted by key.
#[derive(Debug, Clone)]
pub struct LeafNode {
    entries: Vec<LeafEntry>,
    next: PageId,
    capacity: usize,
    duplicates: bool,
}

impl LeafNode {
    pub fn new(capacity: usize, duplicates: bool) -> Self {
        LeafNode {
            entries: Vec::new(),
            next: 0,
            capacity: capacity.clamp(MIN_NODE_KEYS, MAX_LEAF_KEYS),
            duplicates,
        }
    }

    pub fn decode(page: &Page, capacity: usize, duplicates: bool) -> DbResult<Self> {
        let count = page.read_u32(0)? as usize;
        if count > MAX_LEAF_KEYS {
            return Err(DbError::InvalidNode(format!(
                "leaf claims {} entries, at most {} fit",
                count, MAX_LEAF_KEYS
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = COUNT_SIZE + i * LEAF_ENTRY_SIZE;
            entries.push(LeafEntry {
                key: page.read_u64(offset)?,
                rid: RecordId::new(page.read_u32(offset + 8)?, page.read_u32(offset + 12)?),
            });
        }

        let mut node = LeafNode::new(capacity, duplicates);
        node.entries = entries;
        node.next = page.read_u32(LEAF_NEXT_OFFSET)?;
        Ok(node)
    }

    pub fn encode(&self, page: &mut Page) -> DbResult<()> {
        page.clear();
        page.write_u32(0, self.entries.len() as u32)?;
        for (i, entry) in self.entries.iter().enumerate() {
            let offset = COUNT_SIZE + i * LEAF_ENTRY_SIZE;
            page.write_u64(offset, entry.key)?;
            page.write_u32(offset + 8, entry.rid.pid)?;
            page.write_u32(offset + 12, entry.rid.sid)?;
        }
        page.write_u32(LEAF_NEXT_OFFSET, self.next)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn entries(&self) -> &[LeafEntry] {
        &self.entries
    }

    pub fn entry(&self, eid: usize) -> Option<LeafEntry> {
        self.entries.get(eid).copied()
    }

    pub fn last_key(&self) -> Option<u64> {
        self.entries.last().map(|e| e.key)
    }

    pub fn next(&self) -> PageId {
        self.next
    }

    pub fn set_next(&mut self, pid: PageId) {
        self.next = pid;
    }

    /// Index of the first entry whose key is `>= key`.
    pub fn locate(&self, key: u64) -> Option<usize> {
        let eid = self.entries.partition_point(|e| e.key < key);
        (eid < self.entries.len()).then_some(eid)
    }

    /// Insert into a node with room. An existing equal key has its rid
    /// replaced unless duplicates are allowed, in which case the new entry
    /// goes after the run of equal keys. Replacing works even on a full node.
    pub fn insert(&mut self, key: u64, rid: RecordId) -> DbResult<()> {
        if self.try_overwrite(key, rid) {
            return Ok(());
        }
        if self.is_full() {
            return Err(DbError::NodeFull);
        }
        let pos = self.insert_position(key);
        self.entries.insert(pos, LeafEntry { key, rid });
        Ok(())
    }

    /// Replace the rid of an existing `key` when duplicates are off.
    pub fn try_overwrite(&mut self, key: u64, rid: RecordId) -> bool {
        if self.duplicates {
            return false;
        }
        match self.entries.binary_search_by_key(&key, |e| e.key) {
            Ok(eid) => {
                self.entries[eid].rid = rid;
                true
            }
            Err(_) => false,
        }
    }

    /// Insert into a full node and move the upper part into a new sibling.
    /// Returns the sibling and the separator, the last key left in `self`.
    ///
    /// The caller links the sibling into the leaf chain.
    pub fn insert_and_split(&mut self, key: u64, rid: RecordId) -> DbResult<(LeafNode, u64)> {
        let pos = self.insert_position(key);
        let mut all = std::mem::take(&mut self.entries);
        all.insert(pos, LeafEntry { key, rid });

        let split = if self.duplicates {
            match split_point_keeping_runs(&all) {
                Some(split) => split,
                None => {
                    let key = all[0].key;
                    all.remove(pos);
                    self.entries = all;
                    return Err(DbError::DuplicatesExhausted(key));
                }
            }
        } else {
            all.len() / 2
        };

        let right_entries = all.split_off(split);
        self.entries = all;

        let mut sibling = LeafNode::new(self.capacity, self.duplicates);
        sibling.entries = right_entries;
        sibling.next = self.next;

        let separator = self
            .last_key()
            .ok_or_else(|| DbError::InvalidNode("leaf split left an empty left half".into()))?;

        debug!(
            "leaf split → left {} entries, right {} entries, separator {:#018x}",
            self.entries.len(),
            sibling.entries.len(),
            separator
        );
        Ok((sibling, separator))
    }

    fn insert_position(&self, key: u64) -> usize {
        if self.duplicates {
            self.entries.partition_point(|e| e.key <= key)
        } else {
            self.entries.partition_point(|e| e.key < key)
        }
    }
}

/// Split index near the middle that never cuts a run of equal keys, or
/// `None` when every entry carries the same key.
fn split_point_keeping_runs(entries: &[LeafEntry]) -> Option<usize> {
    let len = entries.len();
    let first = entries.first()?.key;
    let last = entries.last()?.key;
    if first == last {
        return None;
    }

    let mid = len / 2;
    let key = entries[mid].key;
    let run_start = entries.partition_point(|e| e.key < key);
    let run_end = entries.partition_point(|e| e.key <= key);
    if run_start == mid {
        return Some(mid);
    }
    if run_end < len { Some(run_end) } else { Some(run_start) }
}

/// A decoded non-leaf page: `first_child` followed by `(separator, child)`
/// slots. Child `i` holds keys in `(separator[i-1], separator[i]]`.
#[derive(Debug, Clone)]
pub struct NonLeafNode {
    first_child: PageId,
    slots: Vec<(u64, PageId)>,
    capacity: usize,
}

impl NonLeafNode {
    pub fn new(capacity: usize) -> Self {
        NonLeafNode {
            first_child: 0,
            slots: Vec::new(),
            capacity: capacity.clamp(MIN_NODE_KEYS, MAX_NON_LEAF_KEYS),
        }
    }

    /// A root holding exactly two children.
    pub fn new_root(capacity: usize, left: PageId, separator: u64, right: PageId) -> Self {
        let mut node = NonLeafNode::new(capacity);
        node.first_child = left;
        node.slots.push((separator, right));
        node
    }

    pub fn decode(page: &Page, capacity: usize) -> DbResult<Self> {
        let count = page.read_u32(0)? as usize;
        if count > MAX_NON_LEAF_KEYS {
            return Err(DbError::InvalidNode(format!(
                "non-leaf claims {} keys, at most {} fit",
                count, MAX_NON_LEAF_KEYS
            )));
        }

        let first_child = page.read_u32(NON_LEAF_FIRST_CHILD)?;
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let offset = NON_LEAF_SLOTS + i * NON_LEAF_SLOT_SIZE;
            slots.push((page.read_u64(offset)?, page.read_u32(offset + 8)?));
        }

        // page 0 is tree metadata, so no child can live there
        if first_child == 0 || slots.iter().any(|&(_, child)| child == 0) {
            return Err(DbError::InvalidNode("non-leaf has a child pointer of 0".into()));
        }

        let mut node = NonLeafNode::new(capacity);
        node.first_child = first_child;
        node.slots = slots;
        Ok(node)
    }

    pub fn encode(&self, page: &mut Page) -> DbResult<()> {
        page.clear();
        page.write_u32(0, self.slots.len() as u32)?;
        page.write_u32(NON_LEAF_FIRST_CHILD, self.first_child)?;
        for (i, &(key, child)) in self.slots.iter().enumerate() {
            let offset = NON_LEAF_SLOTS + i * NON_LEAF_SLOT_SIZE;
            page.write_u64(offset, key)?;
            page.write_u32(offset + 8, child)?;
        }
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn first_child(&self) -> PageId {
        self.first_child
    }

    /// Every child pointer, left to right.
    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        std::iter::once(self.first_child).chain(self.slots.iter().map(|&(_, child)| child))
    }

    /// Child to follow for `key`. A separator equal to `key` routes left.
    pub fn locate_child(&self, key: u64) -> PageId {
        let i = self.slots.partition_point(|&(sep, _)| sep < key);
        if i == 0 { self.first_child } else { self.slots[i - 1].1 }
    }

    /// Add `separator` with `right` as the child after it.
    pub fn insert(&mut self, separator: u64, right: PageId) -> DbResult<()> {
        if self.is_full() {
            return Err(DbError::NodeFull);
        }
        let pos = self.slots.partition_point(|&(sep, _)| sep < separator);
        self.slots.insert(pos, (separator, right));
        Ok(())
    }

    /// Insert into a full node and split it in the middle. The middle key
    /// moves up and is returned with the new right sibling.
    pub fn insert_and_split(&mut self, separator: u64, right: PageId) -> DbResult<(NonLeafNode, u64)> {
        let pos = self.slots.partition_point(|&(sep, _)| sep < separator);
        let mut all = std::mem::take(&mut self.slots);
        all.insert(pos, (separator, right));

        let mid = all.len() / 2;
        let mut upper = all.split_off(mid);
        let (mid_key, mid_child) = upper.remove(0);
        self.slots = all;

        let mut sibling = NonLeafNode::new(self.capacity);
        sibling.first_child = mid_child;
        sibling.slots = upper;

        debug!(
            "non-leaf split → left {} keys, right {} keys, {:#018x} moves up",
            self.slots.len(),
            sibling.slots.len(),
            mid_key
        );
        Ok((sibling, mid_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> RecordId {
        RecordId::new(0, n)
    }

    fn keys(node: &LeafNode) -> Vec<u64> {
        node.entries().iter().map(|e| e.key).collect()
    }

    #[test]
    fn page_maxima() {
        assert_eq!(MAX_LEAF_KEYS, 1023);
        assert_eq!(MAX_NON_LEAF_KEYS, 1364);
    }

    #[test]
    fn leaf_keeps_keys_sorted_and_overwrites() {
        let mut leaf = LeafNode::new(8, false);
        for k in [50, 10, 30, 20] {
            leaf.insert(k, rid(k as u32)).unwrap();
        }
        leaf.insert(30, rid(99)).unwrap();
        assert_eq!(keys(&leaf), vec![10, 20, 30, 50]);
        assert_eq!(leaf.entry(2).unwrap().rid, rid(99));
        assert_eq!(leaf.locate(25), Some(2));
        assert_eq!(leaf.locate(51), None);
    }

    #[test]
    fn full_leaf_reports_node_full_but_still_overwrites() {
        let mut leaf = LeafNode::new(2, false);
        leaf.insert(1, rid(1)).unwrap();
        leaf.insert(2, rid(2)).unwrap();
        assert!(matches!(leaf.insert(3, rid(3)), Err(DbError::NodeFull)));
        leaf.insert(2, rid(7)).unwrap();
        assert_eq!(leaf.entry(1).unwrap().rid, rid(7));
    }

    #[test]
    fn duplicate_entries_follow_their_run() {
        let mut leaf = LeafNode::new(8, true);
        leaf.insert(5, rid(1)).unwrap();
        leaf.insert(5, rid(2)).unwrap();
        leaf.insert(3, rid(3)).unwrap();
        leaf.insert(5, rid(4)).unwrap();
        let rids: Vec<u32> = leaf.entries().iter().map(|e| e.rid.sid).collect();
        assert_eq!(keys(&leaf), vec![3, 5, 5, 5]);
        assert_eq!(rids, vec![3, 1, 2, 4]);
    }

    #[test]
    fn leaf_split_round_trips_through_page() {
        let mut leaf = LeafNode::new(4, false);
        for k in [1, 2, 3, 4] {
            leaf.insert(k, rid(k as u32)).unwrap();
        }
        leaf.set_next(42);
        let (right, sep) = leaf.insert_and_split(5, rid(5)).unwrap();
        assert_eq!(keys(&leaf), vec![1, 2]);
        assert_eq!(keys(&right), vec![3, 4, 5]);
        assert_eq!(sep, 2);
        assert_eq!(right.next(), 42);

        let mut page = Page::new();
        right.encode(&mut page).unwrap();
        let back = LeafNode::decode(&page, 4, false).unwrap();
        assert_eq!(keys(&back), vec![3, 4, 5]);
        assert_eq!(back.next(), 42);
    }

    #[test]
    fn duplicate_split_never_divides_a_run() {
        let mut leaf = LeafNode::new(6, true);
        for (i, k) in [1, 2, 2, 2, 2, 3].into_iter().enumerate() {
            leaf.insert(k, rid(i as u32)).unwrap();
        }
        let (right, sep) = leaf.insert_and_split(4, rid(9)).unwrap();
        assert_eq!(keys(&leaf), vec![1, 2, 2, 2, 2]);
        assert_eq!(keys(&right), vec![3, 4]);
        assert_eq!(sep, 2);
    }

    #[test]
    fn duplicate_split_of_a_single_key_leaf() {
        let mut leaf = LeafNode::new(3, true);
        for i in 0..3 {
            leaf.insert(7, rid(i)).unwrap();
        }
        let (right, sep) = leaf.clone().insert_and_split(9, rid(9)).unwrap();
        assert_eq!(sep, 7);
        assert_eq!(keys(&right), vec![9]);

        let mut low = leaf.clone();
        let (right, sep) = low.insert_and_split(1, rid(9)).unwrap();
        assert_eq!(keys(&low), vec![1]);
        assert_eq!(keys(&right), vec![7, 7, 7]);
        assert_eq!(sep, 1);

        let err = leaf.insert_and_split(7, rid(9)).unwrap_err();
        assert!(matches!(err, DbError::DuplicatesExhausted(7)));
        assert_eq!(leaf.key_count(), 3);
    }

    #[test]
    fn non_leaf_routes_equal_keys_left() {
        let mut node = NonLeafNode::new_root(8, 10, 100, 11);
        node.insert(200, 12).unwrap();
        assert_eq!(node.locate_child(5), 10);
        assert_eq!(node.locate_child(100), 10);
        assert_eq!(node.locate_child(101), 11);
        assert_eq!(node.locate_child(200), 11);
        assert_eq!(node.locate_child(u64::MAX), 12);
        assert_eq!(node.children().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn non_leaf_split_pushes_middle_up() {
        let mut node = NonLeafNode::new_root(3, 1, 10, 2);
        node.insert(20, 3).unwrap();
        node.insert(30, 4).unwrap();
        assert!(node.is_full());
        let (right, up) = node.insert_and_split(40, 5).unwrap();
        assert_eq!(up, 30);
        assert_eq!(node.children().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(right.children().collect::<Vec<_>>(), vec![4, 5]);

        let mut page = Page::new();
        right.encode(&mut page).unwrap();
        let back = NonLeafNode::decode(&page, 3).unwrap();
        assert_eq!(back.locate_child(35), 4);
        assert_eq!(back.locate_child(41), 5);
    }

    #[test]
    fn corrupt_pages_are_rejected() {
        let mut page = Page::new();
        page.write_u32(0, 1).unwrap();
        assert!(matches!(NonLeafNode::decode(&page, 8), Err(DbError::InvalidNode(_))));

        page.write_u32(0, MAX_LEAF_KEYS as u32 + 1).unwrap();
        assert!(matches!(LeafNode::decode(&page, 8, false), Err(DbError::InvalidNode(_))));
    }
}
