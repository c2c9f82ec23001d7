use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::cache::SharedCache;
use crate::storage::node::{LeafNode, NonLeafNode, MAX_LEAF_KEYS, MAX_NON_LEAF_KEYS};
use crate::storage::page::{Page, PageId};
use crate::storage::pager::PagedFile;
use crate::storage::table::RecordId;

// ┌──────────────────────────────────────────────────────────────────────────┐
// │ Index file                                                               │
// │   page 0      [root_pid i32][height i32]   rewritten on every root change│
// │   page 1      first leaf (the root while height == 1)                    │
// │   page 2..    leaves and non-leaves, appended at end_pid as nodes split  │
// └──────────────────────────────────────────────────────────────────────────┘

const META_PID: PageId = 0;
const FIRST_LEAF_PID: PageId = 1;

/// Tuning knobs of one index. Capacities may be lowered below what fits in a
/// page (tests use this to grow deep trees from few keys), never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Keep every `(key, rid)` pair instead of replacing the rid of an
    /// existing key.
    pub duplicates: bool,
    pub max_leaf_keys: usize,
    pub max_non_leaf_keys: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            duplicates: false,
            max_leaf_keys: MAX_LEAF_KEYS,
            max_non_leaf_keys: MAX_NON_LEAF_KEYS,
        }
    }
}

impl IndexOptions {
    pub fn with_duplicates(duplicates: bool) -> Self {
        IndexOptions { duplicates, ..IndexOptions::default() }
    }

    pub fn capacities(mut self, max_leaf_keys: usize, max_non_leaf_keys: usize) -> Self {
        self.max_leaf_keys = max_leaf_keys.min(MAX_LEAF_KEYS);
        self.max_non_leaf_keys = max_non_leaf_keys.min(MAX_NON_LEAF_KEYS);
        self
    }
}

/// Position of an entry in the leaf chain: page and entry number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCursor {
    pub pid: PageId,
    pub eid: usize,
}

/// What a subtree reports to its parent after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The child split; `right` is the new sibling holding keys above
    /// `separator`.
    Split { separator: u64, right: PageId },
}

/// A disk-resident B+tree from geohash keys to record ids.
///
/// Leaves hold the `(key, rid)` pairs and are chained left to right through
/// their next pointers; non-leaves hold separators only. Page 0 keeps the
/// root and the height so that the tree can be reopened.
pub struct BTreeIndex {
    file: PagedFile,
    root_pid: PageId,
    /// 0 = empty tree, 1 = the root is a leaf.
    height: u32,
    options: IndexOptions,
}

impl BTreeIndex {
    /// Open (or, in mode `'w'`, create) the index stored at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        mode: char,
        cache: SharedCache,
        options: IndexOptions,
    ) -> DbResult<Self> {
        let file = PagedFile::open(path, mode, cache)?;

        let (root_pid, height) = if file.end_pid() == 0 {
            debug!("open index: new file, empty tree");
            (0, 0)
        } else {
            let mut meta = Page::new();
            file.read(META_PID, &mut meta)?;
            let root = meta.read_i32(0)?;
            let height = meta.read_i32(4)?;
            if height < 0 || (height > 0 && root < FIRST_LEAF_PID as i32) {
                return Err(DbError::InvalidNode(format!(
                    "bad tree metadata: root {} height {}",
                    root, height
                )));
            }
            debug!("open index: root page {}, height {}", root, height);
            if height == 0 { (0, 0) } else { (root as PageId, height as u32) }
        };

        Ok(BTreeIndex { file, root_pid, height, options })
    }

    pub fn close(&mut self) -> DbResult<()> {
        self.root_pid = 0;
        self.height = 0;
        self.file.close()
    }

    /// Add `(key, rid)` to the tree, splitting nodes on the way back up.
    pub fn insert(&mut self, key: u64, rid: RecordId) -> DbResult<()> {
        debug!("insert() → key={:#018x} rid={}", key, rid);

        if self.height == 0 {
            let mut leaf = self.new_leaf();
            leaf.insert(key, rid)?;
            self.write_leaf(FIRST_LEAF_PID, &leaf)?;
            self.root_pid = FIRST_LEAF_PID;
            self.height = 1;
            return self.write_meta();
        }

        match self.insert_into(self.root_pid, 1, key, rid)? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Split { separator, right } => {
                let root = NonLeafNode::new_root(
                    self.options.max_non_leaf_keys,
                    self.root_pid,
                    separator,
                    right,
                );
                let root_pid = self.file.end_pid();
                self.write_non_leaf(root_pid, &root)?;
                debug!(
                    "  → root split: new root {} over {} and {}, height {}",
                    root_pid,
                    self.root_pid,
                    right,
                    self.height + 1
                );
                self.root_pid = root_pid;
                self.height += 1;
                self.write_meta()
            }
        }
    }

    fn insert_into(&mut self, pid: PageId, level: u32, key: u64, rid: RecordId) -> DbResult<InsertOutcome> {
        if level == self.height {
            let mut leaf = self.read_leaf(pid)?;
            return match leaf.insert(key, rid) {
                Ok(()) => {
                    self.write_leaf(pid, &leaf)?;
                    Ok(InsertOutcome::Inserted)
                }
                Err(DbError::NodeFull) => {
                    debug!("  → leaf {} full, splitting", pid);
                    let (right, separator) = leaf.insert_and_split(key, rid)?;
                    let right_pid = self.file.end_pid();
                    self.write_leaf(right_pid, &right)?;
                    leaf.set_next(right_pid);
                    self.write_leaf(pid, &leaf)?;
                    Ok(InsertOutcome::Split { separator, right: right_pid })
                }
                Err(e) => Err(e),
            };
        }

        let mut node = self.read_non_leaf(pid)?;
        let child = node.locate_child(key);
        match self.insert_into(child, level + 1, key, rid)? {
            InsertOutcome::Inserted => Ok(InsertOutcome::Inserted),
            InsertOutcome::Split { separator, right } if !node.is_full() => {
                node.insert(separator, right)?;
                self.write_non_leaf(pid, &node)?;
                Ok(InsertOutcome::Inserted)
            }
            InsertOutcome::Split { separator, right } => {
                debug!("  → non-leaf {} full, splitting", pid);
                let (sibling, up) = node.insert_and_split(separator, right)?;
                let sibling_pid = self.file.end_pid();
                self.write_non_leaf(sibling_pid, &sibling)?;
                self.write_non_leaf(pid, &node)?;
                Ok(InsertOutcome::Split { separator: up, right: sibling_pid })
            }
        }
    }

    /// Cursor at the first entry whose key is `>= key`, continuing into the
    /// next leaves when the routed leaf has none.
    pub fn locate(&self, key: u64) -> DbResult<IndexCursor> {
        if self.height == 0 {
            return Err(DbError::NoSuchRecord);
        }
        let mut pid = self.root_pid;
        for _ in 1..self.height {
            pid = self.read_non_leaf(pid)?.locate_child(key);
        }

        let leaf = self.read_leaf(pid)?;
        if let Some(eid) = leaf.locate(key) {
            return Ok(IndexCursor { pid, eid });
        }

        let mut next = leaf.next();
        while next != 0 {
            let leaf = self.read_leaf(next)?;
            if !leaf.is_empty() {
                return Ok(IndexCursor { pid: next, eid: 0 });
            }
            next = leaf.next();
        }
        Err(DbError::NoSuchRecord)
    }

    /// Return the entry under the cursor and advance it, crossing into the
    /// next leaf as needed.
    pub fn read_forward(&self, cursor: &mut IndexCursor) -> DbResult<(u64, RecordId)> {
        let mut leaf = self.read_leaf(cursor.pid)?;
        while cursor.eid >= leaf.key_count() {
            if leaf.next() == 0 {
                return Err(DbError::EndOfTree);
            }
            cursor.pid = leaf.next();
            cursor.eid = 0;
            leaf = self.read_leaf(cursor.pid)?;
        }

        let entry = leaf.entry(cursor.eid).ok_or(DbError::NoSuchRecord)?;
        cursor.eid += 1;
        Ok((entry.key, entry.rid))
    }

    /// Cursor at the first entry of the leftmost leaf.
    pub fn point_to_smallest_key(&self) -> DbResult<IndexCursor> {
        if self.height == 0 {
            return Err(DbError::NoSuchRecord);
        }
        let mut pid = self.root_pid;
        for _ in 1..self.height {
            pid = self.read_non_leaf(pid)?.first_child();
        }
        Ok(IndexCursor { pid, eid: 0 })
    }

    pub fn load_leaf(&self, pid: PageId) -> DbResult<LeafNode> {
        self.read_leaf(pid)
    }

    /// Iterate over every entry in key order.
    pub fn scan(&self) -> Scan<'_> {
        Scan { index: self, cursor: self.point_to_smallest_key().ok() }
    }

    /// Number of entries, counted along the leaf chain.
    pub fn entry_count(&self) -> DbResult<u64> {
        let mut total = 0;
        self.walk_leaves(|leaf| total += leaf.key_count() as u64)?;
        Ok(total)
    }

    /// Number of leaf pages in the chain.
    pub fn leaf_page_count(&self) -> DbResult<u64> {
        let mut pages = 0;
        self.walk_leaves(|_| pages += 1)?;
        Ok(pages)
    }

    pub fn root_pid(&self) -> Option<PageId> {
        (self.height > 0).then_some(self.root_pid)
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    fn walk_leaves(&self, mut visit: impl FnMut(&LeafNode)) -> DbResult<()> {
        if self.height == 0 {
            return Ok(());
        }
        let mut pid = self.point_to_smallest_key()?.pid;
        loop {
            let leaf = self.read_leaf(pid)?;
            visit(&leaf);
            if leaf.next() == 0 {
                return Ok(());
            }
            pid = leaf.next();
        }
    }

    fn new_leaf(&self) -> LeafNode {
        LeafNode::new(self.options.max_leaf_keys, self.options.duplicates)
    }

    fn read_leaf(&self, pid: PageId) -> DbResult<LeafNode> {
        if pid == META_PID {
            return Err(DbError::InvalidNode("leaf pointer to the metadata page".into()));
        }
        let mut page = Page::new();
        self.file.read(pid, &mut page)?;
        LeafNode::decode(&page, self.options.max_leaf_keys, self.options.duplicates)
    }

    fn write_leaf(&mut self, pid: PageId, leaf: &LeafNode) -> DbResult<()> {
        let mut page = Page::new();
        leaf.encode(&mut page)?;
        self.file.write(pid, &page)
    }

    fn read_non_leaf(&self, pid: PageId) -> DbResult<NonLeafNode> {
        let mut page = Page::new();
        self.file.read(pid, &mut page)?;
        NonLeafNode::decode(&page, self.options.max_non_leaf_keys)
    }

    fn write_non_leaf(&mut self, pid: PageId, node: &NonLeafNode) -> DbResult<()> {
        let mut page = Page::new();
        node.encode(&mut page)?;
        self.file.write(pid, &page)
    }

    fn write_meta(&mut self) -> DbResult<()> {
        let mut page = Page::new();
        page.write_i32(0, self.root_pid as i32)?;
        page.write_i32(4, self.height as i32)?;
        self.file.write(META_PID, &page)
    }
}

/// Iterator over the leaf chain, see [`BTreeIndex::scan`].
pub struct Scan<'a> {
    index: &'a BTreeIndex,
    cursor: Option<IndexCursor>,
}

impl Iterator for Scan<'_> {
    type Item = DbResult<(u64, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match self.index.read_forward(cursor) {
            Ok(entry) => Some(Ok(entry)),
            Err(DbError::EndOfTree) => {
                self.cursor = None;
                None
            }
            Err(e) => {
                self.cursor = None;
                Some(Err(e))
            }
        }
    }
}
