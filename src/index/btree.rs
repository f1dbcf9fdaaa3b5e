//! Persistent B+ tree keyed by 32-bit integers with record-id values
//!
//! Every node is the interpretation of one page's payload; node identity is
//! the page id. Descent records the path of internal pages taken so splits
//! can promote separators upward without parent pointers in the pages.

use std::sync::Arc;

use crate::file::{BufferPool, PageGuard, PageId, PageKind};
use crate::record::RecordId;

use super::error::{IndexError, IndexResult};
use super::node::{InternalNode, LeafNode, MAX_INTERNAL_CAP, MAX_LEAF_CAP};
use super::{IndexKey, DEFAULT_INTERNAL_CAP, DEFAULT_LEAF_CAP};

/// Clustered B+ tree index.
///
/// Keys are unique; values are [`RecordId`]s handed in by the table layer.
/// Leaves form a singly linked chain in ascending key order for range
/// scans. Operations are not internally synchronized: callers serialize.
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    root: Option<PageId>,
    leaf_cap: usize,
    internal_cap: usize,
}

impl BPlusTree {
    /// Create an empty tree with the default node capacities
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            root: None,
            leaf_cap: DEFAULT_LEAF_CAP,
            internal_cap: DEFAULT_INTERNAL_CAP,
        }
    }

    /// Create an empty tree with explicit node capacities.
    ///
    /// A leaf holds at most `leaf_cap` entries and an internal node at most
    /// `internal_cap` keys; both are checked against what fits a page.
    pub fn with_capacities(
        pool: Arc<BufferPool>,
        leaf_cap: usize,
        internal_cap: usize,
    ) -> IndexResult<Self> {
        if leaf_cap < 2 || leaf_cap > MAX_LEAF_CAP {
            return Err(IndexError::InvalidCapacity(leaf_cap));
        }
        if internal_cap < 3 || internal_cap > MAX_INTERNAL_CAP {
            return Err(IndexError::InvalidCapacity(internal_cap));
        }

        Ok(Self {
            pool,
            root: None,
            leaf_cap,
            internal_cap,
        })
    }

    /// The page id of the root, for a catalog layer to persist
    pub fn root_page_id(&self) -> Option<PageId> {
        self.root
    }

    /// Re-attach a tree to a root persisted elsewhere
    pub fn set_root(&mut self, root: Option<PageId>) {
        self.root = root;
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert `key` with `value`. Returns `false` when the key already
    /// exists; the tree is left untouched in that case.
    pub fn insert(&mut self, key: IndexKey, value: RecordId) -> IndexResult<bool> {
        let root = match self.root {
            Some(root) => root,
            None => {
                // Empty tree: the root starts out as a single leaf
                let (page_id, guard) = self.pool.new_page()?;
                let mut leaf = LeafNode::new();
                leaf.insert_at(0, key, value);
                {
                    let mut page = guard.write();
                    page.set_kind(PageKind::IndexLeaf);
                    leaf.encode(page.payload_mut());
                }
                drop(guard);
                self.root = Some(page_id);
                return Ok(true);
            }
        };

        let (leaf_id, mut path) = self.find_leaf(root, key)?;
        let guard = self.pool.fetch(leaf_id)?;
        let mut leaf = Self::decode_leaf(&guard)?;

        let pos = match leaf.find_key(key) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };

        if leaf.len() < self.leaf_cap {
            leaf.insert_at(pos, key, value);
            let mut page = guard.write();
            leaf.encode(page.payload_mut());
            return Ok(true);
        }

        // Full leaf: move the upper half into a new right sibling, link it
        // into the chain, promote its first key, then retry the insert
        let (new_id, new_guard) = self.pool.new_page()?;
        let new_leaf = leaf.split();
        leaf.next_leaf = Some(new_id);
        let sep = new_leaf.keys[0];

        {
            let mut page = new_guard.write();
            page.set_kind(PageKind::IndexLeaf);
            new_leaf.encode(page.payload_mut());
        }
        {
            let mut page = guard.write();
            leaf.encode(page.payload_mut());
        }
        drop(new_guard);
        drop(guard);

        self.insert_into_parent(&mut path, leaf_id, sep, new_id)?;
        self.insert(key, value)
    }

    /// Look up the record id stored under `key`
    pub fn search(&self, key: IndexKey) -> IndexResult<Option<RecordId>> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(None),
        };

        let (leaf_id, _) = self.find_leaf(root, key)?;
        let guard = self.pool.fetch(leaf_id)?;
        let leaf = Self::decode_leaf(&guard)?;

        Ok(leaf.find_key(key).ok().map(|pos| leaf.values[pos]))
    }

    /// Remove `key`. Returns `false` when it is absent.
    ///
    /// Removal is local: the leaf may fall below half full and no merging
    /// or redistribution happens.
    pub fn remove(&mut self, key: IndexKey) -> IndexResult<bool> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(false),
        };

        let (leaf_id, _) = self.find_leaf(root, key)?;
        let guard = self.pool.fetch(leaf_id)?;
        let mut leaf = Self::decode_leaf(&guard)?;

        let pos = match leaf.find_key(key) {
            Ok(pos) => pos,
            Err(_) => return Ok(false),
        };

        leaf.remove_at(pos);
        let mut page = guard.write();
        leaf.encode(page.payload_mut());
        Ok(true)
    }

    /// Collect all entries with keys in `[lo, hi]`, ascending, by walking
    /// the leaf chain from the leaf containing `lo`
    pub fn range(&self, lo: IndexKey, hi: IndexKey) -> IndexResult<Vec<(IndexKey, RecordId)>> {
        let mut out = Vec::new();
        let root = match self.root {
            Some(root) => root,
            None => return Ok(out),
        };

        let (leaf_id, _) = self.find_leaf(root, lo)?;
        let mut current = Some(leaf_id);

        while let Some(page_id) = current {
            let guard = self.pool.fetch(page_id)?;
            let leaf = Self::decode_leaf(&guard)?;

            for (i, &key) in leaf.keys.iter().enumerate() {
                if key > hi {
                    return Ok(out);
                }
                if key >= lo {
                    out.push((key, leaf.values[i]));
                }
            }
            current = leaf.next_leaf;
        }

        Ok(out)
    }

    /// Collect every entry in ascending key order via the leaf chain
    pub fn scan(&self) -> IndexResult<Vec<(IndexKey, RecordId)>> {
        let mut out = Vec::new();
        let root = match self.root {
            Some(root) => root,
            None => return Ok(out),
        };

        let mut current = Some(self.first_leaf(root)?);
        while let Some(page_id) = current {
            let guard = self.pool.fetch(page_id)?;
            let leaf = Self::decode_leaf(&guard)?;

            for (i, &key) in leaf.keys.iter().enumerate() {
                out.push((key, leaf.values[i]));
            }
            current = leaf.next_leaf;
        }

        Ok(out)
    }

    /// Number of levels, counting the root and the leaves; 0 when empty
    pub fn height(&self) -> IndexResult<usize> {
        let mut current = match self.root {
            Some(root) => root,
            None => return Ok(0),
        };

        let mut height = 1;
        loop {
            let guard = self.pool.fetch(current)?;
            let page = guard.read();
            match page.kind() {
                PageKind::IndexLeaf => return Ok(height),
                PageKind::IndexInternal => {
                    let node = InternalNode::decode(page.payload())?;
                    current = node.children[0];
                    height += 1;
                }
                kind => {
                    return Err(IndexError::UnexpectedPageKind {
                        page_id: current,
                        kind,
                    })
                }
            }
        }
    }

    /// Descend to the leaf whose key range contains `key`, following the
    /// smallest child index `i` with `key < keys[i]` at each internal node.
    ///
    /// The page-kind byte decides when a leaf is reached. Returns the leaf
    /// page id and the internal pages taken, root first, for promotion.
    fn find_leaf(&self, root: PageId, key: IndexKey) -> IndexResult<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut current = root;

        loop {
            let guard = self.pool.fetch(current)?;
            let page = guard.read();
            match page.kind() {
                PageKind::IndexLeaf => return Ok((current, path)),
                PageKind::IndexInternal => {
                    let node = InternalNode::decode(page.payload())?;
                    let child = node.children[node.child_index(key)];
                    path.push(current);
                    current = child;
                }
                kind => {
                    return Err(IndexError::UnexpectedPageKind {
                        page_id: current,
                        kind,
                    })
                }
            }
        }
    }

    /// Leftmost leaf under `root`
    fn first_leaf(&self, root: PageId) -> IndexResult<PageId> {
        let mut current = root;
        loop {
            let guard = self.pool.fetch(current)?;
            let page = guard.read();
            match page.kind() {
                PageKind::IndexLeaf => return Ok(current),
                PageKind::IndexInternal => {
                    let node = InternalNode::decode(page.payload())?;
                    current = node.children[0];
                }
                kind => {
                    return Err(IndexError::UnexpectedPageKind {
                        page_id: current,
                        kind,
                    })
                }
            }
        }
    }

    /// Promote `sep` with right child `right` into the parent popped from
    /// `path`, splitting full parents as needed, creating a new root when
    /// the path is exhausted
    fn insert_into_parent(
        &mut self,
        path: &mut Vec<PageId>,
        left: PageId,
        sep: IndexKey,
        right: PageId,
    ) -> IndexResult<()> {
        let parent_id = match path.pop() {
            Some(parent_id) => parent_id,
            None => return self.create_new_root(left, sep, right),
        };

        let guard = self.pool.fetch(parent_id)?;
        let mut node = Self::decode_internal(&guard)?;

        if node.len() < self.internal_cap {
            node.insert_child(sep, right);
            let mut page = guard.write();
            node.encode(page.payload_mut());
            return Ok(());
        }

        // Full parent: split around the median, place the new separator in
        // whichever half owns its key range, promote the median upward
        let (median, mut sibling) = node.split();
        if sep < median {
            node.insert_child(sep, right);
        } else {
            sibling.insert_child(sep, right);
        }

        let (new_id, new_guard) = self.pool.new_page()?;
        {
            let mut page = new_guard.write();
            page.set_kind(PageKind::IndexInternal);
            sibling.encode(page.payload_mut());
        }
        {
            let mut page = guard.write();
            node.encode(page.payload_mut());
        }
        drop(new_guard);
        drop(guard);

        self.insert_into_parent(path, parent_id, median, new_id)
    }

    /// Grow the tree by one level: a fresh internal root with one separator
    /// and two children. The root descriptor moves only after the new root
    /// page is fully written.
    fn create_new_root(&mut self, left: PageId, sep: IndexKey, right: PageId) -> IndexResult<()> {
        let (root_id, guard) = self.pool.new_page()?;
        {
            let mut page = guard.write();
            page.set_kind(PageKind::IndexInternal);
            InternalNode::new(vec![sep], vec![left, right]).encode(page.payload_mut());
        }
        drop(guard);

        self.root = Some(root_id);
        Ok(())
    }

    fn decode_leaf(guard: &PageGuard<'_>) -> IndexResult<LeafNode> {
        let page = guard.read();
        match page.kind() {
            PageKind::IndexLeaf => LeafNode::decode(page.payload()),
            kind => Err(IndexError::UnexpectedPageKind {
                page_id: guard.page_id(),
                kind,
            }),
        }
    }

    fn decode_internal(guard: &PageGuard<'_>) -> IndexResult<InternalNode> {
        let page = guard.read();
        match page.kind() {
            PageKind::IndexInternal => InternalNode::decode(page.payload()),
            kind => Err(IndexError::UnexpectedPageKind {
                page_id: guard.page_id(),
                kind,
            }),
        }
    }
}
