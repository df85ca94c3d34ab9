//! Disk-resident B+ tree over one index file

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::file::{BufferManager, FileHandle, PageId};
use crate::record::RecordId;

use super::error::{IndexError, IndexResult};
use super::node::{Key, TreeNode, lower_bound, upper_bound};

/// Result of removing an entry from a subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveOutcome {
    /// No entry matched both key and record id
    NotFound,
    /// The entry was removed; the subtree's new maximum, `None` once empty
    Removed { max_key: Option<Key> },
}

/// A B+ tree stored one node per page.
///
/// Nodes live in an arena keyed by page number; a node refers to its parent,
/// children and sibling leaves only by page number. The whole tree reachable
/// from the root is loaded when the index is opened, and modified nodes are
/// written back through the buffer pool on [`FileIndex::flush`] and
/// [`FileIndex::close`].
///
/// The root is always an internal node whose parent is itself. Leaves are
/// never at page 0, so a sibling link of 0 means "none". Emptied nodes are
/// unlinked from their parent but their pages are not reused, and there is
/// no merging of underfull nodes.
#[derive(Debug)]
pub struct FileIndex {
    path: PathBuf,
    file: FileHandle,
    root: PageId,
    nodes: HashMap<PageId, TreeNode>,
    dirty: HashSet<PageId>,
}

impl FileIndex {
    /// Create an index file holding an empty root. Returns the root page.
    /// The file is left closed.
    pub fn create<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> IndexResult<PageId> {
        let path = path.as_ref();
        if buffer_mgr.exists(path) {
            return Err(IndexError::IndexAlreadyExists(path.display().to_string()));
        }

        buffer_mgr.create_file(path)?;
        let file = buffer_mgr.open_file(path)?;
        // First page of a fresh file, so the root is its own parent
        let root = buffer_mgr.append_page(file, &TreeNode::new_internal(0).to_page())?;
        buffer_mgr.close_file(file)?;

        debug!(path = %path.display(), root, "created index file");
        Ok(root)
    }

    /// Open an index file whose root lives at `root`
    pub fn open<P: AsRef<Path>>(
        buffer_mgr: &mut BufferManager,
        path: P,
        root: PageId,
    ) -> IndexResult<Self> {
        let path = path.as_ref();
        if !buffer_mgr.exists(path) {
            return Err(IndexError::IndexNotFound(path.display().to_string()));
        }

        let file = buffer_mgr.open_file(path)?;
        let nodes = match Self::load(buffer_mgr, file, root) {
            Ok(nodes) => nodes,
            Err(err) => {
                buffer_mgr.close_file(file)?;
                return Err(err);
            }
        };

        debug!(path = %path.display(), root, nodes = nodes.len(), "opened index file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            root,
            nodes,
            dirty: HashSet::new(),
        })
    }

    /// Read every node reachable from `root`, checking parent links
    fn load(
        buffer_mgr: &mut BufferManager,
        file: FileHandle,
        root: PageId,
    ) -> IndexResult<HashMap<PageId, TreeNode>> {
        let page_count = buffer_mgr.file_manager_mut().page_count(file)?;
        if root >= page_count {
            return Err(IndexError::corrupted(
                root,
                format!("root beyond end of file ({} pages)", page_count),
            ));
        }

        let root_node = TreeNode::from_page(root, buffer_mgr.get_page(file, root)?)?;
        if root_node.is_leaf() {
            return Err(IndexError::corrupted(root, "root is a leaf"));
        }
        if root_node.parent() != root {
            return Err(IndexError::RootParentMismatch {
                root,
                parent: root_node.parent(),
            });
        }

        let mut nodes = HashMap::new();
        let mut seen = HashSet::from([root]);
        let mut pending = vec![(root, root_node)];
        while let Some((page, node)) = pending.pop() {
            if let TreeNode::Internal { entries, .. } = &node {
                for &(_, child) in entries {
                    if child >= page_count || !seen.insert(child) {
                        return Err(IndexError::corrupted(page, format!("bad child page {}", child)));
                    }
                    let child_node = TreeNode::from_page(child, buffer_mgr.get_page(file, child)?)?;
                    if child_node.parent() != page {
                        return Err(IndexError::corrupted(
                            child,
                            format!("parent is {}, expected {}", child_node.parent(), page),
                        ));
                    }
                    pending.push((child, child_node));
                }
            }
            nodes.insert(page, node);
        }
        Ok(nodes)
    }

    /// Write back modified nodes and close the file. Returns the root page,
    /// which moves when the root splits.
    pub fn close(mut self, buffer_mgr: &mut BufferManager) -> IndexResult<PageId> {
        self.flush(buffer_mgr)?;
        buffer_mgr.close_file(self.file)?;
        debug!(path = %self.path.display(), root = self.root, "closed index file");
        Ok(self.root)
    }

    /// Write every modified node into the buffer pool
    pub fn flush(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        let mut pages: Vec<PageId> = self.dirty.iter().copied().collect();
        pages.sort_unstable();

        for page in pages {
            let node = self.node(page)?;
            buffer_mgr.write_page(self.file, page, &node.to_page())?;
        }
        self.dirty.clear();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Levels from the root down to the leaves, root included
    pub fn height(&self) -> IndexResult<usize> {
        let mut height = 1;
        let mut page = self.root;
        while let TreeNode::Internal { entries, .. } = self.node(page)? {
            match entries.first() {
                Some(&(_, child)) => {
                    page = child;
                    height += 1;
                }
                None => break,
            }
        }
        Ok(height)
    }

    /// Leaf pages from left to right, following the sibling links
    pub fn leaf_pages(&self) -> IndexResult<Vec<PageId>> {
        let mut page = self.root;
        loop {
            match self.node(page)? {
                TreeNode::Internal { entries, .. } => match entries.first() {
                    Some(&(_, child)) => page = child,
                    None => return Ok(Vec::new()),
                },
                TreeNode::Leaf { .. } => break,
            }
        }

        let mut leaves = Vec::new();
        let mut next = Some(page);
        while let Some(page) = next {
            if leaves.len() > self.nodes.len() {
                return Err(IndexError::corrupted(page, "cycle in leaf chain"));
            }
            leaves.push(page);
            next = match self.node(page)? {
                TreeNode::Leaf { next, .. } => *next,
                TreeNode::Internal { .. } => {
                    return Err(IndexError::corrupted(page, "internal node in leaf chain"));
                }
            };
        }
        Ok(leaves)
    }

    /// Number of entries in the tree
    pub fn len(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| node.is_leaf())
            .map(TreeNode::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, page: PageId) -> IndexResult<&TreeNode> {
        self.nodes
            .get(&page)
            .ok_or_else(|| IndexError::corrupted(page, "node not loaded"))
    }

    fn node_mut(&mut self, page: PageId) -> IndexResult<&mut TreeNode> {
        self.dirty.insert(page);
        self.nodes
            .get_mut(&page)
            .ok_or_else(|| IndexError::corrupted(page, "node not loaded"))
    }

    fn internal_entries_mut(&mut self, page: PageId) -> IndexResult<&mut Vec<(Key, PageId)>> {
        match self.node_mut(page)? {
            TreeNode::Internal { entries, .. } => Ok(entries),
            TreeNode::Leaf { .. } => Err(IndexError::corrupted(page, "expected an internal node")),
        }
    }

    /// Append a page for `node` and add it to the arena
    fn allocate(&mut self, buffer_mgr: &mut BufferManager, node: TreeNode) -> IndexResult<PageId> {
        let page = buffer_mgr.append_page(self.file, &node.to_page())?;
        self.nodes.insert(page, node);
        self.dirty.insert(page);
        Ok(page)
    }

    // ========== Lookup ==========

    /// Record id stored under `key`. With duplicate keys the earliest
    /// inserted of the leftmost run is returned.
    pub fn search(&self, key: Key) -> IndexResult<Option<RecordId>> {
        let mut page = self.root;
        loop {
            match self.node(page)? {
                TreeNode::Internal { entries, .. } => match entries.get(lower_bound(entries, key)) {
                    Some(&(_, child)) => page = child,
                    None => return Ok(None),
                },
                TreeNode::Leaf { entries, .. } => {
                    return Ok(entries
                        .get(lower_bound(entries, key))
                        .filter(|(k, _)| *k == key)
                        .map(|&(_, rid)| rid));
                }
            }
        }
    }

    /// Entries with `lo <= key <= hi` in key order. `None` leaves that side
    /// unbounded.
    pub fn range_search(&self, lo: Option<Key>, hi: Option<Key>) -> IndexResult<Vec<(Key, RecordId)>> {
        let mut out = Vec::new();
        if let (Some(lo), Some(hi)) = (lo, hi)
            && lo > hi
        {
            return Ok(out);
        }
        self.collect_range(self.root, lo, hi, &mut out)?;
        Ok(out)
    }

    fn collect_range(
        &self,
        page: PageId,
        lo: Option<Key>,
        hi: Option<Key>,
        out: &mut Vec<(Key, RecordId)>,
    ) -> IndexResult<()> {
        match self.node(page)? {
            TreeNode::Leaf { entries, .. } => {
                let start = lo.map_or(0, |lo| lower_bound(entries, lo));
                let end = hi.map_or(entries.len(), |hi| upper_bound(entries, hi));
                if start < end {
                    out.extend_from_slice(&entries[start..end]);
                }
            }
            TreeNode::Internal { entries, .. } => {
                let start = lo.map_or(0, |lo| lower_bound(entries, lo));
                // The first child whose maximum exceeds `hi` may still hold
                // keys within range
                let end = hi.map_or(entries.len(), |hi| {
                    (upper_bound(entries, hi) + 1).min(entries.len())
                });
                if start < end {
                    for &(_, child) in &entries[start..end] {
                        self.collect_range(child, lo, hi, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ========== Insertion ==========

    /// Add an entry. Duplicate keys are allowed.
    pub fn insert(&mut self, buffer_mgr: &mut BufferManager, key: Key, rid: RecordId) -> IndexResult<()> {
        let root = self.root;
        self.insert_into(buffer_mgr, root, key, rid)?;

        if self.node(root)?.overflows() {
            self.grow_root(buffer_mgr)?;
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        buffer_mgr: &mut BufferManager,
        page: PageId,
        key: Key,
        rid: RecordId,
    ) -> IndexResult<()> {
        let (pos, child) = match self.node_mut(page)? {
            TreeNode::Leaf { entries, .. } => {
                let pos = upper_bound(entries, key);
                entries.insert(pos, (key, rid));
                return Ok(());
            }
            TreeNode::Internal { entries, .. } => match entries.len() {
                0 => (0, None),
                len => {
                    // Past the last maximum: the rightmost child takes it
                    let pos = lower_bound(entries, key).min(len - 1);
                    (pos, Some(entries[pos].1))
                }
            },
        };

        let child = match child {
            Some(child) => child,
            None => {
                let leaf = self.allocate(buffer_mgr, TreeNode::new_leaf(page))?;
                self.internal_entries_mut(page)?.push((key, leaf));
                leaf
            }
        };

        self.insert_into(buffer_mgr, child, key, rid)?;

        let entries = self.internal_entries_mut(page)?;
        if key > entries[pos].0 {
            entries[pos].0 = key;
        }

        if self.node(child)?.overflows() {
            self.split_child(buffer_mgr, page, pos)?;
        }
        Ok(())
    }

    /// Split the child at `pos` of `parent` in two, adding an entry for the
    /// new right sibling just after it
    fn split_child(&mut self, buffer_mgr: &mut BufferManager, parent: PageId, pos: usize) -> IndexResult<()> {
        let (old_max, child) = self.internal_entries_mut(parent)?[pos];

        let sibling_page = buffer_mgr.file_manager_mut().page_count(self.file)?;
        let sibling = self.node_mut(child)?.split(child, sibling_page);
        let left_max = self
            .node(child)?
            .max_key()
            .ok_or_else(|| IndexError::corrupted(child, "split left an empty node"))?;

        let moved_children: Vec<PageId> = match &sibling {
            TreeNode::Internal { entries, .. } => entries.iter().map(|e| e.1).collect(),
            TreeNode::Leaf { .. } => Vec::new(),
        };
        let old_next = match &sibling {
            TreeNode::Leaf { next, .. } => *next,
            TreeNode::Internal { .. } => None,
        };

        let allocated = self.allocate(buffer_mgr, sibling)?;
        if allocated != sibling_page {
            return Err(IndexError::corrupted(
                allocated,
                format!("expected new page {}", sibling_page),
            ));
        }

        for moved in moved_children {
            self.node_mut(moved)?.set_parent(sibling_page);
        }
        if let Some(next) = old_next
            && let TreeNode::Leaf { prev, .. } = self.node_mut(next)?
        {
            *prev = Some(sibling_page);
        }

        let entries = self.internal_entries_mut(parent)?;
        entries[pos].0 = left_max;
        entries.insert(pos + 1, (old_max, sibling_page));

        trace!(
            path = %self.path.display(),
            node = child,
            sibling = sibling_page,
            parent,
            "split node"
        );
        Ok(())
    }

    /// Put a new root above the overflowing one and split the old root
    fn grow_root(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        let old_root = self.root;
        let old_max = self
            .node(old_root)?
            .max_key()
            .ok_or_else(|| IndexError::corrupted(old_root, "overflowing root is empty"))?;

        let new_root = buffer_mgr.file_manager_mut().page_count(self.file)?;
        let allocated = self.allocate(
            buffer_mgr,
            TreeNode::Internal {
                parent: new_root,
                entries: vec![(old_max, old_root)],
            },
        )?;
        if allocated != new_root {
            return Err(IndexError::corrupted(allocated, format!("expected new page {}", new_root)));
        }

        self.node_mut(old_root)?.set_parent(new_root);
        self.root = new_root;
        self.split_child(buffer_mgr, new_root, 0)?;

        debug!(path = %self.path.display(), old_root, new_root, "index root split");
        Ok(())
    }

    // ========== Removal ==========

    /// Remove the entry matching both `key` and `rid`. Returns false when
    /// there is no such entry.
    pub fn remove(&mut self, key: Key, rid: RecordId) -> IndexResult<bool> {
        let root = self.root;
        Ok(self.remove_from(root, key, rid)? != RemoveOutcome::NotFound)
    }

    fn remove_from(&mut self, page: PageId, key: Key, rid: RecordId) -> IndexResult<RemoveOutcome> {
        let children: Vec<(Key, PageId)> = match self.node(page)? {
            TreeNode::Leaf { entries, .. } => {
                let start = lower_bound(entries, key);
                let found = entries[start..]
                    .iter()
                    .take_while(|(k, _)| *k == key)
                    .position(|(_, r)| *r == rid);
                let Some(offset) = found else {
                    return Ok(RemoveOutcome::NotFound);
                };

                let node = self.node_mut(page)?;
                if let TreeNode::Leaf { entries, .. } = &mut *node {
                    entries.remove(start + offset);
                }
                return Ok(RemoveOutcome::Removed {
                    max_key: node.max_key(),
                });
            }
            TreeNode::Internal { entries, .. } => {
                // A run of equal keys can span several children
                let start = lower_bound(entries, key);
                let end = (upper_bound(entries, key) + 1).min(entries.len());
                entries.get(start..end).unwrap_or_default().to_vec()
            }
        };

        for (offset, (_, child)) in children.into_iter().enumerate() {
            let max_key = match self.remove_from(child, key, rid)? {
                RemoveOutcome::NotFound => continue,
                RemoveOutcome::Removed { max_key } => max_key,
            };

            let pos = lower_bound(self.internal_entries_mut(page)?, key) + offset;
            match max_key {
                Some(max_key) => self.internal_entries_mut(page)?[pos].0 = max_key,
                None => {
                    self.internal_entries_mut(page)?.remove(pos);
                    self.discard(child)?;
                }
            }
            return Ok(RemoveOutcome::Removed {
                max_key: self.node(page)?.max_key(),
            });
        }
        Ok(RemoveOutcome::NotFound)
    }

    /// Drop an emptied node from the arena, unlinking a leaf from its
    /// siblings
    fn discard(&mut self, page: PageId) -> IndexResult<()> {
        let Some(node) = self.nodes.remove(&page) else {
            return Ok(());
        };
        self.dirty.remove(&page);

        if let TreeNode::Leaf { prev, next, .. } = node {
            if let Some(prev_page) = prev
                && let TreeNode::Leaf { next: link, .. } = self.node_mut(prev_page)?
            {
                *link = next;
            }
            if let Some(next_page) = next
                && let TreeNode::Leaf { prev: link, .. } = self.node_mut(next_page)?
            {
                *link = prev;
            }
        }
        trace!(path = %self.path.display(), page, "unlinked empty node");
        Ok(())
    }
}
