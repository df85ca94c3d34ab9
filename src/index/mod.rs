//! Index management module

mod error;
mod file_index;
mod node;
#[cfg(test)]
mod tests;

pub use error::{IndexError, IndexResult};
pub use file_index::FileIndex;
pub use node::{Key, TreeNode, lower_bound, upper_bound};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::file::{PageId, SharedBufferManager};
use crate::record::RecordId;

/// File name suffix for index files
pub const INDEX_SUFFIX: &str = ".index";

/// High-level index manager: keeps index files open by path over the shared
/// buffer pool.
///
/// Root pages are owned by the caller (typically a catalog): an index is
/// opened with its root and [`IndexManager::close_index`] hands back the
/// root, which changes whenever the root splits.
pub struct IndexManager {
    buffer_manager: SharedBufferManager,
    open_indexes: HashMap<PathBuf, FileIndex>,
}

fn lookup_index<'a>(
    open_indexes: &'a mut HashMap<PathBuf, FileIndex>,
    path: &Path,
) -> IndexResult<&'a mut FileIndex> {
    open_indexes
        .get_mut(path)
        .ok_or_else(|| IndexError::IndexNotOpen(path.display().to_string()))
}

impl IndexManager {
    pub fn new(buffer_manager: SharedBufferManager) -> Self {
        Self {
            buffer_manager,
            open_indexes: HashMap::new(),
        }
    }

    /// Create an empty index file. Returns its root page; the index is not
    /// left open.
    pub fn create_index<P: AsRef<Path>>(&mut self, path: P) -> IndexResult<PageId> {
        FileIndex::create(&mut self.buffer_manager.borrow_mut(), path)
    }

    /// Open an index rooted at `root`. Opening an already open path is a
    /// no-op.
    pub fn open_index<P: AsRef<Path>>(&mut self, path: P, root: PageId) -> IndexResult<()> {
        let path = path.as_ref();
        if self.open_indexes.contains_key(path) {
            return Ok(());
        }

        let index = FileIndex::open(&mut self.buffer_manager.borrow_mut(), path, root)?;
        self.open_indexes.insert(path.to_path_buf(), index);
        Ok(())
    }

    /// Write back and close an index. Returns its current root page.
    pub fn close_index<P: AsRef<Path>>(&mut self, path: P) -> IndexResult<PageId> {
        let path = path.as_ref();
        let index = self
            .open_indexes
            .remove(path)
            .ok_or_else(|| IndexError::IndexNotOpen(path.display().to_string()))?;
        index.close(&mut self.buffer_manager.borrow_mut())
    }

    /// Delete an index file, discarding unsaved changes
    pub fn remove_index<P: AsRef<Path>>(&mut self, path: P) -> IndexResult<()> {
        let path = path.as_ref();
        self.open_indexes.remove(path);

        let mut buffer_manager = self.buffer_manager.borrow_mut();
        if !buffer_manager.exists(path) {
            return Err(IndexError::IndexNotFound(path.display().to_string()));
        }
        buffer_manager.remove_file(path)?;
        Ok(())
    }

    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.open_indexes.contains_key(path.as_ref())
    }

    /// Get a reference to an open index
    pub fn get_index<P: AsRef<Path>>(&self, path: P) -> Option<&FileIndex> {
        self.open_indexes.get(path.as_ref())
    }

    pub fn search<P: AsRef<Path>>(&mut self, path: P, key: Key) -> IndexResult<Option<RecordId>> {
        lookup_index(&mut self.open_indexes, path.as_ref())?.search(key)
    }

    /// Inclusive range lookup; `None` leaves that side unbounded
    pub fn range_search<P: AsRef<Path>>(
        &mut self,
        path: P,
        lo: Option<Key>,
        hi: Option<Key>,
    ) -> IndexResult<Vec<(Key, RecordId)>> {
        lookup_index(&mut self.open_indexes, path.as_ref())?.range_search(lo, hi)
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, key: Key, rid: RecordId) -> IndexResult<()> {
        let index = lookup_index(&mut self.open_indexes, path.as_ref())?;
        index.insert(&mut self.buffer_manager.borrow_mut(), key, rid)
    }

    /// Remove the entry matching both `key` and `rid`. Returns whether an
    /// entry was removed.
    pub fn remove<P: AsRef<Path>>(&mut self, path: P, key: Key, rid: RecordId) -> IndexResult<bool> {
        lookup_index(&mut self.open_indexes, path.as_ref())?.remove(key, rid)
    }

    /// Write every open index's modified nodes back to disk
    pub fn flush_all(&mut self) -> IndexResult<()> {
        let mut buffer_manager = self.buffer_manager.borrow_mut();
        for index in self.open_indexes.values_mut() {
            index.flush(&mut buffer_manager)?;
        }
        buffer_manager.flush_all()?;
        Ok(())
    }

    /// Close every open index. Returns the root page of each.
    pub fn shutdown(&mut self) -> IndexResult<Vec<(PathBuf, PageId)>> {
        let mut buffer_manager = self.buffer_manager.borrow_mut();
        let mut roots = Vec::with_capacity(self.open_indexes.len());
        for (path, index) in self.open_indexes.drain() {
            roots.push((path, index.close(&mut buffer_manager)?));
        }
        buffer_manager.flush_all()?;
        Ok(roots)
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if self.open_indexes.is_empty() {
            return;
        }
        let Ok(mut buffer_manager) = self.buffer_manager.try_borrow_mut() else {
            warn!("buffer pool busy, index files left open");
            return;
        };
        for (path, index) in self.open_indexes.drain() {
            if let Err(err) = index.close(&mut buffer_manager) {
                warn!(path = %path.display(), %err, "failed to close index file");
            }
        }
    }
}
