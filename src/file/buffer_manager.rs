use ahash::AHashMap;
use lru::LruCache;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, trace};

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// Buffer manager shared by the record and index managers.
///
/// The storage stack is single-threaded: one client drives every layer, so
/// the pool is shared through `Rc<RefCell<_>>` and is neither `Send` nor
/// `Sync`.
pub type SharedBufferManager = Rc<RefCell<BufferManager>>;

/// Index into the frame array
type FrameId = usize;

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    file: FileHandle,
    page_id: PageId,
}

/// Which page a frame currently holds
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    key: BufferKey,
    /// Frame holds bytes not yet written to disk
    dirty: bool,
}

/// Fixed-size page cache with LRU eviction and deferred write-back.
///
/// Frames are split into two disjoint groups: unused frames, and in-use
/// frames ordered by recency of access. A frame is taken from the unused
/// group first; only when that is empty is the least recently used frame
/// evicted (written back first if dirty).
pub struct BufferManager {
    file_manager: PagedFileManager,
    /// Page bytes, one buffer per frame (allocated on first use)
    frames: Vec<Vec<u8>>,
    /// Occupant of each frame, `None` for unused frames
    meta: Vec<Option<FrameMeta>>,
    /// (file, page) -> frame
    page_table: AHashMap<BufferKey, FrameId>,
    /// In-use frames, least recently used at the tail
    recency: LruCache<FrameId, ()>,
    /// Unused frames
    unused: Vec<FrameId>,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    /// Create a buffer manager holding at most `capacity` pages
    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");

        Self {
            file_manager,
            frames: vec![Vec::new(); capacity],
            meta: vec![None; capacity],
            page_table: AHashMap::with_capacity(capacity),
            recency: LruCache::unbounded(),
            // Reversed so frame 0 is handed out first
            unused: (0..capacity).rev().collect(),
        }
    }

    /// Wrap the pool for sharing between the record and index managers
    pub fn into_shared(self) -> SharedBufferManager {
        Rc::new(RefCell::new(self))
    }

    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    // ========== File lifecycle ==========

    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        self.file_manager.create_file(path)
    }

    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        self.file_manager.open_file(path)
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.file_manager.exists(path)
    }

    /// Write back every cached page of `file`, release its frames and close
    /// the underlying OS file
    pub fn close_file(&mut self, file: FileHandle) -> FileResult<()> {
        self.flush_and_release(file)?;
        self.file_manager.close_file(file)
    }

    /// Delete a file. Cached pages of the file are dropped without being
    /// written back.
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        if let Some(file) = self.file_manager.handle_of(&path) {
            for frame in self.frames_of(file) {
                self.release_frame(frame);
            }
        }
        self.file_manager.remove_file(path)
    }

    /// Write back and release every frame, then close every open file
    pub fn shutdown(&mut self) -> FileResult<()> {
        self.flush_and_clear()?;
        for file in self.file_manager.open_handles() {
            self.file_manager.close_file(file)?;
        }
        debug!("buffer pool shut down");
        Ok(())
    }

    // ========== Page access ==========

    /// Frame holding (file, page_id), if cached
    fn lookup(&self, file: FileHandle, page_id: PageId) -> Option<FrameId> {
        self.page_table.get(&BufferKey { file, page_id }).copied()
    }

    /// Frame holding (file, page_id), loading the page from disk on a miss.
    /// The frame becomes the most recently used.
    fn fetch(&mut self, file: FileHandle, page_id: PageId) -> FileResult<FrameId> {
        match self.lookup(file, page_id) {
            Some(frame) => {
                self.recency.promote(&frame);
                trace!(file = file.as_usize(), page_id, frame, "buffer hit");
                Ok(frame)
            }
            None => self.load_page(file, page_id),
        }
    }

    /// Get a page from the buffer pool, loading it from disk if necessary
    pub fn get_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&[u8]> {
        let frame = self.fetch(file, page_id)?;
        Ok(self.frames[frame].as_slice())
    }

    /// Get a mutable reference to a page, loading it if necessary.
    /// The page is marked dirty.
    pub fn get_page_mut(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&mut [u8]> {
        let frame = self.fetch(file, page_id)?;
        if let Some(meta) = self.meta[frame].as_mut() {
            meta.dirty = true;
        }
        Ok(self.frames[frame].as_mut_slice())
    }

    /// Replace the contents of a page. The write stays in the pool until the
    /// frame is evicted or the file is closed.
    pub fn write_page(&mut self, file: FileHandle, page_id: PageId, data: &[u8]) -> FileResult<()> {
        check_page_len(data.len())?;

        let frame = self.frame_for_overwrite(file, page_id)?;

        self.frames[frame].copy_from_slice(data);
        if let Some(meta) = self.meta[frame].as_mut() {
            meta.dirty = true;
        }
        Ok(())
    }

    /// Append a page to the end of the file and cache it. Returns the new
    /// page's number.
    pub fn append_page(&mut self, file: FileHandle, data: &[u8]) -> FileResult<PageId> {
        let page_id = self.file_manager.append_page(file, data)?;

        let frame = self.frame_for_overwrite(file, page_id)?;
        self.frames[frame].copy_from_slice(data);

        Ok(page_id)
    }

    // ========== Write-back ==========

    /// Flush all dirty pages to disk
    pub fn flush_all(&mut self) -> FileResult<()> {
        for frame in 0..self.meta.len() {
            self.write_back(frame)?;
        }
        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Flush all dirty pages and return every frame to the unused group
    pub fn flush_and_clear(&mut self) -> FileResult<()> {
        self.flush_all()?;
        for frame in 0..self.meta.len() {
            self.release_frame(frame);
        }
        Ok(())
    }

    fn flush_and_release(&mut self, file: FileHandle) -> FileResult<()> {
        for frame in self.frames_of(file) {
            self.write_back(frame)?;
            self.release_frame(frame);
        }
        Ok(())
    }

    /// Write a frame to disk if it is dirty
    fn write_back(&mut self, frame: FrameId) -> FileResult<()> {
        if let Some(meta) = self.meta[frame].as_mut()
            && meta.dirty
        {
            self.file_manager
                .write_page(meta.key.file, meta.key.page_id, &self.frames[frame])?;
            meta.dirty = false;
        }
        Ok(())
    }

    // ========== Frame management ==========

    /// Load a page from disk into a fresh frame
    fn load_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<FrameId> {
        let frame = self.acquire_frame()?;

        if let Err(err) = self
            .file_manager
            .read_page(file, page_id, &mut self.frames[frame])
        {
            self.unused.push(frame);
            return Err(err);
        }

        trace!(file = file.as_usize(), page_id, frame, "buffer miss");
        self.install(frame, BufferKey { file, page_id });
        Ok(frame)
    }

    /// Frame for a page whose old contents are about to be replaced, so a
    /// miss does not read the page from disk
    fn frame_for_overwrite(&mut self, file: FileHandle, page_id: PageId) -> FileResult<FrameId> {
        match self.lookup(file, page_id) {
            Some(frame) => {
                self.recency.promote(&frame);
                Ok(frame)
            }
            None => {
                let frame = self.acquire_frame()?;
                self.install(frame, BufferKey { file, page_id });
                Ok(frame)
            }
        }
    }

    /// Take an unused frame, or evict the least recently used one
    fn acquire_frame(&mut self) -> FileResult<FrameId> {
        let frame = match self.unused.pop() {
            Some(frame) => frame,
            None => {
                let (frame, ()) = self.recency.pop_lru().ok_or(FileError::BufferPoolFull)?;
                if let Err(err) = self.write_back(frame) {
                    self.recency.push(frame, ());
                    return Err(err);
                }
                if let Some(meta) = self.meta[frame].take() {
                    self.page_table.remove(&meta.key);
                    trace!(
                        file = meta.key.file.as_usize(),
                        page_id = meta.key.page_id,
                        frame,
                        "evicted page"
                    );
                }
                frame
            }
        };

        if self.frames[frame].is_empty() {
            self.frames[frame] = vec![0u8; PAGE_SIZE];
        }
        Ok(frame)
    }

    /// Map a frame to a page and make it the most recently used
    fn install(&mut self, frame: FrameId, key: BufferKey) {
        self.meta[frame] = Some(FrameMeta { key, dirty: false });
        self.page_table.insert(key, frame);
        self.recency.push(frame, ());
    }

    /// Return a frame to the unused group without writing it back
    fn release_frame(&mut self, frame: FrameId) {
        if let Some(meta) = self.meta[frame].take() {
            self.page_table.remove(&meta.key);
            self.recency.pop(&frame);
            self.unused.push(frame);
        }
    }

    /// Frames currently holding pages of `file`
    fn frames_of(&self, file: FileHandle) -> Vec<FrameId> {
        self.page_table
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(_, &frame)| frame)
            .collect()
    }

    // ========== Introspection ==========

    /// Number of frames in the pool
    pub fn capacity(&self) -> usize {
        self.meta.len()
    }

    /// Number of pages currently cached
    pub fn buffer_pool_size(&self) -> usize {
        self.page_table.len()
    }

    pub fn unused_frame_count(&self) -> usize {
        self.unused.len()
    }

    pub fn is_page_cached(&self, file: FileHandle, page_id: PageId) -> bool {
        self.lookup(file, page_id).is_some()
    }

    pub fn dirty_page_count(&self) -> usize {
        self.meta.iter().flatten().filter(|m| m.dirty).count()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Flush all dirty pages when the buffer manager is dropped
        let _ = self.flush_all();
    }
}

fn check_page_len(len: usize) -> FileResult<()> {
    if len != PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}
