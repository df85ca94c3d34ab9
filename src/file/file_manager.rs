use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{FileError, FileResult};
use super::{MAX_OPEN_FILES, PAGE_SIZE, PageId};

/// Handle to an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Page-granular access to files on disk. Every call goes straight to the
/// OS; caching is the buffer manager's job.
pub struct PagedFileManager {
    /// Map from file handles to open files
    open_files: HashMap<FileHandle, FileEntry>,
    /// Map from canonical paths to handles (for idempotent open)
    path_to_handle: HashMap<PathBuf, FileHandle>,
    /// Next available file handle
    next_handle: usize,
    /// Maximum number of open files
    max_open_files: usize,
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(MAX_OPEN_FILES)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    /// Create a new, empty file. Fails if the path already exists.
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        debug!(path = %path.display(), "created file");
        Ok(())
    }

    /// Check whether a file exists on disk
    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref().is_file()
    }

    /// Open an existing file. Opening a path that is already open returns
    /// the handle it was given the first time.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        debug!(path = %path.display(), handle = handle.0, "opened file");
        self.open_files.insert(
            handle,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    /// Release the OS file. Cached pages must already have been written back.
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        debug!(path = %entry.path.display(), handle = handle.0, "closed file");
        Ok(())
    }

    /// Remove (delete) a file, closing it first if it is open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Some(handle) = self.handle_of(path) {
            self.close_file(handle)?;
        }

        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "removed file");
        Ok(())
    }

    /// Look up the handle of an open file by path
    pub fn handle_of<P: AsRef<Path>>(&self, path: P) -> Option<FileHandle> {
        let canonical = path.as_ref().canonicalize().ok()?;
        self.path_to_handle.get(&canonical).copied()
    }

    /// Read page `page_id` into `buffer`. Bytes past the end of the file
    /// read as zero.
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        check_page_len(buffer.len())?;
        let entry = self.entry_mut(handle)?;

        let offset = (page_id * PAGE_SIZE) as u64;
        entry.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = entry.file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write `buffer` at page `page_id`, extending the file if necessary
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        check_page_len(buffer.len())?;
        let entry = self.entry_mut(handle)?;

        let offset = (page_id * PAGE_SIZE) as u64;
        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;

        Ok(())
    }

    /// Write `buffer` at the end of the file and return the number of the
    /// page it landed on
    pub fn append_page(&mut self, handle: FileHandle, buffer: &[u8]) -> FileResult<PageId> {
        check_page_len(buffer.len())?;
        let entry = self.entry_mut(handle)?;

        entry.file.seek(SeekFrom::End(0))?;
        entry.file.write_all(buffer)?;
        let end = entry.file.stream_position()?;

        let page_id = (end / PAGE_SIZE as u64) as PageId - 1;
        debug!(handle = handle.0, page_id, "appended page");
        Ok(page_id)
    }

    /// Number of whole or partial pages in the file
    pub fn page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let entry = self.entry_mut(handle)?;
        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    pub fn sync_file(&mut self, handle: FileHandle) -> FileResult<()> {
        self.entry_mut(handle)?.file.sync_data()?;
        Ok(())
    }

    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    /// Handles of every open file
    pub fn open_handles(&self) -> Vec<FileHandle> {
        self.open_files.keys().copied().collect()
    }

    fn entry_mut(&mut self, handle: FileHandle) -> FileResult<&mut FileEntry> {
        self.open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
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
