mod error;
mod header;
mod page;
mod record;
mod record_file;
mod schema;
mod value;


pub use error::{RecordError, RecordResult};
pub use header::{FileHeader, get_bitmap_len, get_page_capacity, get_record_capacity};
pub use page::{BITMAP_OFFSET, DataPage, NEXT_FREE_PAGE_SIZE, PageLayout};
pub use record::{Record, RecordId, SlotId};
pub use record_file::{RecordFile, RecordScan};
pub use schema::{ColumnDef, TableSchema};
pub use value::{DataType, Value};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::file::{PageId, SharedBufferManager};

/// File name suffix for record files
pub const TABLE_SUFFIX: &str = ".table";

/// High-level record manager: keeps record files open by path over the
/// shared buffer pool
pub struct RecordManager {
    buffer_manager: SharedBufferManager,
    open_files: HashMap<PathBuf, RecordFile>,
}

fn lookup_file<'a>(
    open_files: &'a mut HashMap<PathBuf, RecordFile>,
    path: &Path,
) -> RecordResult<&'a mut RecordFile> {
    open_files
        .get_mut(path)
        .ok_or_else(|| RecordError::FileNotOpen(path.display().to_string()))
}

impl RecordManager {
    pub fn new(buffer_manager: SharedBufferManager) -> Self {
        Self {
            buffer_manager,
            open_files: HashMap::new(),
        }
    }

    pub fn buffer_manager(&self) -> &SharedBufferManager {
        &self.buffer_manager
    }

    /// Create a record file for `record_len`-byte records. The file is not
    /// left open.
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P, record_len: usize) -> RecordResult<()> {
        RecordFile::create(&mut self.buffer_manager.borrow_mut(), path, record_len)
    }

    /// Delete a record file, discarding any cached pages
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<()> {
        let path = path.as_ref();
        self.open_files.remove(path);
        self.buffer_manager.borrow_mut().remove_file(path)?;
        Ok(())
    }

    /// Open a record file. Opening an already open path is a no-op.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<()> {
        let path = path.as_ref();
        if self.open_files.contains_key(path) {
            return Ok(());
        }

        let file = RecordFile::open(&mut self.buffer_manager.borrow_mut(), path)?;
        self.open_files.insert(path.to_path_buf(), file);
        Ok(())
    }

    /// Persist the header and write back every cached page of the file
    pub fn close_file<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<()> {
        let path = path.as_ref();
        let file = self
            .open_files
            .remove(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.display().to_string()))?;
        file.close(&mut self.buffer_manager.borrow_mut())
    }

    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.open_files.contains_key(path.as_ref())
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, data: &[u8]) -> RecordResult<RecordId> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        file.insert_record(&mut self.buffer_manager.borrow_mut(), data)
    }

    pub fn delete<P: AsRef<Path>>(&mut self, path: P, rid: RecordId) -> RecordResult<()> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        file.delete_record(&mut self.buffer_manager.borrow_mut(), rid)
    }

    pub fn update<P: AsRef<Path>>(&mut self, path: P, rid: RecordId, data: &[u8]) -> RecordResult<()> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        file.update_record(&mut self.buffer_manager.borrow_mut(), rid, data)
    }

    pub fn get<P: AsRef<Path>>(&mut self, path: P, rid: RecordId) -> RecordResult<Record> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        file.get_record(&mut self.buffer_manager.borrow_mut(), rid)
    }

    /// Copy of a raw page
    pub fn get_page<P: AsRef<Path>>(&mut self, path: P, page_id: PageId) -> RecordResult<Vec<u8>> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        let mut buffer_manager = self.buffer_manager.borrow_mut();
        Ok(file.get_page(&mut buffer_manager, page_id)?.to_vec())
    }

    /// Lazy scan over every record of an open file
    pub fn get_all_records<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<RecordScan> {
        let file = lookup_file(&mut self.open_files, path.as_ref())?;
        Ok(file.scan(self.buffer_manager.clone()))
    }

    pub fn record_count<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<usize> {
        Ok(lookup_file(&mut self.open_files, path.as_ref())?.record_count())
    }

    pub fn header<P: AsRef<Path>>(&mut self, path: P) -> RecordResult<FileHeader> {
        Ok(lookup_file(&mut self.open_files, path.as_ref())?.header().clone())
    }

    /// Close every open file, then write back all dirty pages
    pub fn shutdown(&mut self) -> RecordResult<()> {
        let mut buffer_manager = self.buffer_manager.borrow_mut();
        for (_, file) in self.open_files.drain() {
            file.close(&mut buffer_manager)?;
        }
        buffer_manager.flush_all()?;
        Ok(())
    }
}

impl Drop for RecordManager {
    fn drop(&mut self) {
        if self.open_files.is_empty() {
            return;
        }
        let Ok(mut buffer_manager) = self.buffer_manager.try_borrow_mut() else {
            warn!("buffer pool busy, record files left open");
            return;
        };
        for (path, file) in self.open_files.drain() {
            if let Err(err) = file.close(&mut buffer_manager) {
                warn!(path = %path.display(), %err, "failed to close record file");
            }
        }
    }
}
