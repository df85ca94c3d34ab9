use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::error::{RecordError, RecordResult};
use super::header::FileHeader;
use super::page::{DataPage, PageLayout, empty_page};
use super::record::{Record, RecordId};
use crate::file::{BufferManager, FileHandle, PageId, SharedBufferManager};

/// An open record file: page 0 holds the [`FileHeader`], pages
/// `1..page_num` are slotted data pages.
///
/// Data pages with at least one free slot form a singly linked chain
/// starting at `header.next_available_page`; inserts always go to the head
/// of that chain. Full pages are not on the chain.
#[derive(Debug)]
pub struct RecordFile {
    path: PathBuf,
    file: FileHandle,
    header: FileHeader,
    layout: PageLayout,
}

impl RecordFile {
    /// Create a record file holding records of `record_len` bytes. The file
    /// is left closed.
    pub fn create<P: AsRef<Path>>(
        buffer_mgr: &mut BufferManager,
        path: P,
        record_len: usize,
    ) -> RecordResult<()> {
        let path = path.as_ref();
        let header = FileHeader::new(&path.display().to_string(), record_len)?;

        buffer_mgr.create_file(path)?;
        let file = buffer_mgr.open_file(path)?;
        buffer_mgr.append_page(file, &header.to_page()?)?;
        buffer_mgr.close_file(file)?;

        debug!(
            path = %path.display(),
            record_len,
            capacity = header.record_capacity,
            "created record file"
        );
        Ok(())
    }

    /// Open an existing record file and load its header
    pub fn open<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> RecordResult<Self> {
        let path = path.as_ref();
        let file = buffer_mgr.open_file(path)?;

        let header = match Self::read_header(buffer_mgr, file) {
            Ok(header) => header,
            Err(err) => {
                buffer_mgr.close_file(file)?;
                return Err(err);
            }
        };

        debug!(
            path = %path.display(),
            records = header.record_num,
            pages = header.page_num,
            "opened record file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            layout: PageLayout::from_header(&header),
            header,
        })
    }

    fn read_header(buffer_mgr: &mut BufferManager, file: FileHandle) -> RecordResult<FileHeader> {
        let header = FileHeader::from_page(buffer_mgr.get_page(file, 0)?)?;

        let on_disk = buffer_mgr.file_manager_mut().page_count(file)?;
        if on_disk < header.page_num {
            return Err(RecordError::CorruptHeader(format!(
                "header claims {} pages, file has {}",
                header.page_num, on_disk
            )));
        }
        Ok(header)
    }

    /// Persist the header and close the file, writing back its cached pages
    pub fn close(self, buffer_mgr: &mut BufferManager) -> RecordResult<()> {
        self.write_header(buffer_mgr)?;
        buffer_mgr.close_file(self.file)?;
        debug!(path = %self.path.display(), "closed record file");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_handle(&self) -> FileHandle {
        self.file
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of live records
    pub fn record_count(&self) -> usize {
        self.header.record_num
    }

    /// Store a record in the first free slot of the head of the free-page
    /// chain, appending a fresh page when the chain is empty
    pub fn insert_record(
        &mut self,
        buffer_mgr: &mut BufferManager,
        data: &[u8],
    ) -> RecordResult<RecordId> {
        self.check_len(data.len())?;

        if self.header.next_available_page == 0 {
            let page_id = buffer_mgr.append_page(self.file, &empty_page())?;
            if page_id != self.header.page_num {
                return Err(RecordError::CorruptHeader(format!(
                    "appended page {} but header expects {}",
                    page_id, self.header.page_num
                )));
            }
            self.header.page_num += 1;
            self.header.next_available_page = page_id;
            trace!(path = %self.path.display(), page_id, "appended data page");
        }

        let page_id = self.header.next_available_page;
        if page_id >= self.header.page_num {
            return Err(RecordError::CorruptHeader(format!(
                "free list head {} outside file of {} pages",
                page_id, self.header.page_num
            )));
        }

        let mut page = DataPage::new(buffer_mgr.get_page_mut(self.file, page_id)?, self.layout);
        let slot_id = page
            .first_free_slot()
            .ok_or(RecordError::CorruptPage(page_id))?;

        page.write_record(slot_id, data);
        page.mark_used(slot_id);
        if page.is_full() {
            // Leaves the chain
            self.header.next_available_page = page.next_free_page();
            page.set_next_free_page(0);
        }

        self.header.record_num += 1;
        self.write_header(buffer_mgr)?;

        Ok(RecordId::new(page_id, slot_id))
    }

    /// Free a record's slot. A page that was full rejoins the free-page
    /// chain at its head.
    pub fn delete_record(&mut self, buffer_mgr: &mut BufferManager, rid: RecordId) -> RecordResult<()> {
        self.check_rid(rid)?;

        let head = self.header.next_available_page;
        let mut page = DataPage::new(buffer_mgr.get_page_mut(self.file, rid.page_id)?, self.layout);
        if page.is_slot_free(rid.slot_id) {
            return Err(RecordError::RecordNotFound(rid));
        }
        let Some(record_num) = self.header.record_num.checked_sub(1) else {
            return Err(RecordError::CorruptHeader(format!(
                "record_num is 0 but slot {} of page {} is occupied",
                rid.slot_id, rid.page_id
            )));
        };

        let was_full = page.is_full();
        page.mark_free(rid.slot_id);
        if was_full {
            page.set_next_free_page(head);
            self.header.next_available_page = rid.page_id;
        }

        self.header.record_num = record_num;
        self.write_header(buffer_mgr)
    }

    /// Overwrite a record in place
    pub fn update_record(
        &self,
        buffer_mgr: &mut BufferManager,
        rid: RecordId,
        data: &[u8],
    ) -> RecordResult<()> {
        self.check_len(data.len())?;
        self.check_rid(rid)?;

        let mut page = DataPage::new(buffer_mgr.get_page_mut(self.file, rid.page_id)?, self.layout);
        if page.is_slot_free(rid.slot_id) {
            return Err(RecordError::RecordNotFound(rid));
        }
        page.write_record(rid.slot_id, data);
        Ok(())
    }

    pub fn get_record(&self, buffer_mgr: &mut BufferManager, rid: RecordId) -> RecordResult<Record> {
        self.check_rid(rid)?;

        let page = DataPage::new(buffer_mgr.get_page(self.file, rid.page_id)?, self.layout);
        if page.is_slot_free(rid.slot_id) {
            return Err(RecordError::RecordNotFound(rid));
        }
        Ok(Record::new(rid, page.record(rid.slot_id).to_vec()))
    }

    /// Raw bytes of any page of the file, header page included
    pub fn get_page<'a>(
        &self,
        buffer_mgr: &'a mut BufferManager,
        page_id: PageId,
    ) -> RecordResult<&'a [u8]> {
        if page_id >= self.header.page_num {
            return Err(RecordError::PageOutOfRange {
                page_id,
                page_num: self.header.page_num,
            });
        }
        Ok(buffer_mgr.get_page(self.file, page_id)?)
    }

    /// Collect every record into memory
    pub fn records(&self, buffer_mgr: &mut BufferManager) -> RecordResult<Vec<Record>> {
        let mut records = Vec::with_capacity(self.header.record_num);
        for page_id in 1..self.header.page_num {
            let page = DataPage::new(buffer_mgr.get_page(self.file, page_id)?, self.layout);
            records.extend(
                page.occupied_slots()
                    .map(|slot_id| Record::new(RecordId::new(page_id, slot_id), page.record(slot_id).to_vec())),
            );
        }
        Ok(records)
    }

    /// Lazy scan over every record in page then slot order. Pages appended
    /// after the scan was created are not visited.
    pub fn scan(&self, buffer_manager: SharedBufferManager) -> RecordScan {
        RecordScan {
            buffer_manager,
            file: self.file,
            layout: self.layout,
            page_num: self.header.page_num,
            page_id: 1,
            slot_id: 0,
        }
    }

    fn write_header(&self, buffer_mgr: &mut BufferManager) -> RecordResult<()> {
        buffer_mgr.write_page(self.file, 0, &self.header.to_page()?)?;
        Ok(())
    }

    fn check_len(&self, len: usize) -> RecordResult<()> {
        if len != self.header.record_len {
            return Err(RecordError::InvalidRecordLength {
                expected: self.header.record_len,
                actual: len,
            });
        }
        Ok(())
    }

    fn check_rid(&self, rid: RecordId) -> RecordResult<()> {
        if rid.page_id == 0
            || rid.page_id >= self.header.page_num
            || rid.slot_id >= self.header.record_capacity
        {
            return Err(RecordError::RecordNotFound(rid));
        }
        Ok(())
    }
}

/// Streaming record scan (yields records one-by-one).
///
/// The scan borrows the shared buffer pool only while producing a record,
/// so the file may be modified between calls to `next`.
#[derive(Clone)]
pub struct RecordScan {
    buffer_manager: SharedBufferManager,
    file: FileHandle,
    layout: PageLayout,
    page_num: usize,
    page_id: PageId,
    slot_id: usize,
}

impl RecordScan {
    /// Restart from the first data page
    pub fn rewind(&mut self) {
        self.page_id = 1;
        self.slot_id = 0;
    }
}

impl Iterator for RecordScan {
    type Item = RecordResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.page_id < self.page_num {
            let mut buffer_manager = self.buffer_manager.borrow_mut();
            let bytes = match buffer_manager.get_page(self.file, self.page_id) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.page_id = self.page_num;
                    return Some(Err(err.into()));
                }
            };

            let page = DataPage::new(bytes, self.layout);
            if let Some(slot_id) = page.next_occupied(self.slot_id) {
                self.slot_id = slot_id + 1;
                let rid = RecordId::new(self.page_id, slot_id);
                return Some(Ok(Record::new(rid, page.record(slot_id).to_vec())));
            }

            self.page_id += 1;
            self.slot_id = 0;
        }
        None
    }
}
