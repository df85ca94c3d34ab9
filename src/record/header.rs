use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::page::{BITMAP_OFFSET, NEXT_FREE_PAGE_SIZE};
use crate::file::{PAGE_SIZE, PageId};

/// Maximum number of records a data page can hold.
///
/// With `x` slots the page needs `ceil(x / 8)` bitmap bytes plus
/// `x * record_len` data bytes, so
/// `x + 7 + 8 * x * record_len <= 8 * PAGE_SIZE`.
/// The result can be one short of the true maximum; it is kept as is so
/// page layouts stay stable across versions.
pub fn get_record_capacity(record_len: usize) -> usize {
    let capacity = (PAGE_SIZE * 8 - 7) / (1 + record_len * 8);
    debug_assert!(get_bitmap_len(capacity) + capacity * record_len <= PAGE_SIZE);
    capacity
}

/// Number of bytes needed for a bitmap with one bit per slot
pub fn get_bitmap_len(record_capacity: usize) -> usize {
    record_capacity.div_ceil(8)
}

/// Slots a data page actually holds once the free-page pointer is placed in
/// front of the bitmap. Starts from [`get_record_capacity`] and drops slots
/// until pointer, bitmap and slots fit in one page.
pub fn get_page_capacity(record_len: usize) -> usize {
    let mut capacity = get_record_capacity(record_len);
    while capacity > 0
        && NEXT_FREE_PAGE_SIZE + get_bitmap_len(capacity) + capacity * record_len > PAGE_SIZE
    {
        capacity -= 1;
    }
    capacity
}

/// Metadata stored in page 0 of every record file, encoded as JSON and
/// zero-padded to the page size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Bytes per record
    pub record_len: usize,
    /// Slots per data page
    pub record_capacity: usize,
    /// Live records in the file
    pub record_num: usize,
    /// Pages in the file, header page included
    pub page_num: usize,
    /// Name the file was created under
    pub filename: String,
    /// Bytes of occupancy bitmap per data page
    pub bitmap_len: usize,
    /// Head of the free-page chain, 0 when no page has a free slot
    pub next_available_page: PageId,
}

impl FileHeader {
    /// Header of a freshly created file with no data pages
    pub fn new(filename: &str, record_len: usize) -> RecordResult<Self> {
        if record_len == 0 {
            return Err(RecordError::UnsupportedRecordLength(record_len));
        }

        let record_capacity = get_page_capacity(record_len);
        if record_capacity == 0 {
            return Err(RecordError::UnsupportedRecordLength(record_len));
        }
        let bitmap_len = get_bitmap_len(record_capacity);

        Ok(Self {
            record_len,
            record_capacity,
            record_num: 0,
            page_num: 1,
            filename: filename.to_string(),
            bitmap_len,
            next_available_page: 0,
        })
    }

    /// Encode into a full page
    pub fn to_page(&self) -> RecordResult<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > PAGE_SIZE {
            return Err(RecordError::CorruptHeader(format!(
                "encoded header is {} bytes, larger than a page",
                json.len()
            )));
        }

        let mut page = vec![0u8; PAGE_SIZE];
        page[..json.len()].copy_from_slice(&json);
        Ok(page)
    }

    /// Decode from a header page, checking that the stored layout matches
    /// what the record length implies
    pub fn from_page(page: &[u8]) -> RecordResult<Self> {
        let end = page.iter().position(|&b| b == 0).unwrap_or(page.len());
        let header: FileHeader = serde_json::from_slice(&page[..end])
            .map_err(|e| RecordError::CorruptHeader(e.to_string()))?;

        let capacity = get_page_capacity(header.record_len);
        if capacity == 0 || header.record_capacity != capacity {
            return Err(RecordError::CorruptHeader(format!(
                "record_capacity {} does not match record_len {} (expected {})",
                header.record_capacity, header.record_len, capacity
            )));
        }
        if header.bitmap_len != get_bitmap_len(capacity) {
            return Err(RecordError::CorruptHeader(format!(
                "bitmap_len {} does not match capacity {}",
                header.bitmap_len, capacity
            )));
        }
        if header.page_num == 0 || header.next_available_page >= header.page_num {
            return Err(RecordError::CorruptHeader(format!(
                "free list head {} outside file of {} pages",
                header.next_available_page, header.page_num
            )));
        }

        Ok(header)
    }

    /// Byte offset of the first record slot in a data page
    pub fn slots_offset(&self) -> usize {
        BITMAP_OFFSET + self.bitmap_len
    }
}
