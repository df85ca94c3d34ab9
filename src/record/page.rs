use super::header::FileHeader;
use super::record::SlotId;
use crate::file::{PAGE_SIZE, PageId};

/// Bytes at the start of a data page holding the next-free-page pointer
pub const NEXT_FREE_PAGE_SIZE: usize = 4;

/// Offset of the occupancy bitmap within a data page
pub const BITMAP_OFFSET: usize = NEXT_FREE_PAGE_SIZE;

/// Slot geometry shared by every data page of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub record_len: usize,
    pub capacity: usize,
    pub bitmap_len: usize,
}

impl PageLayout {
    pub fn from_header(header: &FileHeader) -> Self {
        Self {
            record_len: header.record_len,
            capacity: header.record_capacity,
            bitmap_len: header.bitmap_len,
        }
    }

    fn slot_start(&self, slot_id: SlotId) -> usize {
        BITMAP_OFFSET + self.bitmap_len + slot_id * self.record_len
    }
}

/// Bytes of a freshly appended data page: every slot free, not linked to
/// any other page
pub fn empty_page() -> Vec<u8> {
    let mut page = vec![0xFFu8; PAGE_SIZE];
    page[..NEXT_FREE_PAGE_SIZE].fill(0);
    page
}

/// View over a data page living in the buffer pool.
///
/// Layout:
/// - `[0, 4)` next page in the free-page chain (u32, big-endian, 0 = end)
/// - `[4, 4 + bitmap_len)` occupancy bitmap, bit set = slot free
/// - `capacity` record slots of `record_len` bytes each
///
/// Slot ids passed to the accessors must be below `layout.capacity`.
pub struct DataPage<B> {
    buffer: B,
    layout: PageLayout,
}

impl<B: AsRef<[u8]>> DataPage<B> {
    pub fn new(buffer: B, layout: PageLayout) -> Self {
        Self { buffer, layout }
    }

    fn bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    fn bitmap(&self) -> &[u8] {
        &self.bytes()[BITMAP_OFFSET..BITMAP_OFFSET + self.layout.bitmap_len]
    }

    /// Next page in the free-page chain
    pub fn next_free_page(&self) -> PageId {
        let mut raw = [0u8; NEXT_FREE_PAGE_SIZE];
        raw.copy_from_slice(&self.bytes()[..NEXT_FREE_PAGE_SIZE]);
        u32::from_be_bytes(raw) as PageId
    }

    pub fn is_slot_free(&self, slot_id: SlotId) -> bool {
        self.bitmap()[slot_id / 8] & (1 << (slot_id % 8)) != 0
    }

    /// Lowest-numbered free slot
    pub fn first_free_slot(&self) -> Option<SlotId> {
        // Padding bits past the last slot are also set, hence the bound check
        self.bitmap()
            .iter()
            .enumerate()
            .find(|&(_, &byte)| byte != 0)
            .map(|(i, &byte)| i * 8 + byte.trailing_zeros() as usize)
            .filter(|&slot_id| slot_id < self.layout.capacity)
    }

    pub fn is_full(&self) -> bool {
        self.first_free_slot().is_none()
    }

    /// Occupied slots in ascending order
    pub fn occupied_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.layout.capacity).filter(|&slot_id| !self.is_slot_free(slot_id))
    }

    /// Next occupied slot at or after `from`
    pub fn next_occupied(&self, from: SlotId) -> Option<SlotId> {
        (from..self.layout.capacity).find(|&slot_id| !self.is_slot_free(slot_id))
    }

    pub fn record(&self, slot_id: SlotId) -> &[u8] {
        let start = self.layout.slot_start(slot_id);
        &self.bytes()[start..start + self.layout.record_len]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    pub fn set_next_free_page(&mut self, page_id: PageId) {
        self.bytes_mut()[..NEXT_FREE_PAGE_SIZE].copy_from_slice(&(page_id as u32).to_be_bytes());
    }

    pub fn mark_used(&mut self, slot_id: SlotId) {
        self.bytes_mut()[BITMAP_OFFSET + slot_id / 8] &= !(1 << (slot_id % 8));
    }

    pub fn mark_free(&mut self, slot_id: SlotId) {
        self.bytes_mut()[BITMAP_OFFSET + slot_id / 8] |= 1 << (slot_id % 8);
    }

    /// Overwrite a slot. `data` must be exactly `record_len` bytes.
    pub fn write_record(&mut self, slot_id: SlotId, data: &[u8]) {
        let start = self.layout.slot_start(slot_id);
        let len = self.layout.record_len;
        self.bytes_mut()[start..start + len].copy_from_slice(data);
    }
}
