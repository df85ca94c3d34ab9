use super::error::RecordResult;
use super::schema::TableSchema;
use super::value::Value;
use crate::file::PageId;

/// Slot identifier within a page
pub type SlotId = usize;

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }
}

/// A stored record: its address plus the raw fixed-length payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    rid: RecordId,
    data: Vec<u8>,
}

impl Record {
    pub fn new(rid: RecordId, data: Vec<u8>) -> Self {
        Self { rid, data }
    }

    pub fn rid(&self) -> RecordId {
        self.rid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the payload into column values
    pub fn values(&self, schema: &TableSchema) -> RecordResult<Vec<Value>> {
        schema.decode(&self.data)
    }
}
