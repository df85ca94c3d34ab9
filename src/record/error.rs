use crate::file::{FileError, PageId};
use thiserror::Error;

use super::record::RecordId;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not open: {0}")]
    FileNotOpen(String),

    #[error("Record not found: page_id={}, slot_id={}", .0.page_id, .0.slot_id)]
    RecordNotFound(RecordId),

    #[error("Invalid record length: expected {expected}, got {actual}")]
    InvalidRecordLength { expected: usize, actual: usize },

    #[error("Record length {0} does not fit in a page")]
    UnsupportedRecordLength(usize),

    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    #[error("Corrupt page: page_id={0} is on the free list but has no free slot")]
    CorruptPage(PageId),

    #[error("Page {page_id} out of range: file has {page_num} pages")]
    PageOutOfRange { page_id: PageId, page_num: usize },

    #[error("Value too long for {column}: max {max} bytes, got {actual}")]
    CapacityViolation {
        column: String,
        max: usize,
        actual: usize,
    },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unknown column type: {0}")]
    UnknownType(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
