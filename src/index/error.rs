use thiserror::Error;

use crate::file::{FileError, PageId};

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid node type {tag} at page {page}")]
    InvalidNodeType { page: PageId, tag: i64 },

    #[error("Corrupted node at page {page}: {reason}")]
    CorruptedNode { page: PageId, reason: String },

    #[error("Root page {root} records parent {parent}")]
    RootParentMismatch { root: PageId, parent: PageId },

    #[error("Index file does not exist: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index not open: {0}")]
    IndexNotOpen(String),
}

impl IndexError {
    pub(crate) fn corrupted(page: PageId, reason: impl Into<String>) -> Self {
        IndexError::CorruptedNode {
            page,
            reason: reason.into(),
        }
    }
}
