mod buffer_manager;
mod error;
mod file_manager;

pub use buffer_manager::{BufferManager, SharedBufferManager};
pub use error::{FileError, FileResult};
pub use file_manager::{FileHandle, PagedFileManager};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Number of frames in the buffer pool
/// 6000 frames × 8KB = 48MB of cached pages
pub const BUFFER_POOL_SIZE: usize = 6000;

/// Default limit on simultaneously open files
pub const MAX_OPEN_FILES: usize = 128;

/// Page number within a file
pub type PageId = usize;
