pub mod file;
pub mod index;
pub mod record;

pub use file::{
    BUFFER_POOL_SIZE, BufferManager, FileError, FileHandle, FileResult, PAGE_SIZE, PageId,
    PagedFileManager, SharedBufferManager,
};
pub use index::{FileIndex, INDEX_SUFFIX, IndexError, IndexManager, IndexResult, Key};
pub use record::{
    ColumnDef, DataType, FileHeader, Record, RecordError, RecordFile, RecordId, RecordManager,
    RecordResult, TABLE_SUFFIX, TableSchema, Value,
};
