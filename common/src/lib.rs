pub mod bytes;
pub mod storage;

pub use bytes::BytesRange;
pub use storage::config::StorageConfig;
pub use storage::{
    Record, RecordOp, ScanOrder, Storage, StorageError, StorageIterator, StorageRead,
    StorageResult, StorageSnapshot,
};
