pub mod config;
pub mod factory;
pub mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::BytesRange;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// A single write within an atomic batch passed to [`Storage::apply`].
#[derive(Clone, Debug)]
pub enum RecordOp {
    Put(Record),
    Delete(Bytes),
    /// Removes every key inside the range.
    DeleteRange(BytesRange),
}

impl From<Record> for RecordOp {
    fn from(record: Record) -> Self {
        RecordOp::Put(record)
    }
}

/// Key order in which a scan visits records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    Ascending,
    Descending,
}

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Storage-related errors
    Storage(String),
    /// Internal errors
    Internal(String),
}

impl std::error::Error for StorageError {}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "Storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Iterator over storage records.
///
/// Each call is one request against the backend and must complete before the
/// next one is issued; `&mut self` enforces that.
#[async_trait]
pub trait StorageIterator: Send {
    async fn next(&mut self) -> StorageResult<Option<Record>>;

    /// Discards the next `count` records without returning them.
    ///
    /// Skipping past the end leaves the iterator exhausted. Backends that can
    /// reposition cheaply should override the default, which reads and drops
    /// each record.
    async fn skip(&mut self, count: usize) -> StorageResult<()> {
        for _ in 0..count {
            if self.next().await?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// Common read operations supported by both Storage and StorageSnapshot.
#[async_trait]
pub trait StorageRead: Send + Sync {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>>;

    /// Returns an iterator over records in the given range, visited in `order`.
    ///
    /// The returned iterator is owned and does not borrow from the storage,
    /// allowing it to be stored in structs or passed across await points.
    async fn scan_iter_with_order(
        &self,
        range: BytesRange,
        order: ScanOrder,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>>;

    /// Returns an iterator over records in the given range in ascending key order.
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        self.scan_iter_with_order(range, ScanOrder::Ascending).await
    }

    /// Collects all records in the range into a Vec.
    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan(&self, range: BytesRange) -> StorageResult<Vec<Record>> {
        let mut iter = self.scan_iter(range).await?;
        let mut records = Vec::new();
        while let Some(record) = iter.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Counts the records in the range.
    #[tracing::instrument(level = "trace", skip_all)]
    async fn count(&self, range: BytesRange) -> StorageResult<u64> {
        let mut iter = self.scan_iter(range).await?;
        let mut count = 0;
        while iter.next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

/// A point-in-time snapshot of the storage layer.
///
/// Reads from a snapshot will not see any subsequent writes to the underlying
/// storage.
#[async_trait]
pub trait StorageSnapshot: StorageRead {}

/// The storage type encapsulates access to the underlying ordered key-value engine.
#[async_trait]
pub trait Storage: StorageRead {
    /// Applies a batch of puts and deletes atomically.
    ///
    /// Either every operation in the batch becomes visible or none does.
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()>;

    /// Creates a point-in-time snapshot of the storage.
    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>>;

    /// Flushes all pending writes to durable storage.
    async fn flush(&self) -> StorageResult<()>;

    /// Closes the storage, releasing any resources.
    async fn close(&self) -> StorageResult<()>;
}
