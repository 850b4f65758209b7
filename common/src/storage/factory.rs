//! Storage factory for creating storage instances from configuration.

use std::sync::Arc;

use super::config::StorageConfig;
use super::in_memory::InMemoryStorage;
use super::{Storage, StorageResult};

/// Creates a storage instance based on the provided configuration.
///
/// # Returns
///
/// Returns an `Arc<dyn Storage>` on success, or a `StorageError` on failure.
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config {
        StorageConfig::InMemory => {
            tracing::debug!("creating in-memory storage");
            Ok(Arc::new(InMemoryStorage::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{BytesRange, Record, RecordOp, StorageRead};

    #[tokio::test]
    async fn should_create_in_memory_storage_from_default_config() {
        // given
        let config = StorageConfig::default();

        // when
        let storage = create_storage(&config).await.unwrap();
        storage
            .apply(vec![RecordOp::Put(Record::new(
                Bytes::from("k"),
                Bytes::from("v"),
            ))])
            .await
            .unwrap();

        // then
        assert_eq!(storage.count(BytesRange::unbounded()).await.unwrap(), 1);
    }
}
