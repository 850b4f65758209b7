//! Object-store-specific storage wrapper.
//!
//! [`ObjectStorage`] wraps `Arc<dyn Storage>` with the record layout: the
//! schema catalog, JSON record bodies and the index entries kept beside them.
//! Each public write becomes a single atomic [`Storage::apply`] batch.
//!
//! Writers must be serialized by the caller; uniqueness checks read before
//! they write.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use common::storage::RecordOp;
use common::{BytesRange, Record, Storage};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::{Key, extract_key};
use crate::range::KeyRange;
use crate::schema::{ContainerSchema, IndexSchema};
use crate::serde::{
    container_catalog_range, container_index_prefix, container_key, database_range, decode_key,
    encode_key, index_entry_key, index_prefix, metadata_key, record_key, record_prefix,
    scoped_range,
};

/// How [`ObjectStorage::put`] treats an existing record with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Fail with [`Error::Constraint`].
    Insert,
    /// Replace it.
    Upsert,
}

fn index_key(record: &Value, index: &IndexSchema) -> Option<Key> {
    extract_key(record, &index.key_path).filter(Key::is_valid)
}

/// Deletes of the index entries `record` currently owns.
fn unindex_ops(schema: &ContainerSchema, record: &Value, primary_key: &Key) -> Vec<RecordOp> {
    schema
        .indexes
        .iter()
        .filter_map(|index| {
            index_key(record, index).map(|key| {
                RecordOp::Delete(index_entry_key(&schema.name, &index.name, &key, primary_key))
            })
        })
        .collect()
}

#[derive(Clone)]
pub(crate) struct ObjectStorage {
    storage: Arc<dyn Storage>,
}

impl ObjectStorage {
    pub(crate) fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        use common::storage::in_memory::InMemoryStorage;
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    pub(crate) fn inner(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Reads the persisted schema version, zero for a fresh store.
    pub(crate) async fn load_version(&self) -> Result<u32> {
        match self.storage.get(metadata_key()).await? {
            None => Ok(0),
            Some(record) => {
                let bytes: [u8; 4] = record.value.as_ref().try_into().map_err(|_| {
                    Error::Encoding(format!(
                        "version record has {} bytes, expected 4",
                        record.value.len()
                    ))
                })?;
                Ok(u32::from_be_bytes(bytes))
            }
        }
    }

    /// Reads every persisted container schema, ordered by name.
    pub(crate) async fn load_containers(&self) -> Result<Vec<ContainerSchema>> {
        self.storage
            .scan(container_catalog_range())
            .await?
            .into_iter()
            .map(|record| serde_json::from_slice(&record.value).map_err(Error::from))
            .collect()
    }

    /// Persists the schema version together with new or changed schemas and
    /// any index entries built for them.
    pub(crate) async fn commit_schema(
        &self,
        version: u32,
        schemas: &[&ContainerSchema],
        mut ops: Vec<RecordOp>,
    ) -> Result<()> {
        for schema in schemas {
            ops.push(RecordOp::Put(Record::new(
                container_key(&schema.name),
                Bytes::from(serde_json::to_vec(schema)?),
            )));
        }
        ops.push(RecordOp::Put(Record::new(
            metadata_key(),
            Bytes::copy_from_slice(&version.to_be_bytes()),
        )));
        self.storage.apply(ops).await?;
        Ok(())
    }

    pub(crate) async fn save_container(&self, schema: &ContainerSchema) -> Result<()> {
        let record = Record::new(
            container_key(&schema.name),
            Bytes::from(serde_json::to_vec(schema)?),
        );
        self.storage.apply(vec![record.into()]).await?;
        Ok(())
    }

    /// Removes a container's schema, records and index entries.
    pub(crate) async fn drop_container(&self, name: &str) -> Result<()> {
        let mut ops = Self::clear_ops(name);
        ops.push(RecordOp::Delete(container_key(name)));
        self.storage.apply(ops).await?;
        Ok(())
    }

    /// Builds the entries of `index` for every record already in the
    /// container.
    ///
    /// Fails with [`Error::Constraint`] if the index is unique and two
    /// records share a key.
    pub(crate) async fn backfill_ops(
        &self,
        schema: &ContainerSchema,
        index: &IndexSchema,
    ) -> Result<Vec<RecordOp>> {
        let records = self
            .storage
            .scan(scoped_range(&record_prefix(&schema.name), None))
            .await?;
        let mut seen: BTreeMap<Key, Key> = BTreeMap::new();
        let mut ops = Vec::new();
        for record in records {
            let value: Value = serde_json::from_slice(&record.value)?;
            let Some(primary_key) = extract_key(&value, &schema.key_path) else {
                continue;
            };
            let Some(key) = index_key(&value, index) else {
                continue;
            };
            if index.unique {
                if let Some(other) = seen.insert(key.clone(), primary_key.clone()) {
                    return Err(Error::Constraint(format!(
                        "records {} and {} share key {} in unique index {}",
                        other, primary_key, key, index.name
                    )));
                }
            }
            ops.push(RecordOp::Put(Record::new(
                index_entry_key(&schema.name, &index.name, &key, &primary_key),
                encode_key(&primary_key),
            )));
        }
        Ok(ops)
    }

    /// Writes a record and its index entries, returning its primary key.
    #[tracing::instrument(level = "trace", skip_all, fields(container = %schema.name))]
    pub(crate) async fn put(
        &self,
        schema: &ContainerSchema,
        value: Value,
        mode: WriteMode,
    ) -> Result<Key> {
        let primary_key = extract_key(&value, &schema.key_path)
            .filter(Key::is_valid)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "record has no valid key at path {:?}",
                    schema.key_path
                ))
            })?;
        let storage_key = record_key(&schema.name, &primary_key);

        let mut ops = Vec::new();
        if let Some(existing) = self.storage.get(storage_key.clone()).await? {
            if mode == WriteMode::Insert {
                return Err(Error::Constraint(format!(
                    "key {} already exists in container {}",
                    primary_key, schema.name
                )));
            }
            let previous: Value = serde_json::from_slice(&existing.value)?;
            ops.extend(unindex_ops(schema, &previous, &primary_key));
        }

        for index in &schema.indexes {
            let Some(key) = index_key(&value, index) else {
                continue;
            };
            if index.unique {
                self.check_unique(schema, index, &key, &primary_key).await?;
            }
            ops.push(RecordOp::Put(Record::new(
                index_entry_key(&schema.name, &index.name, &key, &primary_key),
                encode_key(&primary_key),
            )));
        }
        ops.push(RecordOp::Put(Record::new(
            storage_key,
            Bytes::from(serde_json::to_vec(&value)?),
        )));

        self.storage.apply(ops).await?;
        Ok(primary_key)
    }

    async fn check_unique(
        &self,
        schema: &ContainerSchema,
        index: &IndexSchema,
        key: &Key,
        primary_key: &Key,
    ) -> Result<()> {
        let range = KeyRange::only(key.clone());
        let entries = self
            .storage
            .scan(scoped_range(
                &index_prefix(&schema.name, &index.name),
                Some(&range),
            ))
            .await?;
        for entry in entries {
            let owner = decode_key(&mut entry.value.as_ref())?;
            if &owner != primary_key {
                return Err(Error::Constraint(format!(
                    "key {} in unique index {} already belongs to record {}",
                    key, index.name, owner
                )));
            }
        }
        Ok(())
    }

    /// Deletes the record with `primary_key`. No-op if it does not exist.
    #[tracing::instrument(level = "trace", skip_all, fields(container = %schema.name))]
    pub(crate) async fn delete(&self, schema: &ContainerSchema, primary_key: &Key) -> Result<()> {
        let storage_key = record_key(&schema.name, primary_key);
        let Some(existing) = self.storage.get(storage_key.clone()).await? else {
            return Ok(());
        };
        let previous: Value = serde_json::from_slice(&existing.value)?;
        let mut ops = unindex_ops(schema, &previous, primary_key);
        ops.push(RecordOp::Delete(storage_key));
        self.storage.apply(ops).await?;
        Ok(())
    }

    /// Deletes every record whose primary key lies in `range`, returning how
    /// many were removed.
    #[tracing::instrument(level = "trace", skip_all, fields(container = %schema.name))]
    pub(crate) async fn delete_range(
        &self,
        schema: &ContainerSchema,
        range: &KeyRange,
    ) -> Result<u64> {
        range.validate()?;
        let records = self
            .storage
            .scan(scoped_range(&record_prefix(&schema.name), Some(range)))
            .await?;
        let mut ops = Vec::new();
        for record in &records {
            let value: Value = serde_json::from_slice(&record.value)?;
            if let Some(primary_key) = extract_key(&value, &schema.key_path) {
                ops.extend(unindex_ops(schema, &value, &primary_key));
            }
            ops.push(RecordOp::Delete(record.key.clone()));
        }
        if !ops.is_empty() {
            self.storage.apply(ops).await?;
        }
        Ok(records.len() as u64)
    }

    /// Deletes every record and index entry of the container.
    pub(crate) async fn clear(&self, schema: &ContainerSchema) -> Result<()> {
        self.storage.apply(Self::clear_ops(&schema.name)).await?;
        Ok(())
    }

    /// Deletes the metadata record, every schema, record and index entry.
    pub(crate) async fn destroy(&self) -> Result<()> {
        self.storage
            .apply(vec![RecordOp::DeleteRange(database_range())])
            .await?;
        Ok(())
    }

    fn clear_ops(name: &str) -> Vec<RecordOp> {
        vec![
            RecordOp::DeleteRange(scoped_range(&record_prefix(name), None)),
            RecordOp::DeleteRange(BytesRange::prefix(container_index_prefix(name))),
        ]
    }

    pub(crate) async fn flush(&self) -> Result<()> {
        self.storage.flush().await?;
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.storage.close().await?;
        Ok(())
    }
}
