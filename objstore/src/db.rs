//! Database handle: schema catalog, versioned upgrades and container
//! lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::Storage;
use common::storage::RecordOp;
use common::storage::factory::create_storage;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::ContainerSchema;
use crate::storage::ObjectStorage;
use crate::store::Store;

/// In-memory view of the persisted schema.
#[derive(Debug, Default)]
struct Catalog {
    version: u32,
    containers: BTreeMap<String, Arc<ContainerSchema>>,
}

/// State shared by a [`Database`] and every [`Store`] taken from it.
pub(crate) struct DatabaseInner {
    pub(crate) storage: ObjectStorage,
    catalog: RwLock<Catalog>,
    /// Serializes writers so uniqueness checks see a stable store.
    pub(crate) write_lock: Mutex<()>,
}

impl DatabaseInner {
    /// Looks up a container schema, failing with [`Error::Scope`] if absent.
    pub(crate) async fn schema(&self, name: &str) -> Result<Arc<ContainerSchema>> {
        self.catalog
            .read()
            .await
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Scope(format!("container {} not found", name)))
    }
}

/// An open object database.
///
/// Holds named containers of JSON records, each ordered by a primary key and
/// optionally indexed by further fields. Queries and writes go through the
/// [`Store`] returned by [`Database::store`].
///
/// # Example
///
/// ```ignore
/// use objstore::{Config, ContainerSchema, Database, IndexSchema, KeyRange};
/// use serde_json::json;
///
/// let config = Config::new(1).with_container(
///     ContainerSchema::new("users", "id").with_index(IndexSchema::new("by_age", "age")),
/// );
/// let db = Database::open(config).await?;
///
/// db.store("users").add(json!({"id": 1, "age": 42})).await?;
/// let adults = db.store("users").index("by_age").range(KeyRange::lower_bound(18, false)).gets().await?;
/// ```
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Version`] if `config.version` is lower than the
    /// persisted version or the declared schema cannot be reconciled with
    /// the persisted one, and [`Error::Constraint`] if a new unique index
    /// clashes with existing records.
    pub async fn open(config: Config) -> Result<Self> {
        let storage = create_storage(&config.storage).await?;
        Self::open_with_storage(storage, config.version, &config.containers).await
    }

    /// Opens the database over an existing storage instance.
    #[tracing::instrument(level = "debug", skip(storage, containers))]
    pub async fn open_with_storage(
        storage: Arc<dyn Storage>,
        version: u32,
        containers: &[ContainerSchema],
    ) -> Result<Self> {
        let storage = ObjectStorage::new(storage);
        let current = storage.load_version().await?;
        if version < current {
            return Err(Error::Version(format!(
                "requested version {} is lower than the persisted version {}",
                version, current
            )));
        }

        let mut catalog = Catalog {
            version: current,
            containers: storage
                .load_containers()
                .await?
                .into_iter()
                .map(|schema| (schema.name.clone(), Arc::new(schema)))
                .collect(),
        };

        if version > current {
            let (changed, ops) = plan_upgrade(&storage, &catalog, containers).await?;
            let refs: Vec<&ContainerSchema> = changed.iter().collect();
            storage.commit_schema(version, &refs, ops).await?;
            for schema in changed {
                catalog.containers.insert(schema.name.clone(), Arc::new(schema));
            }
            catalog.version = version;
            tracing::debug!(from = current, to = version, "upgraded schema");
        }

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                storage,
                catalog: RwLock::new(catalog),
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Returns a query builder and write handle for the named container.
    ///
    /// The container is resolved when the handle is used, so a missing
    /// container surfaces as [`Error::Scope`] from the first call on it.
    pub fn store(&self, name: impl Into<String>) -> Store {
        Store::new(Arc::clone(&self.inner), name.into())
    }

    /// The schema version the database was opened or upgraded to.
    pub async fn version(&self) -> u32 {
        self.inner.catalog.read().await.version
    }

    /// Names of all containers, in ascending order.
    pub async fn container_names(&self) -> Vec<String> {
        self.inner
            .catalog
            .read()
            .await
            .containers
            .keys()
            .cloned()
            .collect()
    }

    pub async fn schema(&self, name: &str) -> Result<Arc<ContainerSchema>> {
        self.inner.schema(name).await
    }

    /// Creates an empty container.
    ///
    /// Fails with [`Error::Constraint`] if a container with the same name
    /// exists.
    pub async fn create_container(&self, schema: ContainerSchema) -> Result<()> {
        schema.validate()?;
        let _guard = self.inner.write_lock.lock().await;
        if self.inner.schema(&schema.name).await.is_ok() {
            return Err(Error::Constraint(format!(
                "container {} already exists",
                schema.name
            )));
        }
        self.inner.storage.save_container(&schema).await?;
        self.inner
            .catalog
            .write()
            .await
            .containers
            .insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Deletes a container with all of its records and index entries.
    pub async fn delete_container(&self, name: &str) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.schema(name).await?;
        self.inner.storage.drop_container(name).await?;
        self.inner.catalog.write().await.containers.remove(name);
        Ok(())
    }

    /// Flushes pending writes to durable storage.
    pub async fn flush(&self) -> Result<()> {
        self.inner.storage.flush().await
    }

    /// Closes the database, releasing storage resources.
    pub async fn close(self) -> Result<()> {
        self.inner.storage.close().await
    }

    /// Deletes the whole database (version, schemas, records and index
    /// entries) and closes it.
    ///
    /// Stores still held elsewhere fail with [`Error::Scope`] afterwards.
    pub async fn destroy(self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.storage.destroy().await?;
        let mut catalog = self.inner.catalog.write().await;
        catalog.version = 0;
        catalog.containers.clear();
        drop(catalog);
        tracing::debug!("destroyed database");
        self.inner.storage.close().await
    }
}

/// Works out which schemas an upgrade creates or extends, plus the index
/// entries to backfill for indexes added to existing containers.
async fn plan_upgrade(
    storage: &ObjectStorage,
    catalog: &Catalog,
    declared: &[ContainerSchema],
) -> Result<(Vec<ContainerSchema>, Vec<RecordOp>)> {
    let mut changed = Vec::new();
    let mut ops = Vec::new();

    for (i, schema) in declared.iter().enumerate() {
        schema.validate()?;
        if declared[..i].iter().any(|other| other.name == schema.name) {
            return Err(Error::InvalidInput(format!(
                "container {} declared twice",
                schema.name
            )));
        }
        let Some(existing) = catalog.containers.get(&schema.name) else {
            changed.push(schema.clone());
            continue;
        };
        if existing.key_path != schema.key_path {
            return Err(Error::Version(format!(
                "container {} cannot change key path from {:?} to {:?}",
                schema.name, existing.key_path, schema.key_path
            )));
        }

        let mut merged = ContainerSchema::clone(existing);
        for index in &schema.indexes {
            match existing.index(&index.name) {
                Some(current) if current == index => {}
                Some(_) => {
                    return Err(Error::Version(format!(
                        "index {} of container {} cannot change definition",
                        index.name, schema.name
                    )));
                }
                None => {
                    ops.extend(storage.backfill_ops(existing, index).await?);
                    merged.indexes.push(index.clone());
                }
            }
        }
        if merged.indexes.len() > existing.indexes.len() {
            changed.push(merged);
        }
    }
    Ok((changed, ops))
}

#[cfg(test)]
mod tests {
    use common::storage::in_memory::InMemoryStorage;
    use serde_json::json;

    use super::*;
    use crate::schema::IndexSchema;

    fn users() -> ContainerSchema {
        ContainerSchema::new("users", "id")
    }

    #[tokio::test]
    async fn should_create_declared_containers_on_first_open() {
        // given
        let config = Config::new(1)
            .with_container(users())
            .with_container(ContainerSchema::new("orders", "id"));

        // when
        let db = Database::open(config).await.unwrap();

        // then
        assert_eq!(db.version().await, 1);
        assert_eq!(db.container_names().await, vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn should_reject_lower_version() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        Database::open_with_storage(Arc::clone(&storage), 3, &[users()])
            .await
            .unwrap();

        // when
        let result = Database::open_with_storage(storage, 2, &[]).await;

        // then
        assert!(matches!(result, Err(Error::Version(_))));
    }

    #[tokio::test]
    async fn should_reload_catalog_on_reopen() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let db = Database::open_with_storage(Arc::clone(&storage), 1, &[users()])
            .await
            .unwrap();
        db.store("users").add(json!({"id": 1})).await.unwrap();

        // when
        let reopened = Database::open_with_storage(storage, 1, &[]).await.unwrap();

        // then
        assert_eq!(reopened.version().await, 1);
        assert_eq!(reopened.store("users").count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_backfill_index_added_by_upgrade() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let db = Database::open_with_storage(Arc::clone(&storage), 1, &[users()])
            .await
            .unwrap();
        for (id, age) in [(1, 30), (2, 20), (3, 40)] {
            db.store("users")
                .add(json!({"id": id, "age": age}))
                .await
                .unwrap();
        }

        // when
        let upgraded = users().with_index(IndexSchema::new("by_age", "age"));
        let db = Database::open_with_storage(storage, 2, &[upgraded])
            .await
            .unwrap();

        // then
        let ids: Vec<_> = db
            .store("users")
            .index("by_age")
            .gets()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(2), json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn should_reject_key_path_change() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        Database::open_with_storage(Arc::clone(&storage), 1, &[users()])
            .await
            .unwrap();

        let result =
            Database::open_with_storage(storage, 2, &[ContainerSchema::new("users", "uid")]).await;

        assert!(matches!(result, Err(Error::Version(_))));
    }

    #[tokio::test]
    async fn should_create_and_delete_containers() {
        // given
        let db = Database::open(Config::default()).await.unwrap();
        db.create_container(users()).await.unwrap();
        db.store("users").add(json!({"id": 1})).await.unwrap();

        // when
        let duplicate = db.create_container(users()).await;
        db.delete_container("users").await.unwrap();

        // then
        assert!(matches!(duplicate, Err(Error::Constraint(_))));
        assert!(db.container_names().await.is_empty());
        assert!(matches!(
            db.store("users").count().await,
            Err(Error::Scope(_))
        ));
        assert!(matches!(
            db.delete_container("users").await,
            Err(Error::Scope(_))
        ));
    }

    #[tokio::test]
    async fn should_destroy_everything_and_allow_fresh_open() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let db = Database::open_with_storage(
            Arc::clone(&storage),
            3,
            &[users().with_index(IndexSchema::new("by_age", "age"))],
        )
        .await
        .unwrap();
        let held = db.store("users");
        held.add(json!({"id": 1, "age": 30})).await.unwrap();

        // when
        db.destroy().await.unwrap();

        // then
        assert!(matches!(held.count().await, Err(Error::Scope(_))));
        let remaining = storage.count(common::BytesRange::unbounded()).await.unwrap();
        assert_eq!(remaining, 0);
        let reopened = Database::open_with_storage(storage, 1, &[users()])
            .await
            .unwrap();
        assert_eq!(reopened.version().await, 1);
        assert_eq!(reopened.store("users").count().await.unwrap(), 0);
    }
}
