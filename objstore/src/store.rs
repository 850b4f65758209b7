//! Per-container query builder and write handle.

use std::sync::Arc;

use serde_json::Value;

use crate::cursor::{Cursor, Direction};
use crate::db::DatabaseInner;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::query::{QuerySpec, ResultMode, Window};
use crate::range::KeyRange;
use crate::serde::record_key;
use crate::storage::WriteMode;
use crate::traversal::{Accumulator, traverse};

/// A handle on one container.
///
/// Builder calls (`index`, `range`, `filter`, `limit`) configure the query
/// and return the handle; the last call for a field wins. Terminal calls
/// (`gets`, `get`, `count`) each run a fresh traversal against the current
/// configuration and leave it unchanged, so a handle can be queried
/// repeatedly.
///
/// Unknown index names and malformed ranges are not checked while building;
/// they surface from the terminal call as [`Error::Scope`] and
/// [`Error::Range`].
#[derive(Clone)]
pub struct Store {
    db: Arc<DatabaseInner>,
    container: String,
    spec: QuerySpec,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("container", &self.container)
            .field("spec", &self.spec)
            .finish()
    }
}

impl Store {
    pub(crate) fn new(db: Arc<DatabaseInner>, container: String) -> Self {
        Self {
            db,
            container,
            spec: QuerySpec::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.container
    }

    /// The query configured so far.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Traverses the named index instead of the primary keys.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.spec.index = Some(name.into());
        self
    }

    /// Restricts the traversal to keys inside `range`.
    pub fn range(mut self, range: KeyRange) -> Self {
        self.spec.range = Some(range);
        self
    }

    /// Keeps only records for which `predicate` returns true.
    ///
    /// Applies to `gets` and `get`; `count` ignores it.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.spec.filter = Some(Arc::new(predicate));
        self
    }

    /// Skips `offset` positions, then stops after `length` records
    /// (unbounded when zero).
    pub fn limit(mut self, offset: u32, length: u32) -> Self {
        self.spec.window = Window::new(offset, length);
        self
    }

    /// Returns every retained record in ascending key order.
    pub async fn gets(&self) -> Result<Vec<Value>> {
        self.gets_with_direction(Direction::Next).await
    }

    pub async fn gets_with_direction(&self, direction: Direction) -> Result<Vec<Value>> {
        self.run(ResultMode::Rows, direction).await?.into_rows()
    }

    /// Returns the first retained record, or `None` if nothing matches.
    pub async fn get(&self) -> Result<Option<Value>> {
        self.get_with_direction(Direction::Next).await
    }

    pub async fn get_with_direction(&self, direction: Direction) -> Result<Option<Value>> {
        self.run(ResultMode::Single, direction).await?.into_single()
    }

    /// Counts the positions in range, after the offset and up to the length.
    pub async fn count(&self) -> Result<u64> {
        self.count_with_direction(Direction::Next).await
    }

    /// Counts in the given direction; the unique directions count distinct
    /// keys.
    pub async fn count_with_direction(&self, direction: Direction) -> Result<u64> {
        self.run(ResultMode::Count, direction).await?.into_count()
    }

    /// Opens a cursor over the configured index and range for manual
    /// stepping. The filter and window are not applied.
    pub async fn open_cursor(&self, direction: Direction) -> Result<Cursor> {
        let schema = self.db.schema(&self.container).await?;
        Cursor::open(
            self.db.storage.inner(),
            &schema,
            self.spec.index.as_deref(),
            self.spec.range.as_ref(),
            direction,
        )
        .await
    }

    async fn run(&self, mode: ResultMode, direction: Direction) -> Result<Accumulator> {
        let schema = self.db.schema(&self.container).await?;
        traverse(self.db.storage.inner(), &schema, &self.spec, mode, direction).await
    }

    /// Looks up a record by primary key.
    pub async fn find(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let schema = self.db.schema(&self.container).await?;
        let record = self
            .db
            .storage
            .inner()
            .get(record_key(&schema.name, &key.into()))
            .await?;
        record
            .map(|record| serde_json::from_slice(&record.value).map_err(Error::from))
            .transpose()
    }

    /// Inserts a record, failing with [`Error::Constraint`] if its key is
    /// taken. Returns the primary key read from the record.
    pub async fn add(&self, value: Value) -> Result<Key> {
        let _guard = self.db.write_lock.lock().await;
        let schema = self.db.schema(&self.container).await?;
        self.db.storage.put(&schema, value, WriteMode::Insert).await
    }

    /// Inserts or replaces a record. Returns its primary key.
    pub async fn update(&self, value: Value) -> Result<Key> {
        let _guard = self.db.write_lock.lock().await;
        let schema = self.db.schema(&self.container).await?;
        self.db.storage.put(&schema, value, WriteMode::Upsert).await
    }

    /// Removes the record with the given key. No-op if it does not exist.
    pub async fn remove(&self, key: impl Into<Key>) -> Result<()> {
        let _guard = self.db.write_lock.lock().await;
        let schema = self.db.schema(&self.container).await?;
        self.db.storage.delete(&schema, &key.into()).await
    }

    /// Removes every record whose primary key lies in `range`. Returns the
    /// number removed.
    pub async fn remove_range(&self, range: KeyRange) -> Result<u64> {
        let _guard = self.db.write_lock.lock().await;
        let schema = self.db.schema(&self.container).await?;
        self.db.storage.delete_range(&schema, &range).await
    }

    /// Removes every record of the container.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.db.write_lock.lock().await;
        let schema = self.db.schema(&self.container).await?;
        self.db.storage.clear(&schema).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::schema::{ContainerSchema, IndexSchema};

    async fn open() -> Database {
        let schema = ContainerSchema::new("people", "id")
            .with_index(IndexSchema::new("by_city", "city"));
        Database::open(Config::new(1).with_container(schema))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn should_keep_last_builder_value() {
        // given
        let db = open().await;

        // when
        let store = db
            .store("people")
            .limit(1, 1)
            .index("by_name")
            .index("by_city")
            .limit(4, 2);

        // then
        assert_eq!(store.spec().index.as_deref(), Some("by_city"));
        assert_eq!(store.spec().window, Window::new(4, 2));
        assert_eq!(store.name(), "people");
    }

    #[tokio::test]
    async fn should_reuse_builder_across_terminal_calls() {
        // given
        let db = open().await;
        for (id, city) in [(1, "oslo"), (2, "rome"), (3, "oslo")] {
            db.store("people")
                .add(json!({"id": id, "city": city}))
                .await
                .unwrap();
        }
        let query = db.store("people").index("by_city").range(KeyRange::only("oslo"));

        // when
        let first = query.gets().await.unwrap();
        let second = query.gets().await.unwrap();
        let count = query.count().await.unwrap();

        // then
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn should_find_update_and_remove_by_key() {
        // given
        let db = open().await;
        let store = db.store("people");
        store.add(json!({"id": 7, "city": "oslo"})).await.unwrap();

        // when
        store.update(json!({"id": 7, "city": "rome"})).await.unwrap();
        let found = store.find(7).await.unwrap();
        store.remove(7).await.unwrap();

        // then
        assert_eq!(found, Some(json!({"id": 7, "city": "rome"})));
        assert_eq!(store.find(7).await.unwrap(), None);
        assert_eq!(store.clone().index("by_city").count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_clear_container() {
        let db = open().await;
        let store = db.store("people");
        for id in 1..=5 {
            store.add(json!({"id": id, "city": "oslo"})).await.unwrap();
        }

        store.clear().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.clone().index("by_city").count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_fail_on_unknown_container() {
        let db = open().await;

        let result = db.store("ghosts").add(json!({"id": 1})).await;

        assert!(matches!(result, Err(Error::Scope(_))));
    }

    #[tokio::test]
    async fn should_step_cursor_opened_from_builder() {
        // given
        let db = open().await;
        let store = db.store("people");
        for id in 1..=3 {
            store.add(json!({"id": id})).await.unwrap();
        }

        // when
        let mut cursor = store
            .clone()
            .range(KeyRange::lower_bound(2, false))
            .open_cursor(Direction::Prev)
            .await
            .unwrap();

        // then
        assert_eq!(cursor.step().await.unwrap().unwrap().primary_key, Key::from(3));
        assert_eq!(cursor.step().await.unwrap().unwrap().primary_key, Key::from(2));
        assert_eq!(cursor.step().await.unwrap(), None);
    }
}
