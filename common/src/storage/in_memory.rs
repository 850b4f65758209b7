use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{RecordOp, ScanOrder, Storage, StorageSnapshot};
use crate::{BytesRange, Record, StorageError, StorageIterator, StorageRead, StorageResult};

type Tree = BTreeMap<Bytes, Bytes>;

/// Collects the records of `tree` inside `range`, in the requested order.
fn collect_range(tree: &Tree, range: &BytesRange, order: ScanOrder) -> Vec<Record> {
    if range.is_empty() {
        return Vec::new();
    }
    let entries = tree.range((range.start.clone(), range.end.clone()));
    let to_record = |(k, v): (&Bytes, &Bytes)| Record::new(k.clone(), v.clone());
    match order {
        ScanOrder::Ascending => entries.map(to_record).collect(),
        ScanOrder::Descending => entries.rev().map(to_record).collect(),
    }
}

fn count_range(tree: &Tree, range: &BytesRange) -> u64 {
    if range.is_empty() {
        return 0;
    }
    tree.range((range.start.clone(), range.end.clone())).count() as u64
}

/// In-memory implementation of the Storage trait using a BTreeMap.
///
/// The map lives behind an `Arc` and writers clone it only while a snapshot
/// still holds the previous version, so taking a snapshot is O(1).
pub struct InMemoryStorage {
    data: RwLock<Arc<Tree>>,
}

impl InMemoryStorage {
    /// Creates a new InMemoryStorage instance with an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    fn current(&self) -> StorageResult<Arc<Tree>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(Arc::clone(&data))
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageRead for InMemoryStorage {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let data = self.current()?;
        Ok(data.get(&key).map(|value| Record::new(key, value.clone())))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan_iter_with_order(
        &self,
        range: BytesRange,
        order: ScanOrder,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let data = self.current()?;
        let records = collect_range(&data, &range, order);
        Ok(Box::new(InMemoryIterator { records, index: 0 }))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn count(&self, range: BytesRange) -> StorageResult<u64> {
        let data = self.current()?;
        Ok(count_range(&data, &range))
    }
}

struct InMemoryIterator {
    records: Vec<Record>,
    index: usize,
}

#[async_trait]
impl StorageIterator for InMemoryIterator {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        let record = self.records.get(self.index).cloned();
        if record.is_some() {
            self.index += 1;
        }
        Ok(record)
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn skip(&mut self, count: usize) -> StorageResult<()> {
        self.index = self.index.saturating_add(count).min(self.records.len());
        Ok(())
    }
}

/// In-memory snapshot sharing the map version current at snapshot creation.
pub struct InMemoryStorageSnapshot {
    data: Arc<Tree>,
}

#[async_trait]
impl StorageRead for InMemoryStorageSnapshot {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        Ok(self
            .data
            .get(&key)
            .map(|value| Record::new(key, value.clone())))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan_iter_with_order(
        &self,
        range: BytesRange,
        order: ScanOrder,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let records = collect_range(&self.data, &range, order);
        Ok(Box::new(InMemoryIterator { records, index: 0 }))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn count(&self, range: BytesRange) -> StorageResult<u64> {
        Ok(count_range(&self.data, &range))
    }
}

#[async_trait]
impl StorageSnapshot for InMemoryStorageSnapshot {}

#[async_trait]
impl Storage for InMemoryStorage {
    /// Applies the batch under a single write lock acquisition.
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        let tree = Arc::make_mut(&mut *data);
        for op in ops {
            match op {
                RecordOp::Put(record) => {
                    tree.insert(record.key, record.value);
                }
                RecordOp::Delete(key) => {
                    tree.remove(&key);
                }
                RecordOp::DeleteRange(range) => {
                    tree.retain(|key, _| !range.contains(key));
                }
            }
        }

        Ok(())
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        let data = self.current()?;
        Ok(Arc::new(InMemoryStorageSnapshot { data }))
    }

    async fn flush(&self) -> StorageResult<()> {
        // No-op for in-memory storage - all writes are immediately visible
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Injected failure that fires either once or on every call.
#[cfg(feature = "test-utils")]
#[derive(Clone)]
enum Failure {
    /// Error is returned once, then automatically cleared.
    Once(StorageError),
    /// Error is returned on every subsequent call until explicitly cleared.
    Persistent(StorageError),
}

#[cfg(feature = "test-utils")]
type FailSlot = arc_swap::ArcSwap<Option<Failure>>;

/// Checks a [`FailSlot`] and returns an error if one is set.
///
/// For [`Failure::Once`], the slot is atomically swapped to `None` so the
/// error fires exactly once. For [`Failure::Persistent`], the slot is left
/// unchanged.
#[cfg(feature = "test-utils")]
fn check_failure(slot: &FailSlot) -> StorageResult<()> {
    let guard = slot.load();
    match guard.as_ref() {
        None => Ok(()),
        Some(Failure::Persistent(err)) => Err(err.clone()),
        Some(Failure::Once(_)) => {
            let prev = slot.swap(Arc::new(None));
            match prev.as_ref() {
                Some(Failure::Once(err)) => Err(err.clone()),
                _ => Ok(()),
            }
        }
    }
}

/// Failure armed for the N-th request (1-based) made through a scan iterator.
#[cfg(feature = "test-utils")]
#[derive(Clone)]
struct StepFailure {
    step: usize,
    error: StorageError,
}

#[cfg(feature = "test-utils")]
type StepSlot = Arc<arc_swap::ArcSwap<Option<StepFailure>>>;

/// A storage wrapper that delegates to an inner [`Storage`] but can inject
/// failures into `apply`, `snapshot` and individual scan iterator steps.
///
/// A scan step failure is captured by every iterator opened while it is
/// armed, including iterators opened on snapshots taken from this storage.
/// Each `next` or `skip` call on such an iterator counts as one step.
///
/// Gated behind the `test-utils` feature.
///
/// # Example
///
/// ```ignore
/// let storage = FailingStorage::wrap(Arc::new(InMemoryStorage::new()));
/// storage.fail_scan_at_step(3, StorageError::Storage("io error".into()));
/// // the third request on any new scan iterator returns Err(...)
/// ```
#[cfg(feature = "test-utils")]
pub struct FailingStorage {
    inner: Arc<dyn Storage>,
    fail_apply: FailSlot,
    fail_snapshot: FailSlot,
    fail_scan: StepSlot,
}

#[cfg(feature = "test-utils")]
impl FailingStorage {
    /// Wraps an existing storage, with all failure injections initially `None`.
    pub fn wrap(inner: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_apply: arc_swap::ArcSwap::from_pointee(None),
            fail_snapshot: arc_swap::ArcSwap::from_pointee(None),
            fail_scan: Arc::new(arc_swap::ArcSwap::from_pointee(None)),
        })
    }

    /// Makes `apply` return the given error on every subsequent call.
    pub fn fail_apply(&self, err: StorageError) {
        self.fail_apply
            .store(Arc::new(Some(Failure::Persistent(err))));
    }

    /// Makes `apply` return the given error on the next call only.
    pub fn fail_apply_once(&self, err: StorageError) {
        self.fail_apply.store(Arc::new(Some(Failure::Once(err))));
    }

    /// Makes `snapshot` return the given error on every subsequent call.
    pub fn fail_snapshot(&self, err: StorageError) {
        self.fail_snapshot
            .store(Arc::new(Some(Failure::Persistent(err))));
    }

    /// Makes `snapshot` return the given error on the next call only.
    pub fn fail_snapshot_once(&self, err: StorageError) {
        self.fail_snapshot.store(Arc::new(Some(Failure::Once(err))));
    }

    /// Makes the `step`-th request (1-based) of every newly opened scan
    /// iterator return the given error.
    pub fn fail_scan_at_step(&self, step: usize, err: StorageError) {
        self.fail_scan
            .store(Arc::new(Some(StepFailure { step, error: err })));
    }

    /// Disarms the scan step failure for iterators opened from now on.
    pub fn clear_scan_failure(&self) {
        self.fail_scan.store(Arc::new(None));
    }
}

#[cfg(feature = "test-utils")]
fn wrap_iterator(
    inner: Box<dyn StorageIterator + Send + 'static>,
    slot: &StepSlot,
) -> Box<dyn StorageIterator + Send + 'static> {
    let failure = (**slot.load()).clone();
    Box::new(FailingIterator {
        inner,
        steps: 0,
        failure,
    })
}

#[cfg(feature = "test-utils")]
struct FailingIterator {
    inner: Box<dyn StorageIterator + Send + 'static>,
    steps: usize,
    failure: Option<StepFailure>,
}

#[cfg(feature = "test-utils")]
impl FailingIterator {
    fn check_step(&mut self) -> StorageResult<()> {
        self.steps += 1;
        match &self.failure {
            Some(failure) if failure.step == self.steps => Err(failure.error.clone()),
            _ => Ok(()),
        }
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl StorageIterator for FailingIterator {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        self.check_step()?;
        self.inner.next().await
    }

    async fn skip(&mut self, count: usize) -> StorageResult<()> {
        self.check_step()?;
        self.inner.skip(count).await
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl StorageRead for FailingStorage {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        self.inner.get(key).await
    }

    async fn scan_iter_with_order(
        &self,
        range: BytesRange,
        order: ScanOrder,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let inner = self.inner.scan_iter_with_order(range, order).await?;
        Ok(wrap_iterator(inner, &self.fail_scan))
    }
}

#[cfg(feature = "test-utils")]
struct FailingSnapshot {
    inner: Arc<dyn StorageSnapshot>,
    fail_scan: StepSlot,
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl StorageRead for FailingSnapshot {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        self.inner.get(key).await
    }

    async fn scan_iter_with_order(
        &self,
        range: BytesRange,
        order: ScanOrder,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let inner = self.inner.scan_iter_with_order(range, order).await?;
        Ok(wrap_iterator(inner, &self.fail_scan))
    }
}

#[cfg(feature = "test-utils")]
#[async_trait]
impl StorageSnapshot for FailingSnapshot {}

#[cfg(feature = "test-utils")]
#[async_trait]
impl Storage for FailingStorage {
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()> {
        check_failure(&self.fail_apply)?;
        self.inner.apply(ops).await
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        check_failure(&self.fail_snapshot)?;
        let inner = self.inner.snapshot().await?;
        Ok(Arc::new(FailingSnapshot {
            inner,
            fail_scan: Arc::clone(&self.fail_scan),
        }))
    }

    async fn flush(&self) -> StorageResult<()> {
        self.inner.flush().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;

    fn put(key: &'static str, value: &'static str) -> RecordOp {
        RecordOp::Put(Record::new(Bytes::from(key), Bytes::from(value)))
    }

    async fn seeded(keys: &[&'static str]) -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage
            .apply(keys.iter().map(|k| put(k, "v")).collect())
            .await
            .unwrap();
        storage
    }

    async fn keys_of(mut iter: Box<dyn StorageIterator + Send>) -> Vec<Bytes> {
        let mut keys = vec![];
        while let Some(record) = iter.next().await.unwrap() {
            keys.push(record.key);
        }
        keys
    }

    #[tokio::test]
    async fn should_return_none_when_key_not_found() {
        // given
        let storage = InMemoryStorage::new();

        // when
        let result = storage.get(Bytes::from("missing_key")).await.unwrap();

        // then
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn should_overwrite_existing_key() {
        // given
        let storage = InMemoryStorage::new();
        storage.apply(vec![put("k", "old")]).await.unwrap();

        // when
        storage.apply(vec![put("k", "new")]).await.unwrap();
        let result = storage.get(Bytes::from("k")).await.unwrap();

        // then
        assert_eq!(result.unwrap().value, Bytes::from("new"));
    }

    #[tokio::test]
    async fn should_scan_in_ascending_and_descending_order() {
        // given
        let storage = seeded(&["b", "a", "c"]).await;

        // when
        let asc = storage
            .scan_iter_with_order(BytesRange::unbounded(), ScanOrder::Ascending)
            .await
            .unwrap();
        let desc = storage
            .scan_iter_with_order(BytesRange::unbounded(), ScanOrder::Descending)
            .await
            .unwrap();

        // then
        assert_eq!(keys_of(asc).await, vec!["a", "b", "c"]);
        assert_eq!(keys_of(desc).await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn should_scan_records_in_bounded_range() {
        // given
        let storage = seeded(&["a", "b", "c", "d"]).await;

        // when
        let range = BytesRange::new(
            Bound::Included(Bytes::from("b")),
            Bound::Excluded(Bytes::from("d")),
        );
        let scanned = storage.scan(range).await.unwrap();

        // then
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].key, Bytes::from("b"));
        assert_eq!(scanned[1].key, Bytes::from("c"));
    }

    #[tokio::test]
    async fn should_return_nothing_for_inverted_range() {
        // given
        let storage = seeded(&["a", "b"]).await;
        let range = BytesRange::new(
            Bound::Included(Bytes::from("b")),
            Bound::Excluded(Bytes::from("a")),
        );

        // when
        let scanned = storage.scan(range.clone()).await.unwrap();
        let counted = storage.count(range).await.unwrap();

        // then
        assert!(scanned.is_empty());
        assert_eq!(counted, 0);
    }

    #[tokio::test]
    async fn should_skip_records_in_bulk() {
        // given
        let storage = seeded(&["a", "b", "c", "d"]).await;
        let mut iter = storage.scan_iter(BytesRange::unbounded()).await.unwrap();

        // when
        iter.skip(2).await.unwrap();
        let next = iter.next().await.unwrap();
        iter.skip(10).await.unwrap();
        let after_end = iter.next().await.unwrap();

        // then
        assert_eq!(next.unwrap().key, Bytes::from("c"));
        assert!(after_end.is_none());
    }

    #[tokio::test]
    async fn should_count_records_in_range() {
        // given
        let storage = seeded(&["p1", "p2", "q1"]).await;

        // when
        let count = storage
            .count(BytesRange::prefix(Bytes::from("p")))
            .await
            .unwrap();

        // then
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn should_delete_keys_and_ranges() {
        // given
        let storage = seeded(&["a", "p1", "p2", "z"]).await;

        // when
        storage
            .apply(vec![
                RecordOp::Delete(Bytes::from("a")),
                RecordOp::DeleteRange(BytesRange::prefix(Bytes::from("p"))),
            ])
            .await
            .unwrap();

        // then
        let remaining: Vec<Bytes> = storage
            .scan(BytesRange::unbounded())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(remaining, vec![Bytes::from("z")]);
    }

    #[tokio::test]
    async fn should_not_see_writes_after_snapshot() {
        // given
        let storage = seeded(&["a"]).await;

        // when
        let snapshot = storage.snapshot().await.unwrap();
        storage.apply(vec![put("b", "v")]).await.unwrap();

        // then
        assert!(snapshot.get(Bytes::from("b")).await.unwrap().is_none());
        assert_eq!(snapshot.count(BytesRange::unbounded()).await.unwrap(), 1);
        assert_eq!(storage.count(BytesRange::unbounded()).await.unwrap(), 2);
    }

    #[cfg(feature = "test-utils")]
    #[tokio::test]
    async fn should_fail_scan_at_requested_step() {
        // given
        let storage = FailingStorage::wrap(Arc::new(seeded(&["a", "b", "c"]).await));
        let injected = StorageError::Storage("io error".to_string());
        storage.fail_scan_at_step(2, injected.clone());

        // when
        let snapshot = storage.snapshot().await.unwrap();
        let mut iter = snapshot.scan_iter(BytesRange::unbounded()).await.unwrap();
        let first = iter.next().await;
        let second = iter.next().await;

        // then
        assert_eq!(first.unwrap().unwrap().key, Bytes::from("a"));
        assert_eq!(second.unwrap_err(), injected);
    }

    #[cfg(feature = "test-utils")]
    #[tokio::test]
    async fn should_fail_apply_once() {
        // given
        let storage = FailingStorage::wrap(Arc::new(InMemoryStorage::new()));
        storage.fail_apply_once(StorageError::Storage("disk full".to_string()));

        // when
        let first = storage.apply(vec![put("a", "v")]).await;
        let second = storage.apply(vec![put("a", "v")]).await;

        // then
        assert!(first.is_err());
        assert!(second.is_ok());
    }

    #[cfg(feature = "test-utils")]
    #[tokio::test]
    async fn should_keep_failing_apply_and_snapshot_until_replaced() {
        // given
        let storage = FailingStorage::wrap(Arc::new(InMemoryStorage::new()));
        let err = StorageError::Storage("read only".to_string());
        storage.fail_apply(err.clone());
        storage.fail_snapshot(err.clone());

        // when
        let first = storage.apply(vec![put("a", "v")]).await;
        let second = storage.apply(vec![put("b", "v")]).await;
        let snapshot = storage.snapshot().await;

        // then
        assert_eq!(first.unwrap_err(), err);
        assert_eq!(second.unwrap_err(), err);
        assert_eq!(snapshot.err(), Some(err));
        assert_eq!(storage.get(Bytes::from("a")).await.unwrap(), None);
    }

    #[cfg(feature = "test-utils")]
    #[tokio::test]
    async fn should_stop_failing_scans_opened_after_clear() {
        // given
        let storage = FailingStorage::wrap(Arc::new(seeded(&["a", "b"]).await));
        let injected = StorageError::Storage("io error".to_string());
        storage.fail_scan_at_step(1, injected.clone());
        let mut armed = storage.scan_iter(BytesRange::unbounded()).await.unwrap();

        // when
        storage.clear_scan_failure();
        let disarmed = storage.scan_iter(BytesRange::unbounded()).await.unwrap();

        // then
        assert_eq!(armed.next().await.unwrap_err(), injected);
        assert_eq!(keys_of(disarmed).await, vec![Bytes::from("a"), Bytes::from("b")]);
    }
}
