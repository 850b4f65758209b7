//! Cursor adapter over the ordered storage.
//!
//! A [`Cursor`] walks either a container's records in primary key order or
//! one of its indexes in index key order, bounded by an optional
//! [`KeyRange`]. It reads through a snapshot taken when it opens, so a
//! traversal never observes writes made after it started.
//!
//! Each step is one awaited call taking `&mut self`; a cursor cannot have two
//! steps in flight.

use std::sync::Arc;

use bytes::Bytes;
use common::{ScanOrder, Storage, StorageIterator, StorageSnapshot};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::range::KeyRange;
use crate::schema::ContainerSchema;
use crate::serde::{decode_key, decode_key_after, index_prefix, record_key, record_prefix, scoped_range};

/// Visiting order of a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys, every record.
    #[default]
    Next,
    /// Ascending keys, only the first record of each distinct key.
    NextUnique,
    /// Descending keys, every record.
    Prev,
    /// Descending keys, only the first record of each distinct key.
    ///
    /// "First" is the record with the lowest primary key, the same record
    /// [`Direction::NextUnique`] visits for that key.
    PrevUnique,
}

impl Direction {
    fn order(self) -> ScanOrder {
        match self {
            Direction::Next | Direction::NextUnique => ScanOrder::Ascending,
            Direction::Prev | Direction::PrevUnique => ScanOrder::Descending,
        }
    }

    pub(crate) fn is_unique(self) -> bool {
        matches!(self, Direction::NextUnique | Direction::PrevUnique)
    }
}

/// The record a cursor is positioned at.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// The key the cursor orders by: the index key for index cursors,
    /// otherwise the primary key.
    pub key: Key,
    pub primary_key: Key,
    pub value: Value,
}

/// What a cursor scans.
#[derive(Debug, Clone)]
enum Source {
    Primary { prefix: Bytes },
    Index { prefix: Bytes, container: String },
}

impl Source {
    /// Resolves the index name against the schema.
    fn resolve(schema: &ContainerSchema, index: Option<&str>) -> Result<Self> {
        match index {
            None => Ok(Source::Primary {
                prefix: record_prefix(&schema.name),
            }),
            Some(name) if schema.index(name).is_some() => Ok(Source::Index {
                prefix: index_prefix(&schema.name, name),
                container: schema.name.clone(),
            }),
            Some(name) => Err(Error::Scope(format!(
                "index {} not found in container {}",
                name, schema.name
            ))),
        }
    }

    fn prefix(&self) -> &Bytes {
        match self {
            Source::Primary { prefix } | Source::Index { prefix, .. } => prefix,
        }
    }

    fn decode(&self, key: &[u8], value: Bytes) -> Result<Entry> {
        match self {
            Source::Primary { prefix } => {
                let key = decode_key_after(prefix, key)?;
                Ok(Entry {
                    primary_key: key.clone(),
                    key,
                    record: Some(value),
                })
            }
            Source::Index { prefix, .. } => {
                let key = decode_key_after(prefix, key)?;
                let primary_key = decode_key(&mut value.as_ref())?;
                Ok(Entry {
                    key,
                    primary_key,
                    record: None,
                })
            }
        }
    }
}

/// A raw cursor position before its record is loaded.
#[derive(Debug)]
struct Entry {
    key: Key,
    primary_key: Key,
    /// Present for primary cursors; index cursors load the record on demand.
    record: Option<Bytes>,
}

/// Checks scope and range, returning what to scan and the byte range to scan.
fn prepare(
    schema: &ContainerSchema,
    index: Option<&str>,
    range: Option<&KeyRange>,
) -> Result<(Source, common::BytesRange)> {
    let source = Source::resolve(schema, index)?;
    if let Some(range) = range {
        range.validate()?;
    }
    let bytes = scoped_range(source.prefix(), range);
    Ok((source, bytes))
}

/// A directional traversal handle over a container or one of its indexes.
pub struct Cursor {
    snapshot: Arc<dyn StorageSnapshot>,
    iter: Box<dyn StorageIterator + Send>,
    source: Source,
    direction: Direction,
    /// Key of the last visited entry, for [`Direction::NextUnique`].
    last_key: Option<Key>,
    /// Entry read past the end of a key group, for [`Direction::PrevUnique`].
    lookahead: Option<Entry>,
    steps: u64,
}

impl Cursor {
    /// Opens a cursor before the first position in `direction`.
    ///
    /// Fails with [`Error::Scope`] if `index` is not defined on the
    /// container and with [`Error::Range`] if `range` is malformed. A `None`
    /// range covers the whole container or index.
    #[tracing::instrument(level = "trace", skip_all, fields(container = %schema.name))]
    pub(crate) async fn open(
        storage: &dyn Storage,
        schema: &ContainerSchema,
        index: Option<&str>,
        range: Option<&KeyRange>,
        direction: Direction,
    ) -> Result<Self> {
        let (source, bytes) = prepare(schema, index, range)?;
        let snapshot = storage.snapshot().await.map_err(Error::Step)?;
        let iter = snapshot
            .scan_iter_with_order(bytes, direction.order())
            .await
            .map_err(Error::Step)?;

        Ok(Self {
            snapshot,
            iter,
            source,
            direction,
            last_key: None,
            lookahead: None,
            steps: 0,
        })
    }

    /// Moves to the next position, returning `None` once exhausted.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn step(&mut self) -> Result<Option<Position>> {
        self.steps += 1;
        self.visit().await
    }

    /// Moves `count` positions forward and returns the position landed on.
    ///
    /// Positions passed over are not loaded. Outside the unique directions
    /// the skip is a single bulk request to the store.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn advance(&mut self, count: u32) -> Result<Option<Position>> {
        if count == 0 {
            return Err(Error::InvalidInput(
                "advance count must be greater than zero".to_string(),
            ));
        }
        self.steps += 1;
        if self.direction.is_unique() {
            for _ in 1..count {
                if self.next_entry().await?.is_none() {
                    return Ok(None);
                }
            }
        } else {
            self.iter
                .skip(count as usize - 1)
                .await
                .map_err(Error::Step)?;
        }
        self.visit().await
    }

    /// Number of `step`/`advance` calls answered so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    async fn visit(&mut self) -> Result<Option<Position>> {
        match self.next_entry().await? {
            Some(entry) => self.load(entry).await.map(Some),
            None => Ok(None),
        }
    }

    async fn read_entry(&mut self) -> Result<Option<Entry>> {
        match self.iter.next().await.map_err(Error::Step)? {
            Some(record) => self.source.decode(&record.key, record.value).map(Some),
            None => Ok(None),
        }
    }

    async fn next_entry(&mut self) -> Result<Option<Entry>> {
        match self.direction {
            Direction::Next | Direction::Prev => self.read_entry().await,
            Direction::NextUnique => loop {
                let Some(entry) = self.read_entry().await? else {
                    return Ok(None);
                };
                if self.last_key.as_ref() != Some(&entry.key) {
                    self.last_key = Some(entry.key.clone());
                    return Ok(Some(entry));
                }
            },
            Direction::PrevUnique => {
                let mut current = match self.lookahead.take() {
                    Some(entry) => entry,
                    None => match self.read_entry().await? {
                        Some(entry) => entry,
                        None => return Ok(None),
                    },
                };
                // Descending order reaches the lowest primary key of a group last.
                loop {
                    match self.read_entry().await? {
                        Some(entry) if entry.key == current.key => current = entry,
                        Some(entry) => {
                            self.lookahead = Some(entry);
                            return Ok(Some(current));
                        }
                        None => return Ok(Some(current)),
                    }
                }
            }
        }
    }

    async fn load(&self, entry: Entry) -> Result<Position> {
        let bytes = match (entry.record, &self.source) {
            (Some(bytes), _) => bytes,
            (None, Source::Index { container, .. }) => {
                let key = record_key(container, &entry.primary_key);
                self.snapshot
                    .get(key)
                    .await
                    .map_err(Error::Step)?
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "index entry in {} points at missing record {}",
                            container, entry.primary_key
                        ))
                    })?
                    .value
            }
            (None, Source::Primary { .. }) => {
                return Err(Error::Internal(
                    "primary cursor entry without record".to_string(),
                ));
            }
        };
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(Position {
            key: entry.key,
            primary_key: entry.primary_key,
            value,
        })
    }
}

/// Counts the positions of a forward, non-unique cursor without stepping it.
#[tracing::instrument(level = "trace", skip_all, fields(container = %schema.name))]
pub(crate) async fn count_in_range(
    storage: &dyn Storage,
    schema: &ContainerSchema,
    index: Option<&str>,
    range: Option<&KeyRange>,
) -> Result<u64> {
    let (_, bytes) = prepare(schema, index, range)?;
    let snapshot = storage.snapshot().await.map_err(Error::Step)?;
    snapshot.count(bytes).await.map_err(Error::Step)
}
