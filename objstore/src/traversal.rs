//! Traversal engine.
//!
//! Drives a [`Cursor`] one step at a time for a [`QuerySpec`]: skips the
//! window offset with a single bulk advance, applies the filter, accumulates
//! into the shape the [`ResultMode`] asks for and stops as soon as the result
//! is complete. Every traversal opens its own cursor and settles exactly once.

use common::Storage;
use serde_json::Value;

use crate::cursor::{Cursor, Direction, Position, count_in_range};
use crate::error::{Error, Result};
use crate::query::{Predicate, QuerySpec, ResultMode, Window};
use crate::schema::ContainerSchema;

/// Result being built by a traversal, one variant per [`ResultMode`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accumulator {
    Rows(Vec<Value>),
    Single(Option<Value>),
    Count(u64),
}

impl Accumulator {
    fn new(mode: ResultMode) -> Self {
        match mode {
            ResultMode::Rows => Accumulator::Rows(Vec::new()),
            ResultMode::Single => Accumulator::Single(None),
            ResultMode::Count => Accumulator::Count(0),
        }
    }

    /// Feeds one position past the offset. Returns true once the traversal
    /// must stop.
    fn offer(&mut self, position: Position, filter: Option<&Predicate>, window: Window) -> bool {
        let limit = window.length as usize;
        match self {
            // Counting follows the native range count and ignores the filter.
            Accumulator::Count(count) => {
                *count += 1;
                limit > 0 && *count >= limit as u64
            }
            Accumulator::Rows(rows) => {
                if retains(filter, &position.value) {
                    rows.push(position.value);
                    limit > 0 && rows.len() >= limit
                } else {
                    false
                }
            }
            Accumulator::Single(slot) => {
                if retains(filter, &position.value) {
                    *slot = Some(position.value);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn size(&self) -> u64 {
        match self {
            Accumulator::Rows(rows) => rows.len() as u64,
            Accumulator::Single(slot) => u64::from(slot.is_some()),
            Accumulator::Count(count) => *count,
        }
    }

    pub(crate) fn into_rows(self) -> Result<Vec<Value>> {
        match self {
            Accumulator::Rows(rows) => Ok(rows),
            other => Err(mismatch("rows", &other)),
        }
    }

    pub(crate) fn into_single(self) -> Result<Option<Value>> {
        match self {
            Accumulator::Single(slot) => Ok(slot),
            other => Err(mismatch("single", &other)),
        }
    }

    pub(crate) fn into_count(self) -> Result<u64> {
        match self {
            Accumulator::Count(count) => Ok(count),
            other => Err(mismatch("count", &other)),
        }
    }
}

fn mismatch(expected: &str, actual: &Accumulator) -> Error {
    Error::Internal(format!(
        "expected {} accumulator, traversal produced {:?}",
        expected, actual
    ))
}

fn retains(filter: Option<&Predicate>, value: &Value) -> bool {
    filter.is_none_or(|predicate| predicate(value))
}

/// Runs one traversal of `schema` for `spec` and returns the settled result.
///
/// An unwindowed, non-unique count is answered by the store's native range
/// count instead of stepping the cursor.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(
        container = %schema.name,
        index = spec.index.as_deref().unwrap_or("<primary>"),
        mode = ?mode,
        direction = ?direction,
    )
)]
pub(crate) async fn traverse(
    storage: &dyn Storage,
    schema: &ContainerSchema,
    spec: &QuerySpec,
    mode: ResultMode,
    direction: Direction,
) -> Result<Accumulator> {
    if mode == ResultMode::Count && spec.window.is_unbounded() && !direction.is_unique() {
        let count =
            count_in_range(storage, schema, spec.index.as_deref(), spec.range.as_ref()).await?;
        tracing::debug!(count, "counted range natively");
        return Ok(Accumulator::Count(count));
    }

    let mut cursor = Cursor::open(
        storage,
        schema,
        spec.index.as_deref(),
        spec.range.as_ref(),
        direction,
    )
    .await?;
    let mut accumulator = Accumulator::new(mode);
    let mut skipped = spec.window.offset == 0;

    let mut position = cursor.step().await?;
    while let Some(current) = position {
        if !skipped {
            skipped = true;
            position = cursor.advance(spec.window.offset).await?;
            continue;
        }
        if accumulator.offer(current, spec.filter.as_ref(), spec.window) {
            tracing::debug!(
                steps = cursor.steps(),
                size = accumulator.size(),
                "traversal stopped early"
            );
            return Ok(accumulator);
        }
        position = cursor.step().await?;
    }

    tracing::debug!(
        steps = cursor.steps(),
        size = accumulator.size(),
        "traversal exhausted"
    );
    Ok(accumulator)
}
