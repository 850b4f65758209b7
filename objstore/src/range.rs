//! Key ranges.
//!
//! A [`KeyRange`] describes which cursor positions a query visits. Ranges are
//! validated when a cursor opens rather than when they are built, so a
//! malformed range surfaces as [`Error::Range`] from the terminal call.

use std::ops::Bound;

use crate::error::{Error, Result};
use crate::key::Key;

/// An interval over primary or index keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

impl KeyRange {
    /// Matches exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Matches keys above `key` (or equal to it unless `open`).
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Matches keys below `key` (or equal to it unless `open`).
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Matches keys between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    /// Returns true if `key` lies inside the range.
    pub fn includes(&self, key: &Key) -> bool {
        (match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        }) && (match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        })
    }

    /// Checks that the range can be handed to a cursor.
    ///
    /// Rejects NaN bounds, a lower bound above the upper bound, and equal
    /// bounds where either side is open.
    pub(crate) fn validate(&self) -> Result<()> {
        for key in [&self.lower, &self.upper].into_iter().filter_map(|b| match b {
            Bound::Included(k) | Bound::Excluded(k) => Some(k),
            Bound::Unbounded => None,
        }) {
            if !key.is_valid() {
                return Err(Error::Range(format!("invalid bound {}", key)));
            }
        }

        let (lower, lower_open, upper, upper_open) = match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => return Ok(()),
            (Bound::Included(l), Bound::Included(u)) => (l, false, u, false),
            (Bound::Included(l), Bound::Excluded(u)) => (l, false, u, true),
            (Bound::Excluded(l), Bound::Included(u)) => (l, true, u, false),
            (Bound::Excluded(l), Bound::Excluded(u)) => (l, true, u, true),
        };

        if lower > upper {
            return Err(Error::Range(format!(
                "lower bound {} is greater than upper bound {}",
                lower, upper
            )));
        }
        if lower == upper && (lower_open || upper_open) {
            return Err(Error::Range(format!(
                "bounds are equal ({}) but the range is open",
                lower
            )));
        }
        Ok(())
    }
}
