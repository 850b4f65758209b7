//! Byte utilities for key encoding and range queries.

use bytes::{Bytes, BytesMut};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::ops::{Bound, RangeBounds};

/// Computes the lexicographic successor of a byte sequence.
///
/// Returns the smallest byte sequence that is strictly greater than every
/// sequence starting with `data`, or `None` if no such sequence exists (the
/// input is empty or all `0xFF` bytes).
///
/// Callers use this to turn "everything under this prefix" into an exclusive
/// upper bound, e.g. `[prefix, lex_increment(prefix))`.
///
/// # Examples
///
/// - `[0x61]` ("a") → `Some([0x62])` ("b")
/// - `[0x61, 0xFF]` → `Some([0x62])`
/// - `[0xFF]` → `None`
/// - `[]` → `None`
pub fn lex_increment(data: &[u8]) -> Option<Bytes> {
    let mut result = BytesMut::from(data);

    while let Some(last) = result.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(result.freeze());
        }
        result.truncate(result.len() - 1);
    }

    None
}

/// A range over byte sequences, used for key range queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytesRange {
    pub start: Bound<Bytes>,
    pub end: Bound<Bytes>,
}

impl BytesRange {
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self { start, end }
    }

    /// Creates a range that scans everything.
    pub fn unbounded() -> Self {
        Self {
            start: Unbounded,
            end: Unbounded,
        }
    }

    /// Creates a range that includes all keys with the given prefix.
    pub fn prefix(prefix: Bytes) -> Self {
        if prefix.is_empty() {
            return Self::unbounded();
        }
        let end = match lex_increment(&prefix) {
            Some(end) => Excluded(end),
            None => Unbounded,
        };
        Self {
            start: Included(prefix),
            end,
        }
    }

    pub fn contains(&self, k: &[u8]) -> bool {
        (match &self.start {
            Included(s) => k >= s,
            Excluded(s) => k > s,
            Unbounded => true,
        }) && (match &self.end {
            Included(e) => k <= e,
            Excluded(e) => k < e,
            Unbounded => true,
        })
    }

    /// Returns true if no key can fall inside this range.
    ///
    /// Ordered maps panic when asked for an inverted range, so backends check
    /// this before handing the bounds over.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Unbounded, _) | (_, Unbounded) => false,
            (Included(s), Included(e)) => s > e,
            (Included(s), Excluded(e)) | (Excluded(s), Included(e)) | (Excluded(s), Excluded(e)) => {
                s >= e
            }
        }
    }
}

impl RangeBounds<Bytes> for BytesRange {
    fn start_bound(&self) -> Bound<&Bytes> {
        self.start.as_ref()
    }
    fn end_bound(&self) -> Bound<&Bytes> {
        self.end.as_ref()
    }
}
