//! Storage key encoding for containers, records and index entries.
//!
//! Every storage key starts with the standard 2-byte prefix:
//!
//! ```text
//! | version (u8) | record_type (u8) | ... |
//!
//! metadata:  | 0x01 | 0x10 |
//! container: | 0x01 | 0x20 | container (terminated) |
//! record:    | 0x01 | 0x30 | container (terminated) | primary key |
//! index:     | 0x01 | 0x40 | container (terminated) | index (terminated) | index key | primary key |
//! ```
//!
//! Encoded keys are self-delimiting and sort in the same order as [`Key`]:
//!
//! ```text
//! number: | 0x10 | sortable f64 (8 bytes, big-endian) |
//! text:   | 0x20 | utf-8 bytes (terminated) |
//! array:  | 0x30 | element encodings ... | 0x00 |
//! ```
//!
//! Terminated bytes escape `0x00` as `0x01 0x01` and `0x01` as `0x01 0x02`
//! and end with `0x00`, so a shorter value sorts before its extensions.

use std::ops::Bound;

use bytes::{BufMut, Bytes, BytesMut};
use common::BytesRange;
use common::bytes::lex_increment;

use crate::error::{Error, Result};
use crate::key::{Key, normalize_number};
use crate::range::KeyRange;

/// Key format version.
pub(crate) const KEY_VERSION: u8 = 0x01;

/// Kind of storage record, the second prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordType {
    Metadata = 0x10,
    Container = 0x20,
    Record = 0x30,
    IndexEntry = 0x40,
}

const NUMBER_TAG: u8 = 0x10;
const TEXT_TAG: u8 = 0x20;
const ARRAY_TAG: u8 = 0x30;

const TERMINATOR_BYTE: u8 = 0x00;
const ESCAPE_BYTE: u8 = 0x01;

fn encode_f64_sortable(value: f64) -> u64 {
    let bits = normalize_number(value).to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    }
}

fn decode_f64_sortable(sortable: u64) -> f64 {
    let bits = if sortable & 0x8000_0000_0000_0000 != 0 {
        sortable ^ 0x8000_0000_0000_0000
    } else {
        !sortable
    };
    f64::from_bits(bits)
}

fn put_terminated(buf: &mut BytesMut, data: &[u8]) {
    for &byte in data {
        match byte {
            TERMINATOR_BYTE => buf.put_slice(&[ESCAPE_BYTE, 0x01]),
            ESCAPE_BYTE => buf.put_slice(&[ESCAPE_BYTE, 0x02]),
            _ => buf.put_u8(byte),
        }
    }
    buf.put_u8(TERMINATOR_BYTE);
}

fn take_terminated(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            TERMINATOR_BYTE => {
                *buf = &buf[i + 1..];
                return Ok(out);
            }
            ESCAPE_BYTE => {
                match buf.get(i + 1) {
                    Some(0x01) => out.push(TERMINATOR_BYTE),
                    Some(0x02) => out.push(ESCAPE_BYTE),
                    Some(other) => {
                        return Err(Error::Encoding(format!(
                            "invalid escape sequence: 0x01 0x{:02x}",
                            other
                        )));
                    }
                    None => {
                        return Err(Error::Encoding(
                            "truncated escape sequence in terminated bytes".to_string(),
                        ));
                    }
                }
                i += 2;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    Err(Error::Encoding(
        "unterminated bytes sequence (missing 0x00 terminator)".to_string(),
    ))
}

fn put_key(buf: &mut BytesMut, key: &Key) {
    match key {
        Key::Number(n) => {
            buf.put_u8(NUMBER_TAG);
            buf.put_u64(encode_f64_sortable(*n));
        }
        Key::Text(s) => {
            buf.put_u8(TEXT_TAG);
            put_terminated(buf, s.as_bytes());
        }
        Key::Array(items) => {
            buf.put_u8(ARRAY_TAG);
            for item in items {
                put_key(buf, item);
            }
            buf.put_u8(TERMINATOR_BYTE);
        }
    }
}

/// Encodes a key on its own, as stored in index entry values.
pub(crate) fn encode_key(key: &Key) -> Bytes {
    let mut buf = BytesMut::new();
    put_key(&mut buf, key);
    buf.freeze()
}

/// Decodes one key from the front of `buf`, advancing past it.
pub(crate) fn decode_key(buf: &mut &[u8]) -> Result<Key> {
    let (&tag, rest) = buf
        .split_first()
        .ok_or_else(|| Error::Encoding("unexpected end of key".to_string()))?;
    *buf = rest;
    match tag {
        NUMBER_TAG => {
            if buf.len() < 8 {
                return Err(Error::Encoding(format!(
                    "number key too short: expected 8 bytes, got {}",
                    buf.len()
                )));
            }
            let (raw, rest) = buf.split_at(8);
            let mut bits = [0u8; 8];
            bits.copy_from_slice(raw);
            *buf = rest;
            Ok(Key::Number(decode_f64_sortable(u64::from_be_bytes(bits))))
        }
        TEXT_TAG => {
            let raw = take_terminated(buf)?;
            String::from_utf8(raw)
                .map(Key::Text)
                .map_err(|e| Error::Encoding(format!("text key is not utf-8: {}", e)))
        }
        ARRAY_TAG => {
            let mut items = Vec::new();
            loop {
                match buf.first() {
                    Some(&TERMINATOR_BYTE) => {
                        *buf = &buf[1..];
                        return Ok(Key::Array(items));
                    }
                    Some(_) => items.push(decode_key(buf)?),
                    None => {
                        return Err(Error::Encoding("unterminated array key".to_string()));
                    }
                }
            }
        }
        other => Err(Error::Encoding(format!("invalid key tag: 0x{:02x}", other))),
    }
}

fn prefix(record_type: RecordType) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(KEY_VERSION);
    buf.put_u8(record_type as u8);
    buf
}

/// Key of the database metadata record (schema version).
pub(crate) fn metadata_key() -> Bytes {
    prefix(RecordType::Metadata).freeze()
}

/// Key of a container's persisted schema.
pub(crate) fn container_key(container: &str) -> Bytes {
    let mut buf = prefix(RecordType::Container);
    put_terminated(&mut buf, container.as_bytes());
    buf.freeze()
}

/// Range covering every key this layout writes.
pub(crate) fn database_range() -> BytesRange {
    BytesRange::prefix(Bytes::from_static(&[KEY_VERSION]))
}

/// Range covering every persisted container schema.
pub(crate) fn container_catalog_range() -> BytesRange {
    BytesRange::prefix(prefix(RecordType::Container).freeze())
}

/// Prefix shared by all records of a container.
pub(crate) fn record_prefix(container: &str) -> Bytes {
    let mut buf = prefix(RecordType::Record);
    put_terminated(&mut buf, container.as_bytes());
    buf.freeze()
}

pub(crate) fn record_key(container: &str, primary_key: &Key) -> Bytes {
    let mut buf = BytesMut::from(record_prefix(container).as_ref());
    put_key(&mut buf, primary_key);
    buf.freeze()
}

/// Prefix shared by all index entries of a container, across its indexes.
pub(crate) fn container_index_prefix(container: &str) -> Bytes {
    let mut buf = prefix(RecordType::IndexEntry);
    put_terminated(&mut buf, container.as_bytes());
    buf.freeze()
}

/// Prefix shared by all entries of one index.
pub(crate) fn index_prefix(container: &str, index: &str) -> Bytes {
    let mut buf = BytesMut::from(container_index_prefix(container).as_ref());
    put_terminated(&mut buf, index.as_bytes());
    buf.freeze()
}

pub(crate) fn index_entry_key(
    container: &str,
    index: &str,
    index_key: &Key,
    primary_key: &Key,
) -> Bytes {
    let mut buf = BytesMut::from(index_prefix(container, index).as_ref());
    put_key(&mut buf, index_key);
    put_key(&mut buf, primary_key);
    buf.freeze()
}

/// Decodes the key that follows `prefix` in a storage key.
///
/// For a record this is the primary key; for an index entry, the index key.
pub(crate) fn decode_key_after(prefix: &[u8], storage_key: &[u8]) -> Result<Key> {
    let mut rest = storage_key.strip_prefix(prefix).ok_or_else(|| {
        Error::Encoding(format!(
            "storage key does not start with the expected {}-byte prefix",
            prefix.len()
        ))
    })?;
    decode_key(&mut rest)
}

fn with_key(prefix: &Bytes, key: &Key) -> Bytes {
    let mut buf = BytesMut::from(prefix.as_ref());
    put_key(&mut buf, key);
    buf.freeze()
}

/// Translates a key range into the byte range of storage keys under `prefix`.
///
/// Storage keys under the prefix may carry further bytes after the encoded
/// key (index entries append the primary key), so an excluded lower bound and
/// an included upper bound both move past every extension of the encoded key.
pub(crate) fn scoped_range(prefix: &Bytes, range: Option<&KeyRange>) -> BytesRange {
    let lower = range.map_or(Bound::Unbounded, KeyRange::lower);
    let upper = range.map_or(Bound::Unbounded, KeyRange::upper);

    let start = match lower {
        Bound::Included(key) => Bound::Included(with_key(prefix, key)),
        Bound::Excluded(key) => {
            let encoded = with_key(prefix, key);
            match lex_increment(&encoded) {
                Some(next) => Bound::Included(next),
                None => Bound::Excluded(encoded),
            }
        }
        Bound::Unbounded => Bound::Included(prefix.clone()),
    };

    let end = match upper {
        Bound::Included(key) => past_extensions(&with_key(prefix, key)),
        Bound::Excluded(key) => Bound::Excluded(with_key(prefix, key)),
        Bound::Unbounded => past_extensions(prefix),
    };

    BytesRange::new(start, end)
}

fn past_extensions(bytes: &[u8]) -> Bound<Bytes> {
    match lex_increment(bytes) {
        Some(next) => Bound::Excluded(next),
        None => Bound::Unbounded,
    }
}
