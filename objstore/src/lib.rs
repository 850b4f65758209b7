//! Objstore - An indexed JSON object store with cursor-driven queries.
//!
//! Objstore keeps named containers of JSON records in an ordered key-value
//! store. Each record is addressed by a primary key read from the record
//! itself, and containers may declare secondary indexes over other fields.
//!
//! # Architecture
//!
//! Records and index entries are laid out under OpenData-style prefixed
//! storage keys whose byte order matches [`Key`] order, so every query is a
//! range scan. A query is declared on a [`Store`] (index, key range, filter,
//! offset/length window) and executed by a terminal call that drives a
//! [`Cursor`] step by step, skipping the offset in one bulk advance and
//! stopping as soon as the result is complete.
//!
//! # Key Concepts
//!
//! - **Database**: Opens storage, keeps the schema catalog and upgrades it
//!   when a higher version is requested.
//! - **Store**: Chainable query builder and write handle for one container.
//! - **Cursor**: Directional traversal over a container or index, reading
//!   through a point-in-time snapshot.
//! - **KeyRange**: Interval of keys a query visits, checked when the cursor
//!   opens.
//!
//! # Example
//!
//! ```ignore
//! use objstore::{Config, ContainerSchema, Database, Direction, KeyRange};
//! use serde_json::json;
//!
//! let db = Database::open(
//!     Config::new(1).with_container(ContainerSchema::new("numbers", "key")),
//! )
//! .await?;
//! let numbers = db.store("numbers");
//! for key in 1..=10 {
//!     numbers.add(json!({"key": key})).await?;
//! }
//!
//! // Third page of three
//! let page = numbers.clone().limit(6, 3).gets().await?;
//!
//! // First even key, scanning downwards from 7
//! let even = numbers
//!     .clone()
//!     .range(KeyRange::upper_bound(7, false))
//!     .filter(|r| r["key"].as_i64().is_some_and(|k| k % 2 == 0))
//!     .get_with_direction(Direction::Prev)
//!     .await?;
//!
//! assert_eq!(numbers.count().await?, 10);
//! ```

mod config;
mod cursor;
mod db;
mod error;
mod key;
mod query;
mod range;
mod schema;
mod serde;
mod storage;
mod store;
mod traversal;

pub use common::StorageConfig;
pub use config::Config;
pub use cursor::{Cursor, Direction, Position};
pub use db::Database;
pub use error::{Error, Result};
pub use key::Key;
pub use query::{Predicate, QuerySpec, ResultMode, Window};
pub use range::KeyRange;
pub use schema::{ContainerSchema, IndexSchema};
pub use store::Store;
