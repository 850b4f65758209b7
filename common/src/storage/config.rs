//! Storage backend configuration.

use serde::{Deserialize, Serialize};

/// Selects the backend that [`create_storage`](super::factory::create_storage)
/// builds.
///
/// Serialized with a `type` tag, e.g. `{"type": "InMemory"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Volatile storage backed by an ordered in-process map.
    #[default]
    InMemory,
}
