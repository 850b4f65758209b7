//! Configuration options for opening a [`Database`](crate::Database).

use common::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::schema::ContainerSchema;

/// Configuration for opening a [`Database`](crate::Database).
///
/// Opening with a `version` above the persisted one creates the declared
/// containers and indexes that do not exist yet. Opening with the same
/// version leaves the schema untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Schema version requested by the caller.
    #[serde(default)]
    pub version: u32,

    /// Containers that should exist once the database is open.
    #[serde(default)]
    pub containers: Vec<ContainerSchema>,
}

impl Config {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn with_container(mut self, schema: ContainerSchema) -> Self {
        self.containers.push(schema);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deserialize_minimal_config() {
        // given
        let json = r#"{"version": 2, "containers": [{"name": "users", "key_path": "id"}]}"#;

        // when
        let config: Config = serde_json::from_str(json).unwrap();

        // then
        assert_eq!(config.storage, StorageConfig::InMemory);
        assert_eq!(
            config,
            Config::new(2).with_container(ContainerSchema::new("users", "id"))
        );
    }
}
