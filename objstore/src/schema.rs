//! Container and index declarations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A secondary index over one field of a container's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    /// Dotted path of the indexed field.
    pub key_path: String,
    /// Rejects writes that would give two records the same index key.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A named, ordered collection of JSON records keyed by a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSchema {
    pub name: String,
    /// Dotted path of the primary key inside each record.
    pub key_path: String,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl ContainerSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Checks names are non-empty and index names are distinct.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput(
                "container name must not be empty".to_string(),
            ));
        }
        for (i, index) in self.indexes.iter().enumerate() {
            if index.name.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "index name in container {} must not be empty",
                    self.name
                )));
            }
            if self.indexes[..i].iter().any(|other| other.name == index.name) {
                return Err(Error::InvalidInput(format!(
                    "duplicate index {} in container {}",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deserialize_schema_with_defaults() {
        // given
        let json = r#"{"name": "users", "key_path": "id",
            "indexes": [{"name": "by_email", "key_path": "email", "unique": true},
                        {"name": "by_age", "key_path": "age"}]}"#;

        // when
        let schema: ContainerSchema = serde_json::from_str(json).unwrap();

        // then
        assert_eq!(
            schema,
            ContainerSchema::new("users", "id")
                .with_index(IndexSchema::new("by_email", "email").unique())
                .with_index(IndexSchema::new("by_age", "age"))
        );
        assert!(schema.index("by_age").is_some());
        assert!(schema.index("by_name").is_none());
    }

    #[test]
    fn should_reject_duplicate_index_names() {
        let schema = ContainerSchema::new("users", "id")
            .with_index(IndexSchema::new("by_age", "age"))
            .with_index(IndexSchema::new("by_age", "profile.age"));

        assert!(matches!(schema.validate(), Err(Error::InvalidInput(_))));
    }
}
