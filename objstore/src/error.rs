//! Error types for object store operations.

use common::StorageError;

/// Error type for object store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A named container or index does not exist.
    Scope(String),

    /// The underlying store failed while a cursor traversal was in flight.
    ///
    /// Carries the backend error unmodified.
    Step(StorageError),

    /// A key range was rejected when the cursor opened.
    Range(String),

    /// A write would violate a primary key or unique index constraint.
    Constraint(String),

    /// The requested schema version is lower than the persisted one.
    Version(String),

    /// The underlying store failed outside a traversal.
    Storage(StorageError),

    /// Encoding or decoding errors.
    Encoding(String),

    /// Invalid input or parameter errors.
    InvalidInput(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Step(err) | Error::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Scope(msg) => write!(f, "Scope error: {}", msg),
            Error::Step(err) => write!(f, "Step error: {}", err),
            Error::Range(msg) => write!(f, "Range error: {}", msg),
            Error::Constraint(msg) => write!(f, "Constraint error: {}", msg),
            Error::Version(msg) => write!(f, "Version error: {}", msg),
            Error::Storage(err) => write!(f, "{}", err),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Result type alias for object store operations.
pub type Result<T> = std::result::Result<T, Error>;
