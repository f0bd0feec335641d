//! Error types for the storage engine.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Can't translate name safely to filesystem: {0:?}")]
    UnsafePath(String),

    #[error("File name collision: {0:?}")]
    CollidingPath(String),

    #[error("Invalid collection properties: {0}")]
    InvalidProps(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Component already exists: {0:?}")]
    ComponentExists(String),

    #[error("Component doesn't exist: {0:?}")]
    ComponentNotFound(String),

    #[error("Malformed token: {0:?}")]
    MalformedToken(String),

    #[error("Token not found: {0:?}")]
    TokenNotFound(String),

    #[error("Failed to load item {href:?} in {collection:?}: {reason}")]
    Corrupted {
        href: String,
        collection: String,
        reason: String,
    },

    #[error("Durability error: {0}")]
    Durability(String),

    #[error("Storage hook failed: {0}")]
    Hook(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown storage backend: {0:?}")]
    UnknownBackend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Errors caused by caller input; the protocol layer answers these with a 4xx.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::UnsafePath(_)
                | StoreError::CollidingPath(_)
                | StoreError::InvalidProps(_)
                | StoreError::InvalidItem(_)
                | StoreError::ComponentExists(_)
                | StoreError::MalformedToken(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ComponentNotFound(_) | StoreError::TokenNotFound(_)
        )
    }
}

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
