//! Persistence and notification bus error types

use thiserror::Error;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("ScyllaDB error: {0}")]
    Scylla(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entity not found: {entity_type} with key {key}")]
    NotFound { entity_type: String, key: String },

    #[error("Duplicate key: {entity_type} with key {key}")]
    Duplicate { entity_type: String, key: String },

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),
}

impl PersistenceError {
    pub fn not_found(entity_type: &str, key: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            key: key.to_string(),
        }
    }

    pub fn duplicate(entity_type: &str, key: impl ToString) -> Self {
        Self::Duplicate {
            entity_type: entity_type.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<delivery_domain::DomainError> for PersistenceError {
    fn from(err: delivery_domain::DomainError) -> Self {
        Self::InvalidData(err.to_string())
    }
}

#[cfg(feature = "scylla")]
impl From<scylla::transport::errors::NewSessionError> for PersistenceError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        Self::Scylla(err.to_string())
    }
}

#[cfg(feature = "scylla")]
impl From<scylla::transport::errors::QueryError> for PersistenceError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        Self::Scylla(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Notification bus errors. Publishing is best-effort, callers log these
/// and carry on.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Notification bus unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}
