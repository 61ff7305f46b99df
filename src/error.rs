//! Error types shared by the store and runtime clients.

use thiserror::Error;

/// Failures reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The field exists in the schema but has never been written.
    #[error("field {field} not set on entity {entity}")]
    FieldNotFound { entity: String, field: String },

    #[error("unknown notification token: {0}")]
    UnknownToken(u64),
}

impl StoreError {
    pub fn field_not_found(entity: impl Into<String>, field: impl Into<String>) -> Self {
        StoreError::FieldNotFound {
            entity: entity.into(),
            field: field.into(),
        }
    }

    pub fn is_field_not_found(&self) -> bool {
        matches!(self, StoreError::FieldNotFound { .. })
    }
}

/// Failures reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("no stats sample returned for container {0}")]
    NoStatsSample(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),
}
