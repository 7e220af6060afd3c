//! Crate-wide error type returned at component boundaries (façade, CLI).
//!
//! Internal components keep their own narrower error enums (see
//! `validator::ValidationStatus`, `client::ClientError`) and convert into
//! `CoreError` only once they cross into the façade, mirroring how the
//! teacher funnels everything into `AppError` at the `app_state` boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}
