//! Business logic: configuration, uploads, signed access, reconciliation.

pub mod client_cache;
pub mod cos_service;
pub mod presign;
pub mod reconciler;
#[cfg(test)]
pub mod test_support;

use std::io;
use thiserror::Error;

use crate::store::StoreError;

pub use cos_service::{CosService, ServiceSettings};
pub use reconciler::SyncReport;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage is not configured yet, save a configuration first")]
    ConfigurationMissing,
    #[error("file exceeds the {limit_mb} MB upload limit")]
    PayloadTooLarge { limit_mb: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("{0}")]
    StorageProvider(String),
    #[error("object record `{0}` not found")]
    RecordNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Provider failures keep the provider's message verbatim.
impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::StorageProvider(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
