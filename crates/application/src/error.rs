use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
}

impl ApplicationError {
    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }
}
