use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("book with ID {0} already exists")]
    DuplicateIdentifier(i64),

    #[error("book with ID {0} not found")]
    NotFound(i64),

    #[error("book with ID {id} is already borrowed by {borrower}")]
    AlreadyBorrowed { id: i64, borrower: String },

    #[error("book with ID {0} is not borrowed")]
    NotBorrowed(i64),

    #[error("{0}")]
    Validation(String),

    #[error("store unavailable during {op}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("store did not answer {op} within {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Failures caused by the store rather than by the request.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CatalogError::StoreUnavailable { .. } | CatalogError::Timeout { .. })
    }
}
