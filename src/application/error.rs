use thiserror::Error;

use crate::application::pagination::PaginationError;
use crate::application::repos::StoreError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, QueryError::Malformed(_))
    }
}

impl From<PaginationError> for QueryError {
    fn from(err: PaginationError) -> Self {
        Self::Malformed(err.to_string())
    }
}
