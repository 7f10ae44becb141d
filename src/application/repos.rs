//! Store traits describing persistence adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::query::QueryDescriptor;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("query execution failed: {0}")]
    Query(String),
    #[error("document store timeout")]
    Timeout,
    #[error("stored document could not be decoded: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn query(err: impl std::fmt::Display) -> Self {
        Self::Query(err.to_string())
    }
}

/// Read side of a document collection.
///
/// `find` applies the predicate, text search, sort and page window of the
/// descriptor; `count` applies only the predicate and text search.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, query: &QueryDescriptor) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError>;
}
