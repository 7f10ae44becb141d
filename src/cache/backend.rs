//! Cache backing-service abstraction.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// The backing service could not serve a request.
///
/// Never surfaced past [`super::CacheFront`]: a request that hits this is
/// served as a cache miss.
#[derive(Debug, Clone, Error)]
pub enum CacheUnavailable {
    #[error("cache is disabled")]
    Disabled,
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache operation `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("cache operation `{op}` failed: {message}")]
    Operation { op: &'static str, message: String },
}

impl CacheUnavailable {
    pub fn operation(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Operation {
            op,
            message: err.to_string(),
        }
    }
}

/// Byte-level key/value store with per-entry time-to-live.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// `false` when every call is known to fail without doing any work.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Live entry for `key`; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheUnavailable>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheUnavailable>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheUnavailable>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheUnavailable>;
}

/// Backend used when caching is switched off: every call reports
/// unavailability, so every lookup computes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

#[async_trait]
impl CacheBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheUnavailable> {
        Err(CacheUnavailable::Disabled)
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheUnavailable> {
        Err(CacheUnavailable::Disabled)
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheUnavailable> {
        Err(CacheUnavailable::Disabled)
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, CacheUnavailable> {
        Err(CacheUnavailable::Disabled)
    }
}
