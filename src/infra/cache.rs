//! Cache backend selection.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    BackendKind, CacheBackend, CacheConfig, CacheFront, DisabledBackend, MemoryBackend,
};

use super::error::InfraError;
use super::redis::RedisBackend;

/// Build the backend named by `config`. Redis connects lazily, so an
/// unreachable server does not fail startup.
pub fn build_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, InfraError> {
    if !config.enabled {
        return Ok(Arc::new(DisabledBackend));
    }
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new(config)),
        BackendKind::Redis => Arc::new(RedisBackend::new(&config.redis)?),
    };
    Ok(backend)
}

pub fn build_cache_front(config: &CacheConfig) -> Result<CacheFront, InfraError> {
    let backend = build_backend(config)?;
    info!(
        backend = backend.name(),
        enabled = config.enabled,
        ttl_seconds = config.ttl.as_secs(),
        single_flight = config.single_flight,
        "Catalog cache configured"
    );
    Ok(CacheFront::new(backend).with_single_flight(config.single_flight))
}
