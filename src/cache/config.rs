//! Cache configuration.
//!
//! Runtime form of the `[cache]` and `[cache.redis]` sections of
//! `shopfront.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_RETRY_COOLDOWN_MS: u64 = 5_000;

/// Which service holds cached entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process LRU map.
    #[default]
    Memory,
    /// External Redis-protocol server.
    Redis,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Connection parameters for the Redis backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// How long to wait after a failed connect before trying again.
    pub retry_cooldown: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REDIS_PORT,
            username: None,
            password: None,
            tls: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            retry_cooldown: Duration::from_millis(DEFAULT_RETRY_COOLDOWN_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When false every lookup computes and nothing is stored.
    pub enabled: bool,
    pub backend: BackendKind,
    /// Time-to-live applied to cached query results.
    pub ttl: Duration,
    /// Maximum entries held by the in-process backend.
    pub memory_capacity: usize,
    /// Collapse concurrent misses for the same key into one producer call.
    pub single_flight: bool,
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            single_flight: true,
            redis: RedisConfig::default(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        let redis = &settings.redis;
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            ttl: Duration::from_secs(settings.ttl_seconds.get()),
            memory_capacity: settings.memory_capacity,
            single_flight: settings.single_flight,
            redis: RedisConfig {
                host: redis.host.clone(),
                port: redis.port,
                username: redis.username.clone(),
                password: redis.password.clone(),
                tls: redis.tls,
                connect_timeout: Duration::from_millis(redis.connect_timeout_ms.get()),
                operation_timeout: Duration::from_millis(redis.operation_timeout_ms.get()),
                retry_cooldown: Duration::from_millis(redis.retry_cooldown_ms),
            },
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.single_flight);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.memory_capacity, 1024);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_capacity_clamped() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }

    #[test]
    fn backend_kind_deserializes_lowercase() {
        let kind: BackendKind = serde_json::from_str("\"redis\"").expect("valid kind");
        assert_eq!(kind, BackendKind::Redis);
        assert!(serde_json::from_str::<BackendKind>("\"memcached\"").is_err());
    }
}
