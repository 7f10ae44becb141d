//! Shopfront cache system.
//!
//! [`CacheFront`] provides read-through caching of compiled catalog queries
//! over a pluggable [`CacheBackend`]:
//!
//! - [`MemoryBackend`]: in-process LRU map with per-entry TTL
//! - `RedisBackend` (in `infra::redis`): shared Redis-protocol server
//! - [`DisabledBackend`]: caching switched off
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "memory"   # or "redis"
//! ttl_seconds = 3600
//! memory_capacity = 1024
//! single_flight = true
//! ```

mod backend;
mod config;
mod front;
mod keys;
pub(crate) mod lock;
mod store;

pub use backend::{CacheBackend, CacheUnavailable, DisabledBackend};
pub use config::{BackendKind, CacheConfig, RedisConfig};
pub use front::CacheFront;
pub use keys::{KEY_SEPARATOR, KeyError, Namespace, parse_key};
pub use store::MemoryBackend;
