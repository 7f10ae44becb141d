//! Redis-protocol cache backend.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{RedisResult, aio::ConnectionManager};
use tokio::sync::OnceCell;
use tokio::time::{Instant, timeout};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::lock::mutex_lock;
use crate::cache::{CacheBackend, CacheUnavailable, RedisConfig};

use super::error::InfraError;

const SOURCE: &str = "infra::redis";
const SCAN_BATCH: usize = 256;

/// Cache backend talking to a Redis-compatible server.
///
/// The connection is opened on first use. A failed connect starts a cooldown
/// during which every call fails fast; once connected the manager reconnects
/// on its own. Every command is bounded by the operation timeout.
pub struct RedisBackend {
    client: redis::Client,
    config: RedisConfig,
    connection: OnceCell<ConnectionManager>,
    last_failure: Mutex<Option<Instant>>,
}

impl RedisBackend {
    pub fn new(config: &RedisConfig) -> Result<Self, InfraError> {
        let url = connection_url(config)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|err| InfraError::configuration(format!("invalid redis settings: {err}")))?;
        Ok(Self {
            client,
            config: config.clone(),
            connection: OnceCell::new(),
            last_failure: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheUnavailable> {
        if let Some(connection) = self.connection.get() {
            return Ok(connection.clone());
        }

        let last_failure = *mutex_lock(&self.last_failure, SOURCE, "cooldown_check");
        if let Some(failed_at) = last_failure {
            let retry_at = failed_at + self.config.retry_cooldown;
            if Instant::now() < retry_at {
                return Err(CacheUnavailable::Connection(
                    "waiting for reconnect cooldown".to_string(),
                ));
            }
        }

        let connection = self
            .connection
            .get_or_try_init(|| self.connect())
            .await
            .inspect_err(|_| {
                *mutex_lock(&self.last_failure, SOURCE, "cooldown_start") = Some(Instant::now());
            })?;
        Ok(connection.clone())
    }

    async fn connect(&self) -> Result<ConnectionManager, CacheUnavailable> {
        let after = self.config.connect_timeout;
        match timeout(after, ConnectionManager::new(self.client.clone())).await {
            Ok(Ok(connection)) => {
                info!(
                    host = %self.config.host,
                    port = self.config.port,
                    tls = self.config.tls,
                    "Connected to redis cache"
                );
                Ok(connection)
            }
            Ok(Err(err)) => {
                error!(
                    host = %self.config.host,
                    port = self.config.port,
                    error = %err,
                    "Redis cache connection failed"
                );
                Err(CacheUnavailable::Connection(err.to_string()))
            }
            Err(_) => {
                error!(
                    host = %self.config.host,
                    port = self.config.port,
                    timeout_ms = after.as_millis() as u64,
                    "Redis cache connection timed out"
                );
                Err(CacheUnavailable::Timeout { op: "connect", after })
            }
        }
    }

    /// Run one command future under the operation timeout.
    async fn run<T, Fut>(&self, op: &'static str, command: Fut) -> Result<T, CacheUnavailable>
    where
        Fut: Future<Output = RedisResult<T>>,
    {
        let after = self.config.operation_timeout;
        match timeout(after, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(op, error = %err, "Redis cache operation failed");
                Err(CacheUnavailable::operation(op, err))
            }
            Err(_) => Err(CacheUnavailable::Timeout { op, after }),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheUnavailable> {
        let mut connection = self.connection().await?;
        let value: Option<Vec<u8>> = self
            .run("get", redis::cmd("GET").arg(key).query_async(&mut connection))
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheUnavailable> {
        let mut connection = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let () = self
            .run(
                "set",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value.as_ref())
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut connection),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheUnavailable> {
        let mut connection = self.connection().await?;
        let removed: i64 = self
            .run("delete", redis::cmd("DEL").arg(key).query_async(&mut connection))
            .await?;
        Ok(removed > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheUnavailable> {
        let mut connection = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    "scan_prefix",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut connection),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may report a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// `redis://` or `rediss://` URL with percent-encoded credentials.
pub fn connection_url(config: &RedisConfig) -> Result<Url, InfraError> {
    let invalid = |what: &str| InfraError::configuration(format!("invalid redis {what}"));
    let scheme = if config.tls { "rediss" } else { "redis" };
    let mut url =
        Url::parse(&format!("{scheme}://localhost")).map_err(|_| invalid("scheme"))?;
    url.set_host(Some(&config.host)).map_err(|_| invalid("host"))?;
    url.set_port(Some(config.port)).map_err(|_| invalid("port"))?;
    if let Some(username) = config.username.as_deref() {
        url.set_username(username).map_err(|_| invalid("username"))?;
    }
    if let Some(password) = config.password.as_deref() {
        url.set_password(Some(password))
            .map_err(|_| invalid("password"))?;
    }
    Ok(url)
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
pub fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '*' | '?' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedisConfig {
        RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            ..Default::default()
        }
    }

    #[test]
    fn url_uses_tls_scheme_and_encodes_credentials() {
        let url = connection_url(&RedisConfig {
            username: Some("shop".to_string()),
            password: Some("p@ss:word".to_string()),
            tls: true,
            ..config()
        })
        .expect("valid url");

        assert_eq!(url.scheme(), "rediss");
        assert_eq!(url.host_str(), Some("cache.internal"));
        assert_eq!(url.port(), Some(6380));
        assert_eq!(url.username(), "shop");
        assert_eq!(url.password(), Some("p%40ss%3Aword"));
    }

    #[test]
    fn url_without_credentials() {
        let url = connection_url(&config()).expect("valid url");
        assert_eq!(url.as_str(), "redis://cache.internal:6380");
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("products:"), "products:");
        assert_eq!(
            escape_glob(r#"products:{"a":[1]}*?\"#),
            r#"products:{"a":\[1\]}\*\?\\"#
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_unavailable_then_cools_down() {
        let backend = RedisBackend::new(&RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(200),
            retry_cooldown: Duration::from_secs(60),
            ..Default::default()
        })
        .expect("client");

        assert!(backend.get("products:x").await.is_err());

        let err = backend.get("products:x").await.unwrap_err();
        assert!(
            matches!(err, CacheUnavailable::Connection(ref message) if message.contains("cooldown"))
        );
    }
}
