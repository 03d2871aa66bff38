//! Redis store for `cellrate` (companion crate).
//!
//! The GCRA step runs as a Lua script inside Redis, so the read of the stored TAT, the
//! decision and the conditional `SET ... PX` are one atomic unit no matter how many
//! processes share the server. Time comes from Redis `TIME`; callers need no clock
//! synchronization.
//!
//! ```no_run
//! use cellrate::Limit;
//! use cellrate_redis::{connect_limiter, RedisStoreConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = connect_limiter(&RedisStoreConfig::default()).await?;
//! let decision = limiter.allow("user:42", &Limit::per_minute(60)).await?;
//! if !decision.allowed {
//!     println!("retry in {:?}", decision.retry_after);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use cellrate::rate_limit::gcra::GCRA_LUA;
use cellrate::{GcraArgs, GcraStore, Limiter, ReplyValue, DEFAULT_PREFIX};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Script, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Errors from building or using a [`RedisStore`].
#[derive(Debug, thiserror::Error)]
pub enum RedisStoreError {
    /// Connection, timeout, auth or script execution failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The store needs at least one connection.
    #[error("connection count must be > 0")]
    InvalidConnectionCount,
}

/// Connection settings for [`RedisStore::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RedisStoreConfig {
    /// Redis URL, e.g. `redis://:password@host:6379/0`.
    pub url: String,
    /// Number of multiplexed connections handed out round-robin.
    pub connection_count: usize,
    /// Timeout for establishing a connection.
    pub connection_timeout: Duration,
    /// Timeout for each script execution.
    pub response_timeout: Duration,
    /// Key namespace used by [`connect_limiter`].
    pub prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connection_count: 1,
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// [`GcraStore`] backed by Redis.
///
/// Holds a fixed set of [`ConnectionManager`]s; each execution takes the next one in
/// turn. Connection managers multiplex and reconnect on their own, so the set only bounds
/// how many sockets this store opens. Clones share the connections.
#[derive(Clone)]
pub struct RedisStore {
    connections: Arc<Vec<ConnectionManager>>,
    next: Arc<AtomicUsize>,
    script: Arc<Script>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connections", &self.connections.len())
            .field("script", &self.script.get_hash())
            .finish()
    }
}

impl RedisStore {
    /// Open `config.connection_count` connections to `config.url`.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid, the count is zero or a connection fails.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self, RedisStoreError> {
        let client = Client::open(config.url.as_str())?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.connection_timeout)
            .set_response_timeout(config.response_timeout);
        Self::from_client_with_config(client, config.connection_count, manager_config).await
    }

    /// Open `connection_count` connections from an existing client with default settings.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, RedisStoreError> {
        Self::from_client_with_config(client, connection_count, ConnectionManagerConfig::new())
            .await
    }

    /// Open `connection_count` connections from an existing client.
    pub async fn from_client_with_config(
        client: Client,
        connection_count: usize,
        config: ConnectionManagerConfig,
    ) -> Result<Self, RedisStoreError> {
        if connection_count == 0 {
            return Err(RedisStoreError::InvalidConnectionCount);
        }

        let mut connections = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            connections.push(client.get_connection_manager_with_config(config.clone()).await?);
        }
        tracing::debug!(target: "cellrate::redis", connection_count, "redis store connected");

        Self::from_connections(connections)
    }

    /// Wrap connection managers the caller already owns.
    pub fn from_connections(connections: Vec<ConnectionManager>) -> Result<Self, RedisStoreError> {
        if connections.is_empty() {
            return Err(RedisStoreError::InvalidConnectionCount);
        }
        Ok(Self {
            connections: Arc::new(connections),
            next: Arc::new(AtomicUsize::new(0)),
            script: Arc::new(Script::new(GCRA_LUA)),
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.connections[index % self.connections.len()].clone()
    }
}

#[async_trait]
impl GcraStore for RedisStore {
    type Error = RedisStoreError;

    async fn execute(&self, key: &str, args: &GcraArgs) -> Result<Vec<ReplyValue>, Self::Error> {
        let mut connection = self.connection();
        let reply: Value = self
            .script
            .key(key)
            .arg(args.burst)
            .arg(args.rate)
            .arg(args.period_secs)
            .arg(args.units)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                tracing::warn!(target: "cellrate::redis", key, error = %e, "gcra script failed");
                RedisStoreError::from(e)
            })?;

        Ok(into_reply(reply))
    }
}

/// Connect a [`RedisStore`] and wrap it in a [`Limiter`] using `config.prefix`.
pub async fn connect_limiter(
    config: &RedisStoreConfig,
) -> Result<Limiter<RedisStore>, RedisStoreError> {
    let store = RedisStore::connect(config).await?;
    Ok(Limiter::new(store).with_prefix(config.prefix.clone()))
}

fn into_reply(value: Value) -> Vec<ReplyValue> {
    match value {
        Value::Array(items) => items.into_iter().map(into_reply_value).collect(),
        other => vec![into_reply_value(other)],
    }
}

fn into_reply_value(value: Value) -> ReplyValue {
    match value {
        Value::Int(i) => ReplyValue::Int(i),
        Value::Double(f) => ReplyValue::Float(f),
        Value::BulkString(bytes) => ReplyValue::Bytes(bytes),
        Value::SimpleString(s) => ReplyValue::Text(s),
        Value::VerbatimString { text, .. } => ReplyValue::Text(text),
        Value::Okay => ReplyValue::Text("OK".to_string()),
        Value::Nil => ReplyValue::Nil,
        // Nested or typed replies have no place in the step's reply.
        _ => ReplyValue::Nil,
    }
}
