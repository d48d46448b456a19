//! Redis-backed token store shared across processes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use super::{Lifecycle, Release, StoreEnvironment, StoreError, StoreResult, TokenStore};

/// Default Redis set holding claimed keys.
pub const DEFAULT_SET_KEY: &str = "RequestID";

/// Default name of the Redis resource looked up in [`StoreEnvironment`].
pub const DEFAULT_REDIS_RESOURCE: &str = "redis";

/// Token store backed by a single Redis set.
///
/// `SADD` is the only synchronization primitive: Redis executes it atomically
/// for every caller, so no local locking is needed around claims. The
/// connection is a [`ConnectionManager`], a multiplexed connection that
/// reconnects on its own after transport failures.
///
/// # Timeouts
///
/// The guard never bounds a claim itself. Set
/// [`with_response_timeout`](Self::with_response_timeout) to cap how long a
/// hanging Redis call may hold a request.
pub struct SharedTokenStore {
    set_key: String,
    resource: String,
    response_timeout: Option<Duration>,
    connection: RwLock<Lifecycle<ConnectionManager>>,
}

impl SharedTokenStore {
    pub fn new() -> Self {
        Self {
            set_key: DEFAULT_SET_KEY.to_string(),
            resource: DEFAULT_REDIS_RESOURCE.to_string(),
            response_timeout: None,
            connection: RwLock::new(Lifecycle::Pending),
        }
    }

    /// Use `key` as the Redis set name. Empty keys keep the default.
    pub fn with_set_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.set_key = key;
        }
        self
    }

    /// Resolve the Redis client registered under `name` during `init`.
    pub fn with_resource(mut self, name: impl Into<String>) -> Self {
        self.resource = name.into();
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[cfg(test)]
    fn set_key(&self) -> &str {
        &self.set_key
    }

    /// Clone the live connection without holding the lock across I/O.
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        Ok(self.connection.read().await.ready()?.clone())
    }

    async fn bounded<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| StoreError::Timeout(limit))?
                .map_err(StoreError::from),
            None => op.await.map_err(StoreError::from),
        }
    }
}

impl Default for SharedTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTokenStore")
            .field("set_key", &self.set_key)
            .field("resource", &self.resource)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStore for SharedTokenStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self, env), fields(resource = %self.resource, set_key = %self.set_key))]
    async fn init(&self, env: &StoreEnvironment) -> StoreResult<()> {
        self.connection.read().await.ensure_pending()?;

        let client = env
            .redis(&self.resource)
            .ok_or_else(|| StoreError::NotConfigured(self.resource.clone()))?
            .clone();

        let mut manager = self.bounded(client.get_connection_manager()).await?;
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut manager))
            .await?;
        if pong != "PONG" {
            return Err(StoreError::Backend(format!(
                "unexpected PING reply from Redis: {pong}"
            )));
        }

        self.connection.write().await.start(manager)?;
        info!("Shared token store connected to Redis");
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(set_key = %self.set_key))]
    async fn save(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let added: i64 = self.bounded(conn.sadd(&self.set_key, key)).await?;

        match added {
            1 => Ok(()),
            0 => Err(StoreError::AlreadyClaimed),
            other => Err(StoreError::Backend(format!(
                "SADD returned {other} for a single member"
            ))),
        }
    }

    #[instrument(skip(self), level = "debug", fields(set_key = %self.set_key))]
    async fn remove(&self, key: &str) -> StoreResult<Release> {
        let mut conn = self.connection().await?;
        let removed: i64 = self.bounded(conn.srem(&self.set_key, key)).await?;

        if removed > 0 {
            Ok(Release::Released)
        } else {
            Ok(Release::Absent)
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn destroy(&self) {
        let mut connection = self.connection.write().await;
        if matches!(*connection, Lifecycle::Pending) {
            warn!("Destroying a shared token store that was never initialized");
        }
        *connection = Lifecycle::Destroyed;
        info!("Shared token store disconnected");
    }
}
