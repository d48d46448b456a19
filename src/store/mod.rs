//! Idempotency-token stores with exactly-once admission semantics.
//!
//! A [`TokenStore`] records which [`ScopeKey`]s are currently claimed.
//! `save` claims a key atomically and fails with
//! [`StoreError::AlreadyClaimed`] while the key is held; `remove` releases it.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │   LocalTokenStore    │        │      SharedTokenStore        │
//! │  RwLock<HashSet>     │        │  Redis SADD / SREM on a set  │
//! │  process lifetime    │        │  shared by every instance    │
//! └──────────────────────┘        └──────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `init` must be called exactly once before the first `save`. After
//! `destroy`, every operation fails fast with [`StoreError::Destroyed`].

mod error;
mod key;
mod local;
mod shared;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use key::{SCOPE_DELIMITER, ScopeKey};
pub use local::LocalTokenStore;
pub use shared::{DEFAULT_REDIS_RESOURCE, DEFAULT_SET_KEY, SharedTokenStore};

/// Outcome of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The key was claimed and is now free.
    Released,
    /// The key was not claimed (double release or backend eviction).
    Absent,
}

/// Storage contract for claimed scope keys.
///
/// Implementations must be safe to call concurrently for arbitrary keys,
/// including the same key from many tasks at once.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Static backend name used in logs and metric labels.
    fn backend(&self) -> &'static str;

    /// One-time backend setup, resolving any external resource from `env`.
    async fn init(&self, env: &StoreEnvironment) -> StoreResult<()>;

    /// Atomically claim `key`.
    async fn save(&self, key: &str) -> StoreResult<()>;

    /// Release `key`. Releasing an absent key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<Release>;

    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Release backend resources. The store is unusable afterwards.
    async fn destroy(&self);
}

/// Named external resources a store may resolve during `init`.
#[derive(Clone, Default)]
pub struct StoreEnvironment {
    redis: HashMap<String, redis::Client>,
}

impl StoreEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Redis client under `name`.
    pub fn with_redis(mut self, name: impl Into<String>, client: redis::Client) -> Self {
        self.redis.insert(name.into(), client);
        self
    }

    pub fn redis(&self, name: &str) -> Option<&redis::Client> {
        self.redis.get(name)
    }
}

impl fmt::Debug for StoreEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Connection info may carry credentials
        f.debug_struct("StoreEnvironment")
            .field("redis", &self.redis.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Backend selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "local" => Ok(BackendKind::Memory),
            "redis" | "shared" => Ok(BackendKind::Redis),
            other => Err(format!(
                "unknown backend '{other}', expected 'memory' or 'redis'"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle shared by both backends.
///
/// Held behind each store's own lock; never exposed to callers.
#[derive(Debug)]
enum Lifecycle<T> {
    Pending,
    Ready(T),
    Destroyed,
}

impl<T> Lifecycle<T> {
    fn ready(&self) -> StoreResult<&T> {
        match self {
            Lifecycle::Ready(inner) => Ok(inner),
            Lifecycle::Pending => Err(StoreError::NotInitialized),
            Lifecycle::Destroyed => Err(StoreError::Destroyed),
        }
    }

    fn ready_mut(&mut self) -> StoreResult<&mut T> {
        match self {
            Lifecycle::Ready(inner) => Ok(inner),
            Lifecycle::Pending => Err(StoreError::NotInitialized),
            Lifecycle::Destroyed => Err(StoreError::Destroyed),
        }
    }

    /// Move `Pending` to `Ready(value)`; any other state is a lifecycle error.
    fn start(&mut self, value: T) -> StoreResult<()> {
        match self {
            Lifecycle::Pending => {
                *self = Lifecycle::Ready(value);
                Ok(())
            }
            Lifecycle::Ready(_) => Err(StoreError::AlreadyInitialized),
            Lifecycle::Destroyed => Err(StoreError::Destroyed),
        }
    }

    fn ensure_pending(&self) -> StoreResult<()> {
        match self {
            Lifecycle::Pending => Ok(()),
            Lifecycle::Ready(_) => Err(StoreError::AlreadyInitialized),
            Lifecycle::Destroyed => Err(StoreError::Destroyed),
        }
    }
}
