//! In-process token store.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{Lifecycle, Release, StoreEnvironment, StoreError, StoreResult, TokenStore};

/// Token store backed by a `HashSet` behind a readers-writer lock.
///
/// Claims live until released or the process exits; a restart forgets every
/// in-flight claim. Not shared across instances: run [`SharedTokenStore`]
/// when several processes serve the same clients.
///
/// [`SharedTokenStore`]: super::SharedTokenStore
#[derive(Debug)]
pub struct LocalTokenStore {
    claims: RwLock<Lifecycle<HashSet<String>>>,
}

impl LocalTokenStore {
    pub fn new() -> Self {
        Self {
            claims: RwLock::new(Lifecycle::Pending),
        }
    }

    /// Number of keys currently claimed (0 when not initialized).
    pub async fn len(&self) -> usize {
        self.claims.read().await.ready().map_or(0, HashSet::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for LocalTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for LocalTokenStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn init(&self, _env: &StoreEnvironment) -> StoreResult<()> {
        self.claims.write().await.start(HashSet::new())?;
        info!("In-process token store initialized");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn save(&self, key: &str) -> StoreResult<()> {
        // Check and insert under one write guard
        let mut claims = self.claims.write().await;
        if claims.ready_mut()?.insert(key.to_string()) {
            Ok(())
        } else {
            Err(StoreError::AlreadyClaimed)
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove(&self, key: &str) -> StoreResult<Release> {
        let mut claims = self.claims.write().await;
        if claims.ready_mut()?.remove(key) {
            Ok(Release::Released)
        } else {
            Ok(Release::Absent)
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        self.claims.read().await.ready().map(|_| ())
    }

    async fn destroy(&self) {
        let mut claims = self.claims.write().await;
        let dropped = claims.ready().map_or(0, HashSet::len);
        *claims = Lifecycle::Destroyed;
        debug!(dropped_claims = dropped, "In-process token store destroyed");
    }
}
