//! Shared application state for Axum handlers.
//!
//! - **Guard**: the deduplication policy and, through it, the token store
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` after the server stops accepting
//! requests: it stops the store monitor, waits for pending releases and then
//! destroys the store.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::guard::DedupGuard;
use crate::store::TokenStore;

/// Shared application state for Axum handlers.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// ```rust,ignore
/// let state = AppState::new(guard, config);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Deduplication guard shared with the middleware layer
    pub guard: DedupGuard,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state over an initialized guard.
    ///
    /// Spawns the store health monitor unless `health_check_interval` is zero.
    pub fn new(guard: DedupGuard, config: Config) -> Self {
        let state = Self {
            guard,
            started_at: Instant::now(),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if !state.config.health_check_interval.is_zero() {
            state.spawn_store_monitor();
        }

        state
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        self.guard.store()
    }

    /// Periodically ping the store and log when it becomes unreachable or
    /// recovers, before user requests start failing.
    fn spawn_store_monitor(&self) {
        let store = self.guard.store().clone();
        let interval_duration = self.config.health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.tick().await; // Skip first immediate tick
            let mut reachable = true;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Store monitor received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.ping().await {
                            Ok(()) if !reachable => {
                                info!(backend = store.backend(), "Token store reachable again");
                                reachable = true;
                            }
                            Ok(()) => trace!(backend = store.backend(), "Token store ping OK"),
                            Err(e) if reachable => {
                                warn!(
                                    backend = store.backend(),
                                    error = %e,
                                    "Token store ping failed"
                                );
                                reachable = false;
                            }
                            Err(e) => trace!(
                                backend = store.backend(),
                                error = %e,
                                "Token store still unreachable"
                            ),
                        }
                    }
                }
            }

            debug!("Store monitor shutting down");
        });
    }

    /// Gracefully shutdown background work and the token store.
    ///
    /// 1. Signals the store monitor to stop and waits for it
    /// 2. Waits for claims released in the background
    /// 3. Destroys the store
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.guard.shutdown().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
