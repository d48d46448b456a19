//! # Request Deduplication Guard
//!
//! Axum middleware that rejects a mutating request while an earlier request
//! carrying the same idempotency token from the same client is still being
//! processed:
//!
//! - **Policy**: safe methods bypass, missing tokens are refused (or passed
//!   through when configured), overlapping tokens get `403`
//! - **Backends**: in-process set for one instance, Redis set for many
//! - **Failure modes**: claim faults fail closed (`503`), release faults fail
//!   open and are reported
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Trace → CORS → DedupLayer)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DedupGuard (screen → claim → release)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TokenStore: LocalTokenStore | SharedTokenStore             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Redis SET (shared backend only)                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use request_dedup::{AppState, Config, DedupGuard, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = config.build_store();
//!     store.init(&config.store_environment()?).await?;
//!
//!     let guard = DedupGuard::new(store, config.dedup_settings()?);
//!     let app = build_router(AppState::new(guard, config));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Sharing claims across instances
//!
//! ```bash
//! DEDUP_BACKEND=redis REDIS_URL=redis://127.0.0.1:6379 cargo run
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use guard::{Admission, Claim, DedupGuard, DedupSettings, FaultHandler, LogFaults};
pub use routes::build_router;
pub use state::AppState;
pub use store::{LocalTokenStore, SharedTokenStore, StoreEnvironment, StoreError, TokenStore};
