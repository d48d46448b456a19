//! HTTP middleware for request deduplication.
//!
//! - **Dedup**: claims `(client, token)` for the lifetime of a mutating request
//! - **Client identity**: peer address, or forwarded address from a trusted proxy
//! - **Trusted proxies**: CIDR-based validation of forwarding peers
//!
//! # Architecture
//!
//! ```text
//! Request → Trace → CORS → Body limit → Dedup → Handler → Response
//!                                         ↓
//!                          400 missing token / 403 duplicate / 503 store fault
//! ```

pub mod dedup;
pub mod ip;
pub mod proxy;

pub use dedup::{DedupLayer, DedupService};
pub use ip::{UNKNOWN_IP, client_identity};
pub use proxy::{CidrRange, TrustedProxyConfig};
