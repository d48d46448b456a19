//! Client identity used to scope idempotency tokens.
//!
//! # Resolution Order
//!
//! 1. Peer address from Axum's `ConnectInfo<SocketAddr>` extension
//! 2. If that peer is a trusted proxy: first address in `X-Forwarded-For`,
//!    then `X-Real-IP`
//! 3. [`UNKNOWN_IP`] when the server was started without connect info
//!
//! Forwarding headers from untrusted peers are ignored. Otherwise a client
//! could pick an arbitrary identity and share a scope with someone else's
//! tokens.
//!
//! # Serving
//!
//! Connect info is only present when the router is served with
//! `into_make_service_with_connect_info::<SocketAddr>()`.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::debug;

use super::proxy::TrustedProxyConfig;

/// Identity used when the peer address is unavailable.
///
/// Every such request shares one scope, so tokens still deduplicate but
/// different clients may collide. Serve with connect info in production.
pub const UNKNOWN_IP: &str = "unknown";

/// First forwarded address, if any header carries one.
fn forwarded_client<B>(req: &Request<B>) -> Option<&str> {
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return Some(first);
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the client identity for `req`.
///
/// Returns a borrowed [`UNKNOWN_IP`] when no identity is available and an owned
/// string otherwise.
pub fn client_identity<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(peer) = peer_ip(req) else {
        return Cow::Borrowed(UNKNOWN_IP);
    };

    if trusted.is_trusted(&peer)
        && let Some(forwarded) = forwarded_client(req)
    {
        debug!(
            peer = %peer,
            client = %forwarded,
            "Using forwarded client address from trusted proxy"
        );
        return Cow::Owned(forwarded.to_string());
    }

    Cow::Owned(peer.to_string())
}
