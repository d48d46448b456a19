//! Request deduplication policy.
//!
//! [`DedupGuard`] decides, per request, whether a mutating request may run:
//!
//! ```text
//!             safe method? ──yes──▶ Bypass (store untouched)
//!                  │no
//!          token header? ──no──▶ pass_on_missing ? PassWithoutToken : 400
//!                  │yes
//!           valid token? ──no──▶ 400
//!                  │yes
//!     save(client ␟ token) ──AlreadyClaimed──▶ 403
//!                  │         ──fault──────────▶ FaultHandler + 503 (fail closed)
//!                  │ok
//!              Claimed ──▶ downstream ──▶ release (best effort, fail open)
//! ```
//!
//! A [`Claim`] releases its key when [`Claim::release`] is awaited. If the
//! request future is dropped first (client disconnect), the claim releases
//! itself on a background task tracked until [`DedupGuard::shutdown`].

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderName, Method, Request};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::metrics::{self, Outcome};
use crate::middleware::{TrustedProxyConfig, client_identity};
use crate::store::{Release, ScopeKey, StoreError, TokenStore};
use crate::validation::{DEFAULT_MAX_TOKEN_LEN, validate_token};

/// Default header carrying the idempotency token.
pub const DEFAULT_HEADER_NAME: &str = "X-Request-Id";

/// Default body message for a duplicate request.
pub const DEFAULT_OVERLAP_MESSAGE: &str = "request already accepted before, please wait";

/// Default body message for a request without a token.
pub fn default_missing_message(header_name: &str) -> String {
    format!("header value {header_name} can't be empty")
}

/// Guard configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub header_name: HeaderName,
    /// Let requests without a token through unchecked.
    pub pass_on_missing: bool,
    pub missing_message: String,
    pub overlap_message: String,
    pub max_token_len: usize,
    pub trusted_proxies: TrustedProxyConfig,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            header_name: HeaderName::from_static("x-request-id"),
            pass_on_missing: false,
            missing_message: default_missing_message(DEFAULT_HEADER_NAME),
            overlap_message: DEFAULT_OVERLAP_MESSAGE.to_string(),
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            trusted_proxies: TrustedProxyConfig::default(),
        }
    }
}

/// Operator-facing channel for token store faults.
///
/// The guard always fails closed on claim faults and open on release faults;
/// the handler decides how those faults are surfaced.
pub trait FaultHandler: Send + Sync + 'static {
    /// `save` failed for a reason other than a duplicate. The request is rejected.
    fn claim_failed(&self, backend: &'static str, key: &ScopeKey, error: &StoreError);

    /// `remove` failed. The key may stay claimed until cleared or evicted.
    fn release_failed(&self, backend: &'static str, key: &ScopeKey, error: &StoreError);
}

/// Default fault handler: structured logs plus metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaults;

impl FaultHandler for LogFaults {
    fn claim_failed(&self, backend: &'static str, key: &ScopeKey, error: &StoreError) {
        error!(
            backend,
            client = %key.client(),
            token = %key.token(),
            error = %error,
            "Token store failed to claim request key, rejecting request"
        );
    }

    fn release_failed(&self, backend: &'static str, key: &ScopeKey, error: &StoreError) {
        warn!(
            backend,
            client = %key.client(),
            token = %key.token(),
            error = %error,
            "Failed to release request key, it stays claimed until cleared"
        );
        metrics::record_release_failure(backend);
    }
}

struct GuardInner {
    store: Arc<dyn TokenStore>,
    settings: DedupSettings,
    faults: Arc<dyn FaultHandler>,
    /// Background releases of claims whose request was dropped
    releases: TaskTracker,
}

/// Deduplication policy shared by every request.
///
/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct DedupGuard {
    inner: Arc<GuardInner>,
}

/// Result of [`DedupGuard::admit`].
#[must_use]
pub enum Admission {
    /// Safe method; forwarded without touching the store.
    Bypass,
    /// No token and `pass_on_missing` is set.
    PassWithoutToken,
    /// Key claimed; release it once the downstream handler returns.
    Claimed(Claim),
    /// Respond with this error instead of calling downstream.
    Rejected(AppError),
}

/// Result of [`DedupGuard::screen`].
#[derive(Debug)]
pub enum Screening {
    Decided(Admission),
    Pending(PendingClaim),
}

/// A scope key that passed screening and still has to be claimed.
#[derive(Debug)]
pub struct PendingClaim {
    key: ScopeKey,
    path: String,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Bypass => f.write_str("Bypass"),
            Admission::PassWithoutToken => f.write_str("PassWithoutToken"),
            Admission::Claimed(claim) => f.debug_tuple("Claimed").field(claim.key()).finish(),
            Admission::Rejected(err) => f.debug_tuple("Rejected").field(err).finish(),
        }
    }
}

impl DedupGuard {
    /// Build a guard over an initialized store, logging faults via [`LogFaults`].
    pub fn new(store: Arc<dyn TokenStore>, settings: DedupSettings) -> Self {
        Self::with_fault_handler(store, settings, Arc::new(LogFaults))
    }

    pub fn with_fault_handler(
        store: Arc<dyn TokenStore>,
        settings: DedupSettings,
        faults: Arc<dyn FaultHandler>,
    ) -> Self {
        info!(
            backend = store.backend(),
            header = %settings.header_name,
            pass_on_missing = settings.pass_on_missing,
            trusted_proxies = settings.trusted_proxies.is_enabled(),
            "Request deduplication guard configured"
        );

        Self {
            inner: Arc::new(GuardInner {
                store,
                settings,
                faults,
                releases: TaskTracker::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.inner.settings
    }

    /// Safe methods never occupy a slot in the store.
    pub fn bypasses(method: &Method) -> bool {
        [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
    }

    /// Decide whether `req` may proceed, claiming its scope key if so.
    pub async fn admit<B>(&self, req: &Request<B>) -> Admission {
        match self.screen(req) {
            Screening::Decided(admission) => admission,
            Screening::Pending(pending) => self.claim(pending).await,
        }
    }

    /// First stage of [`admit`](Self::admit): every decision that needs no
    /// store call. Borrows the request only for its duration, so the claim
    /// future stays `Send` even for non-`Sync` bodies.
    pub fn screen<B>(&self, req: &Request<B>) -> Screening {
        let settings = &self.inner.settings;

        if Self::bypasses(req.method()) {
            metrics::record_outcome(Outcome::Bypassed);
            return Screening::Decided(Admission::Bypass);
        }

        let token = match extract_token(req.headers(), &settings.header_name) {
            Ok(token) => token,
            Err(e) => {
                metrics::record_outcome(Outcome::InvalidToken);
                return Screening::Decided(Admission::Rejected(e));
            }
        };

        let Some(token) = token else {
            if settings.pass_on_missing {
                debug!(method = %req.method(), "No request token, passing through");
                metrics::record_outcome(Outcome::PassedWithoutToken);
                return Screening::Decided(Admission::PassWithoutToken);
            }
            warn!(
                method = %req.method(),
                path = %req.uri().path(),
                header = %settings.header_name,
                "Rejecting request without token"
            );
            metrics::record_outcome(Outcome::MissingToken);
            return Screening::Decided(Admission::Rejected(AppError::MissingToken(
                settings.missing_message.clone(),
            )));
        };

        if let Err(e) = validate_token(token, settings.max_token_len) {
            metrics::record_outcome(Outcome::InvalidToken);
            return Screening::Decided(Admission::Rejected(e));
        }

        let client = client_identity(req, &settings.trusted_proxies);
        Screening::Pending(PendingClaim {
            key: ScopeKey::new(&client, token),
            path: req.uri().path().to_string(),
        })
    }

    /// Second stage of [`admit`](Self::admit): claim the key in the store.
    pub async fn claim(&self, pending: PendingClaim) -> Admission {
        let PendingClaim { key, path } = pending;
        let settings = &self.inner.settings;
        let backend = self.inner.store.backend();

        let started = Instant::now();
        let result = self.inner.store.save(key.as_str()).await;
        metrics::record_store_op(backend, "save", started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!(client = %key.client(), token = %key.token(), "Request key claimed");
                metrics::record_outcome(Outcome::Admitted);
                Admission::Claimed(Claim {
                    inner: self.inner.clone(),
                    key,
                    released: false,
                })
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    client = %key.client(),
                    token = %key.token(),
                    path = %path,
                    "Rejecting duplicate request"
                );
                metrics::record_outcome(Outcome::Duplicate);
                Admission::Rejected(AppError::DuplicateRequest(settings.overlap_message.clone()))
            }
            Err(e) => {
                self.inner.faults.claim_failed(backend, &key, &e);
                metrics::record_outcome(Outcome::BackendFault);
                Admission::Rejected(AppError::StoreUnavailable(e.to_string()))
            }
        }
    }

    /// Wait for background releases, then destroy the store.
    pub async fn shutdown(&self) {
        self.inner.releases.close();
        self.inner.releases.wait().await;
        self.inner.store.destroy().await;
        info!("Request deduplication guard shut down");
    }
}

/// A claimed scope key, released exactly once.
pub struct Claim {
    inner: Arc<GuardInner>,
    key: ScopeKey,
    released: bool,
}

impl Claim {
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Release the key. Failures go to the fault handler, never to the caller.
    pub async fn release(mut self) {
        release_key(&self.inner, &self.key).await;
        self.released = true;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let inner = self.inner.clone();
        let key = self.key.clone();
        match Handle::try_current() {
            Ok(handle) => {
                debug!(
                    client = %key.client(),
                    token = %key.token(),
                    "Request dropped, releasing claim in background"
                );
                let tracker = inner.releases.clone();
                tracker.spawn_on(async move { release_key(&inner, &key).await }, &handle);
            }
            Err(_) => {
                let err = StoreError::Backend("no async runtime to release claim".to_string());
                inner.faults.release_failed(inner.store.backend(), &key, &err);
            }
        }
    }
}

async fn release_key(inner: &GuardInner, key: &ScopeKey) {
    let backend = inner.store.backend();
    let started = Instant::now();
    let result = inner.store.remove(key.as_str()).await;
    metrics::record_store_op(backend, "remove", started.elapsed().as_secs_f64());

    match result {
        Ok(Release::Released) => {
            debug!(client = %key.client(), token = %key.token(), "Request key released");
        }
        Ok(Release::Absent) => {
            debug!(
                client = %key.client(),
                token = %key.token(),
                "Request key already absent on release"
            );
        }
        Err(e) => inner.faults.release_failed(backend, key, &e),
    }
}

/// Token from `header`, trimmed. Absent and blank values yield `None`.
///
/// Any UTF-8 value is a token. A value that is present but not UTF-8 is
/// rejected rather than treated as missing.
pub fn extract_token<'a>(
    headers: &'a HeaderMap,
    header: &HeaderName,
) -> AppResult<Option<&'a str>> {
    let Some(value) = headers.get(header) else {
        return Ok(None);
    };

    let token = std::str::from_utf8(value.as_bytes())
        .map_err(|_| AppError::InvalidToken("request token must be valid UTF-8".to_string()))?
        .trim();
    Ok((!token.is_empty()).then_some(token))
}
