//! Tower layer applying [`DedupGuard`] to every request.
//!
//! # Response Mapping
//!
//! | admission          | response                                  |
//! |--------------------|-------------------------------------------|
//! | bypass / no token  | downstream response                       |
//! | claimed            | downstream response, key released after   |
//! | missing token      | `400 {"error": <missing message>}`        |
//! | duplicate          | `403 {"error": <overlap message>}`        |
//! | store fault        | `503`, downstream never called            |
//!
//! The key is released before the response is handed back, so a client that
//! retries after receiving it is admitted again.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};

use crate::guard::{Admission, DedupGuard, Screening};

/// Deduplication layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let guard = DedupGuard::new(store, DedupSettings::default());
/// let app = Router::new()
///     .route("/orders", post(create_order))
///     .layer(DedupLayer::new(guard));
/// ```
#[derive(Clone)]
pub struct DedupLayer {
    guard: DedupGuard,
}

impl DedupLayer {
    pub fn new(guard: DedupGuard) -> Self {
        Self { guard }
    }
}

impl<S> Layer<S> for DedupLayer {
    type Service = DedupService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DedupService {
            inner,
            guard: self.guard.clone(),
        }
    }
}

/// Deduplication service wrapper.
#[derive(Clone)]
pub struct DedupService<S> {
    inner: S,
    guard: DedupGuard,
}

impl<S> Service<Request<Body>> for DedupService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let screening = self.guard.screen(&req);
        let guard = self.guard.clone();

        Box::pin(async move {
            let admission = match screening {
                Screening::Decided(admission) => admission,
                Screening::Pending(pending) => guard.claim(pending).await,
            };

            match admission {
                Admission::Bypass | Admission::PassWithoutToken => inner.call(req).await,
                Admission::Rejected(err) => Ok(err.into_response()),
                Admission::Claimed(claim) => {
                    let result = inner.call(req).await;
                    claim.release().await;
                    result
                }
            }
        })
    }
}
