//! SharedTokenStore tests against a real Redis using testcontainers.
//!
//! Each test starts its own Redis container, so no manual setup is required.
//! Docker must be available.
//!
//! Run with: `cargo test --test redis_store_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tower::ServiceExt;

use request_dedup::store::{DEFAULT_REDIS_RESOURCE, Release};
use request_dedup::{
    AppState, Config, DedupGuard, SharedTokenStore, StoreEnvironment, StoreError, TokenStore,
    build_router,
};

/// Redis container configuration
struct RedisContainer {
    port: u16,
}

impl RedisContainer {
    const IMAGE: &'static str = "redis";
    const TAG: &'static str = "7.2-alpine";
    const PORT: u16 = 6379;

    /// Start a Redis container and return the mapped port
    async fn start() -> (ContainerAsync<GenericImage>, Self) {
        let container = GenericImage::new(Self::IMAGE, Self::TAG)
            .with_exposed_port(Self::PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(Self::PORT)
            .await
            .expect("Failed to get Redis port");

        (container, Self { port })
    }

    fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    fn environment(&self) -> StoreEnvironment {
        let client = redis::Client::open(self.url()).expect("valid Redis URL");
        StoreEnvironment::new().with_redis(DEFAULT_REDIS_RESOURCE, client)
    }

    /// Connected store using a set key unique to the calling test
    async fn store(&self, set_key: &str) -> SharedTokenStore {
        let store = SharedTokenStore::new()
            .with_set_key(set_key)
            .with_response_timeout(Some(Duration::from_secs(2)));
        store
            .init(&self.environment())
            .await
            .expect("init against running Redis");
        store
    }
}

// ============================================================================
// TokenStore contract
// ============================================================================

#[tokio::test]
async fn test_concurrent_saves_admit_exactly_one() {
    let (_container, redis) = RedisContainer::start().await;
    let store = Arc::new(redis.store("contention").await);

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(
            async move { store.save("1.2.3.4\u{1f}abc").await },
        ));
    }

    let mut claimed = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => claimed += 1,
            Err(StoreError::AlreadyClaimed) => conflicts += 1,
            Err(e) => panic!("unexpected store error: {e}"),
        }
    }

    assert_eq!(claimed, 1);
    assert_eq!(conflicts, 31);
}

#[tokio::test]
async fn test_release_enables_reuse() {
    let (_container, redis) = RedisContainer::start().await;
    let store = redis.store("reuse").await;

    store.save("k").await.unwrap();
    assert!(matches!(
        store.save("k").await,
        Err(StoreError::AlreadyClaimed)
    ));
    assert_eq!(store.remove("k").await.unwrap(), Release::Released);
    store.save("k").await.unwrap();
}

#[tokio::test]
async fn test_remove_absent_key_is_not_an_error() {
    let (_container, redis) = RedisContainer::start().await;
    let store = redis.store("absent").await;

    assert_eq!(store.remove("never-claimed").await.unwrap(), Release::Absent);
}

#[tokio::test]
async fn test_distinct_clients_same_token() {
    let (_container, redis) = RedisContainer::start().await;
    let store = redis.store("scoping").await;

    store.save("clientA\u{1f}tok1").await.unwrap();
    store.save("clientB\u{1f}tok1").await.unwrap();
}

#[tokio::test]
async fn test_claims_are_shared_between_instances() {
    let (_container, redis) = RedisContainer::start().await;
    let first = redis.store("shared").await;
    let second = redis.store("shared").await;
    let other_set = redis.store("elsewhere").await;

    first.save("k").await.unwrap();
    assert!(matches!(
        second.save("k").await,
        Err(StoreError::AlreadyClaimed)
    ));
    other_set.save("k").await.unwrap();

    assert_eq!(second.remove("k").await.unwrap(), Release::Released);
    first.save("k").await.unwrap();
}

#[tokio::test]
async fn test_init_twice_is_rejected() {
    let (_container, redis) = RedisContainer::start().await;
    let store = redis.store("twice").await;

    assert!(matches!(
        store.init(&redis.environment()).await,
        Err(StoreError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn test_destroy_then_operations_fail_fast() {
    let (_container, redis) = RedisContainer::start().await;
    let store = redis.store("destroy").await;

    store.destroy().await;

    assert!(matches!(store.save("k").await, Err(StoreError::Destroyed)));
    assert!(matches!(store.remove("k").await, Err(StoreError::Destroyed)));
    assert!(store.ping().await.is_err());
}

// ============================================================================
// Failure modes
// ============================================================================

#[tokio::test]
async fn test_init_fails_when_redis_unreachable() {
    // Nothing listens on the discard port
    let client = redis::Client::open("redis://127.0.0.1:9").unwrap();
    let env = StoreEnvironment::new().with_redis(DEFAULT_REDIS_RESOURCE, client);
    let store = SharedTokenStore::new().with_response_timeout(Some(Duration::from_secs(2)));

    let err = store.init(&env).await.unwrap_err();
    assert!(
        matches!(err, StoreError::Backend(_) | StoreError::Timeout(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_save_fails_after_redis_stops() {
    let (container, redis) = RedisContainer::start().await;
    let store = redis.store("outage").await;
    store.save("before").await.unwrap();

    container.stop().await.expect("Failed to stop Redis container");

    let err = store.save("after").await.unwrap_err();
    assert!(!err.is_conflict(), "outage reported as duplicate: {err}");
    assert!(matches!(
        err,
        StoreError::Backend(_) | StoreError::Timeout(_)
    ));
}

#[tokio::test]
async fn test_router_with_shared_backend() {
    let (container, redis) = RedisContainer::start().await;

    let config = Config {
        backend: request_dedup::store::BackendKind::Redis,
        redis_url: Some(redis.url()),
        redis_response_timeout: Some(Duration::from_secs(2)),
        health_check_interval: Duration::ZERO,
        metrics_port: 0,
        ..Config::default()
    };
    let store = config.build_store();
    store.init(&config.store_environment().unwrap()).await.unwrap();
    let guard = DedupGuard::new(store, config.dedup_settings().unwrap());
    let router = build_router(AppState::new(guard, config));

    let submission = || {
        let addr: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/submissions")
            .header("content-type", "application/json")
            .header("X-Request-Id", "abc");
        builder.extensions_mut().unwrap().insert(ConnectInfo(addr));
        builder.body(Body::from("{}")).unwrap()
    };

    let response = router.clone().oneshot(submission()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Released after the first response, so a retry is admitted
    let response = router.clone().oneshot(submission()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ready = Request::get("/ready").body(Body::empty()).unwrap();
    assert_eq!(
        router.clone().oneshot(ready).await.unwrap().status(),
        StatusCode::OK
    );

    container.stop().await.expect("Failed to stop Redis container");

    let response = router.clone().oneshot(submission()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
