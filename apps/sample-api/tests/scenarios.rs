//! Integration tests driving the sample router end to end via
//! `tower::ServiceExt::oneshot`, covering the concrete scenarios the
//! idempotency middleware is expected to uphold.

use std::sync::{Mutex, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sample_api::config::SampleApiConfig;
use tower::ServiceExt;

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}

fn clear_idempotency_env() {
    for var in [
        "IDEMPOTENCY_MODE",
        "IDEMPOTENCY_TTL_SECS",
        "IDEMPOTENCY_OVERSELL_PROTECTION",
        "IDEMPOTENCY_LOCK_DIR",
        "IDEMPOTENCY_REDIS_URL",
        "IDEMPOTENCY_DATABASE_URL",
        "IDEMPOTENCY_MAX_LOCK_ATTEMPTS",
        "IDEMPOTENCY_LOCK_RETRY_DELAY_MS",
    ] {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

fn set_lock_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("IDEMPOTENCY_LOCK_DIR", dir.path());
    }
    dir
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(path: &str, key: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn first_write_then_replay() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;

    let first = app
        .clone()
        .oneshot(post("/orders", Some("order-key-1"), serde_json::json!({"product_id": "widget"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = body_json(first).await;

    let second = app
        .oneshot(post("/orders", Some("order-key-1"), serde_json::json!({"product_id": "widget"})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(
        second.headers().get("x-idempotent-response").unwrap(),
        "true"
    );
    let second_body = body_json(second).await;
    assert_eq!(first_body, second_body, "replay must return the original order id");
}

#[tokio::test]
async fn strict_mode_rejects_missing_key() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;

    let response = app
        .oneshot(post("/orders", None, serde_json::json!({"product_id": "widget"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid idempotency key");
}

#[tokio::test]
async fn concurrent_duplicates_execute_handler_exactly_once() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;
    let app2 = app.clone();

    let (r1, r2) = tokio::join!(
        app.oneshot(post("/orders", Some("concurrent-key"), serde_json::json!({"product_id": "widget"}))),
        app2.oneshot(post("/orders", Some("concurrent-key"), serde_json::json!({"product_id": "widget"})))
    );
    let b1 = body_json(r1.unwrap()).await;
    let b2 = body_json(r2.unwrap()).await;
    assert_eq!(b1, b2, "both responses must agree on a single winning order id");
}

#[tokio::test]
async fn oversell_guard_rejects_insufficient_stock() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();
    unsafe {
        std::env::set_var("IDEMPOTENCY_OVERSELL_PROTECTION", "true");
    }

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;

    let response = app
        .oneshot(post(
            "/checkout",
            Some("checkout-key-1"),
            serde_json::json!({"product_id": "widget", "quantity": 999}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Insufficient stock");

    unsafe {
        std::env::remove_var("IDEMPOTENCY_OVERSELL_PROTECTION");
    }
}

#[tokio::test]
async fn oversell_guard_restocks_on_handler_failure() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();
    unsafe {
        std::env::set_var("IDEMPOTENCY_OVERSELL_PROTECTION", "true");
    }

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;

    // Reserve the full 10-unit seed against a handler that always fails;
    // the middleware should restock on the 500.
    let failing = app
        .clone()
        .oneshot(post(
            "/checkout",
            Some("checkout-key-fail"),
            serde_json::json!({"product_id": "force-failure", "quantity": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(failing.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // A second, distinct key requesting the full 10 units should still
    // succeed only if the prior reservation was actually restocked.
    let follow_up = app
        .oneshot(post(
            "/checkout",
            Some("checkout-key-follow-up"),
            serde_json::json!({"product_id": "widget", "quantity": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(follow_up.status(), StatusCode::CREATED);

    unsafe {
        std::env::remove_var("IDEMPOTENCY_OVERSELL_PROTECTION");
    }
}

#[tokio::test]
async fn ttl_expiry_allows_the_handler_to_run_again() {
    let _guard = env_lock();
    clear_idempotency_env();
    let _lock_dir = set_lock_dir();
    unsafe {
        std::env::set_var("IDEMPOTENCY_TTL_SECS", "1");
    }

    let app = sample_api::build_app(&SampleApiConfig::from_env()).await.unwrap().router;

    let first = app
        .clone()
        .oneshot(post("/orders", Some("ttl-key"), serde_json::json!({"product_id": "widget"})))
        .await
        .unwrap();
    let first_body = body_json(first).await;

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let second = app
        .oneshot(post("/orders", Some("ttl-key"), serde_json::json!({"product_id": "widget"})))
        .await
        .unwrap();
    assert!(second.headers().get("x-idempotent-response").is_none());
    let second_body = body_json(second).await;
    assert_ne!(
        first_body["order_id"], second_body["order_id"],
        "after TTL expiry the handler must run again and mint a new order id"
    );

    unsafe {
        std::env::remove_var("IDEMPOTENCY_TTL_SECS");
    }
}
