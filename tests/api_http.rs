// tests/api_http.rs
//
// HTTP-level tests for the Router without opening sockets, via
// tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _;

use channel_digest_bot::create_router;
use common::{config, entry, services, RecordingTransport, StaticFetcher};

const BODY_LIMIT: usize = 1024 * 1024;

struct TestApp {
    router: Router,
    fetcher: Arc<StaticFetcher>,
    transport: Arc<RecordingTransport>,
    services: channel_digest_bot::Services,
}

fn test_app(pairs: &[(&str, &str)]) -> TestApp {
    let cfg = config(pairs);
    let fetcher = Arc::new(StaticFetcher::new());
    let transport = Arc::new(RecordingTransport::new());
    let services = services(&cfg, fetcher.clone(), transport.clone());
    let router = create_router(services.app_state(&cfg));
    TestApp {
        router,
        fetcher,
        transport,
        services,
    }
}

async fn body_string(resp: shuttle_axum::axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    String::from_utf8(bytes).expect("utf8")
}

fn publish_now(token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("POST").uri("/admin/publish-now");
    if let Some(t) = token {
        b = b.header("x-admin-token", t);
    }
    b.body(Body::empty()).expect("build request")
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_app(&[]);
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.router.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
}

#[tokio::test]
async fn status_reports_queue_and_cap() {
    let app = test_app(&[("MAX_ARTICLES_PER_DAY", "4")]);
    app.fetcher
        .set("https://a/feed", vec![entry("One", "https://a/1", Utc::now())]);
    app.services.scheduler.ingest_tick(Utc::now()).await;

    let req = Request::builder()
        .uri("/status")
        .body(Body::empty())
        .expect("build GET /status");
    let resp = app.router.oneshot(req).await.expect("oneshot /status");
    assert_eq!(resp.status(), StatusCode::OK);

    let v: Json = serde_json::from_str(&body_string(resp).await).expect("json");
    assert_eq!(v["pending"], 1);
    assert_eq!(v["daily_cap"], 4);
    assert_eq!(v["published_today"], 0);
    assert_eq!(v["active_sessions"], 0);
    assert!(v["last_ingest_at"].is_string());
    assert!(v["next_publish_at"].is_string());
}

#[tokio::test]
async fn publish_now_without_configured_token_is_forbidden() {
    let app = test_app(&[]);
    let resp = app
        .router
        .oneshot(publish_now(Some("anything")))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn publish_now_with_wrong_or_missing_token_is_forbidden() {
    let app = test_app(&[("ADMIN_TOKEN", "s3cret")]);
    let resp = app
        .router
        .clone()
        .oneshot(publish_now(Some("nope")))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app.router.oneshot(publish_now(None)).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(app.transport.texts().is_empty());
}

#[tokio::test]
async fn publish_now_with_token_publishes_queue() {
    let app = test_app(&[("ADMIN_TOKEN", "s3cret"), ("MAX_ARTICLES_PER_DAY", "3")]);
    let now = Utc::now();
    app.fetcher.set(
        "https://a/feed",
        vec![entry("One", "https://a/1", now), entry("Two", "https://a/2", now)],
    );
    app.services.scheduler.ingest_tick(now).await;

    let resp = app
        .router
        .oneshot(publish_now(Some("s3cret")))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let v: Json = serde_json::from_str(&body_string(resp).await).expect("json");
    assert_eq!(v["published"], 2);
    assert_eq!(v["pending"], 0);
    assert_eq!(v["cap_reached"], false);
    assert_eq!(app.transport.texts().len(), 2);
}
