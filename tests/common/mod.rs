//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response, Uri},
    routing::{get, post},
    Json, Router,
};
use library_gate::config::{validate_env, Configuration};
use serde_json::Value;

pub const ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Minimal environment that validates.
pub fn base_env() -> Vec<(String, String)> {
    [
        ("DATABASE_URI", "mongodb://localhost:27017/library"),
        ("JWT_SECRET", "integration-secret"),
        ("ADMIN_EMAIL", "admin@library.example"),
        ("ADMIN_PASSWORD", "change-me"),
        ("ADMIN_NAME", "Admin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Validated configuration with `overrides` applied on top of [`base_env`].
pub fn config_with(overrides: &[(&str, &str)]) -> Arc<Configuration> {
    let mut vars = base_env();
    vars.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Arc::new(validate_env(vars).expect("test environment should validate"))
}

pub fn test_config() -> Arc<Configuration> {
    config_with(&[])
}

/// Counts how many requests reached a handler.
#[derive(Clone, Default)]
pub struct HitCounter(Arc<AtomicUsize>);

impl HitCounter {
    pub fn hits(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Routes standing in for the library API:
/// - `GET|OPTIONS /api/books` counts hits
/// - `GET /api/query` echoes the raw query string
/// - `POST /api/echo` echoes the JSON body
/// - `POST /api/form` echoes the raw form body
pub fn app_routes(counter: HitCounter) -> Router {
    Router::new()
        .route("/api/books", get(count_hit).options(count_hit))
        .route("/api/query", get(echo_query))
        .route("/api/echo", post(echo_json))
        .route("/api/form", post(echo_raw))
        .with_state(counter)
}

async fn count_hit(State(counter): State<HitCounter>) -> &'static str {
    counter.0.fetch_add(1, Ordering::SeqCst);
    "[]"
}

async fn echo_query(uri: Uri) -> String {
    uri.query().unwrap_or_default().to_string()
}

async fn echo_json(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn echo_raw(body: String) -> String {
    body
}

/// Attach a peer address, as the real listener does.
pub fn from_client(mut request: Request<Body>, ip: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{}:50000", ip).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn get_from(uri: &str, ip: &str) -> Request<Body> {
    from_client(Request::get(uri).body(Body::empty()).unwrap(), ip)
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Every header the security policy sets.
pub const POLICY_HEADERS: [&str; 12] = [
    "content-security-policy",
    "cross-origin-opener-policy",
    "cross-origin-resource-policy",
    "origin-agent-cluster",
    "referrer-policy",
    "strict-transport-security",
    "x-content-type-options",
    "x-dns-prefetch-control",
    "x-download-options",
    "x-frame-options",
    "x-permitted-cross-domain-policies",
    "x-xss-protection",
];

pub fn assert_policy_headers(response: &Response<Body>) {
    for name in POLICY_HEADERS {
        assert!(
            response.headers().contains_key(name),
            "missing {} on {} response",
            name,
            response.status()
        );
    }
    assert!(!response.headers().contains_key("cross-origin-embedder-policy"));
    assert!(!response.headers().contains_key("x-powered-by"));
}
