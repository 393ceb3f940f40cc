#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use pulsemon_server::app;
use pulsemon_server::config::ServerConfig;
use pulsemon_server::state::AppState;
use pulsemon_storage::MemStorage;
use rsa::RsaPrivateKey;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;

pub struct TestContext {
    pub state: AppState,
    pub app: axum::Router,
}

#[derive(Default)]
pub struct TestOptions {
    pub key: Option<&'static str>,
    pub trusted_subnet: Option<&'static str>,
    pub private_key: Option<RsaPrivateKey>,
}

pub fn build_test_context(options: TestOptions) -> TestContext {
    let config = ServerConfig {
        file_storage_path: None,
        key: options.key.unwrap_or_default().to_string(),
        trusted_subnet: options.trusted_subnet.map(str::to_string),
        ..ServerConfig::default()
    };
    let state = AppState::new(Arc::new(MemStorage::new()), config, options.private_key);
    let app = app::build_http_app(state.clone());
    TestContext { state, app }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn post_empty(app: &axum::Router, uri: &str) -> TestResponse {
    let req = Request::post(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    let req = Request::get(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn post_json(app: &axum::Router, uri: &str, body: Value) -> TestResponse {
    let req = Request::post(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

/// Serves the app on an ephemeral local port.
pub async fn spawn_http(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
