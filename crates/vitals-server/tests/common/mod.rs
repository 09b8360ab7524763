#![allow(dead_code)]

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;
use vitals_audit::Auditor;
use vitals_server::app::{self, RouterOptions};
use vitals_server::state::AppState;
use vitals_storage::memory::MemoryStorage;

pub struct TestContext {
    pub app: Router,
    pub storage: Arc<MemoryStorage>,
}

pub fn build_context(options: RouterOptions) -> TestContext {
    build_context_with_auditor(options, Auditor::new())
}

pub fn build_context_with_auditor(options: RouterOptions, auditor: Auditor) -> TestContext {
    let storage = Arc::new(MemoryStorage::new());
    let state = AppState {
        storage: storage.clone(),
        auditor: Arc::new(auditor),
    };

    TestContext {
        app: app::build_router(state, options),
        storage,
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body)).expect("request builds");

    let response = app.clone().oneshot(request).await.expect("request sent");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");

    (status, body)
}

pub async fn post(app: &Router, uri: &str) -> (StatusCode, Bytes) {
    send(app, "POST", uri, &[], Vec::new()).await
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Bytes) {
    send(app, "GET", uri, &[], Vec::new()).await
}
