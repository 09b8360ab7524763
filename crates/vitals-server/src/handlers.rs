use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use std::str::FromStr;
use vitals_common::envelope::REAL_IP_HEADER;
use vitals_common::model::{Metric, MetricKind, MetricPayload};
use vitals_storage::StorageError;

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn notify_audit(state: &AppState, metric_ids: Vec<String>, ip: String) {
    if !state.auditor.has_observers() {
        return;
    }

    let auditor = state.auditor.clone();
    tokio::spawn(async move {
        if let Err(e) = auditor.log_event(metric_ids, ip).await {
            tracing::error!(error = %e, "audit notification failed");
        }
    });
}

fn storage_error_response(err: &StorageError) -> Response {
    match err {
        StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "metric not found").into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "error retrieving metric").into_response(),
    }
}

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let Ok(kind) = MetricKind::from_str(&kind) else {
        return (StatusCode::BAD_REQUEST, "incorrect metric type").into_response();
    };

    let metric = match Metric::from_parts(kind, &name, &value) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::warn!(error = %e, "invalid path-form update");
            return (StatusCode::BAD_REQUEST, "incorrect metric value").into_response();
        }
    };

    match state.storage.set_or_update_metric(metric).await {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "",
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "error saving metric");
            (StatusCode::INTERNAL_SERVER_ERROR, "error setting metric").into_response()
        }
    }
}

/// POST /update/
pub async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: MetricPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "error parsing request body");
            return (StatusCode::BAD_REQUEST, "error parsing request body").into_response();
        }
    };

    let metric = match Metric::try_from(payload) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::warn!(error = %e, "invalid metric payload");
            return (StatusCode::BAD_REQUEST, "invalid metric payload").into_response();
        }
    };
    let metric_id = metric.id().to_string();

    if let Err(e) = state.storage.set_or_update_metric(metric).await {
        tracing::error!(error = %e, "error updating metric");
        return (StatusCode::INTERNAL_SERVER_ERROR, "error setting metric").into_response();
    }

    notify_audit(&state, vec![metric_id], client_ip(&headers));

    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], "{}").into_response()
}

/// POST /updates/
pub async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payloads: Vec<MetricPayload> = match serde_json::from_slice(&body) {
        Ok(payloads) => payloads,
        Err(e) => {
            tracing::warn!(error = %e, "error parsing request body");
            return (StatusCode::BAD_REQUEST, "error parsing request body").into_response();
        }
    };

    let mut metrics = Vec::with_capacity(payloads.len());
    for payload in payloads {
        match Metric::try_from(payload) {
            Ok(metric) => metrics.push(metric),
            Err(e) => {
                tracing::warn!(error = %e, "invalid metric in batch");
                return (StatusCode::BAD_REQUEST, "invalid metric payload").into_response();
            }
        }
    }

    let metric_ids: Vec<String> = metrics.iter().map(|m| m.id().to_string()).collect();

    if let Err(e) = state.storage.set_or_update_metric_batch(metrics).await {
        tracing::error!(error = %e, "error updating metric batch");
        return (StatusCode::INTERNAL_SERVER_ERROR, "error setting metric").into_response();
    }

    notify_audit(&state, metric_ids, client_ip(&headers));

    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], "{}").into_response()
}

/// GET /value/{type}/{name}
pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    if MetricKind::from_str(&kind).is_err() {
        return (StatusCode::BAD_REQUEST, "incorrect metric type").into_response();
    }

    match state.storage.get_metric(&name).await {
        Ok(metric) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            metric.value_string(),
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "metric not found").into_response(),
    }
}

/// POST /value/
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: MetricPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "error parsing request body");
            return (StatusCode::BAD_REQUEST, "error parsing request body").into_response();
        }
    };

    if payload.id.is_empty() {
        return (StatusCode::BAD_REQUEST, "metric name is empty").into_response();
    }

    match state.storage.get_metric(&payload.id).await {
        Ok(metric) => Json(MetricPayload::from(&metric)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, metric_id = %payload.id, "error retrieving metric");
            storage_error_response(&e)
        }
    }
}

/// GET /ping
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.storage.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage ping failed").into_response()
        }
    }
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Response {
    let metrics = match state.storage.get_metrics().await {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::error!(error = %e, "error retrieving metrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, "error retrieving metrics")
                .into_response();
        }
    };

    let mut entries: Vec<&Metric> = metrics.values().collect();
    entries.sort_by(|a, b| a.id().cmp(b.id()));

    let mut rows = String::new();
    for metric in entries {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            metric.id(),
            metric.kind(),
            metric.value_string()
        ));
    }

    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n{rows}</table>\n\
         </body>\n</html>\n"
    ))
    .into_response()
}
