//! HTTP handlers over the metric store.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::Json;
use pulsemon_common::types::{Metric, MetricKind};
use serde::Deserialize;
use std::fmt::Write;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /value/`.
#[derive(Debug, Deserialize)]
pub struct ValueQuery {
    pub id: String,
    pub mtype: MetricKind,
}

fn parse_kind(kind: &str) -> Result<MetricKind, ApiError> {
    Ok(kind.parse::<MetricKind>()?)
}

fn parse_metric(kind: MetricKind, name: &str, raw: &str) -> Result<Metric, ApiError> {
    let bad_value = || pulsemon_common::error::InvalidMetric::BadValue(raw.to_string());
    match kind {
        MetricKind::Gauge => raw
            .trim()
            .parse::<f64>()
            .map(|v| Metric::gauge(name, v))
            .map_err(|_| bad_value().into()),
        MetricKind::Counter => raw
            .trim()
            .parse::<i64>()
            .map(|d| Metric::counter(name, d))
            .map_err(|_| bad_value().into()),
    }
}

/// `POST /update/{kind}/{name}/{value}`
pub async fn update_by_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    if name.is_empty() {
        return Err(ApiError::NotFound("metric name".into()));
    }
    let kind = parse_kind(&kind)?;
    let metric = parse_metric(kind, &name, &value)?;
    let stored = state.storage.add(&metric).await?;
    Ok(stored.value_text())
}

/// `POST /update/` with a single JSON metric. Echoes the input.
pub async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = serde_json::from_slice(&body)?;
    state.storage.add(&metric).await?;
    Ok(Json(metric))
}

/// `POST /updates/` with a JSON array, applied atomically. Echoes the input.
pub async fn updates_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<Metric>>, ApiError> {
    let metrics: Vec<Metric> = serde_json::from_slice(&body)?;
    state.storage.add_batch(&metrics).await?;
    tracing::debug!(count = metrics.len(), "Batch applied");
    Ok(Json(metrics))
}

/// `POST /value/`
pub async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: ValueQuery = serde_json::from_slice(&body)?;
    state
        .storage
        .get(query.mtype, &query.id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(query.id))
}

/// `GET /value/{kind}/{name}`
pub async fn value_by_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind = parse_kind(&kind)?;
    state
        .storage
        .get(kind, &name)
        .await?
        .map(|m| m.value_text())
        .ok_or(ApiError::NotFound(name))
}

/// `GET /` renders every stored metric as an HTML table.
pub async fn dashboard(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let metrics = state.storage.get_all().await?;
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><title>pulsemon</title></head><body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );
    for m in &metrics {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&m.id),
            m.mtype,
            m.value_text()
        );
    }
    page.push_str("</table>\n</body></html>\n");
    Ok(Html(page))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `GET /ping` checks the database.
pub async fn ping(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.storage.ping().await?;
    Ok(StatusCode::OK)
}
