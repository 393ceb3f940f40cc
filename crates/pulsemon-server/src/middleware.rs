//! Ingest middlewares. [`crate::app::build_http_app`] stacks them, outermost
//! first: compress response, decrypt, decompress, trusted subnet, verify
//! hash, sign response.

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use pulsemon_common::compress::{gunzip_limited, gzip, mentions_gzip};
use pulsemon_common::crypto::{self, HASH_BYPASS_HEADER, HASH_HEADER};
use pulsemon_common::REAL_IP_HEADER;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest request or response body the middlewares will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

static HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

async fn read_body(body: Body) -> Result<Bytes, ApiError> {
    to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Read(e.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Replaces an RSA-sealed body with its plaintext. Bodyless requests pass
/// through untouched.
pub async fn decrypt_request(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = state.private_key.clone() else {
        return Ok(next.run(req).await);
    };
    let (mut parts, body) = req.into_parts();
    let sealed = read_body(body).await?;
    if sealed.is_empty() {
        return Ok(next.run(Request::from_parts(parts, Body::empty())).await);
    }
    let plain = crypto::decrypt(&sealed, &key)?;
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plain))).await)
}

/// Inflates gzip request bodies. The inflated size is capped like any other
/// body.
pub async fn decompress_request(req: Request, next: Next) -> Result<Response, ApiError> {
    let gzipped = header_str(req.headers(), header::CONTENT_ENCODING.as_str()).is_some_and(mentions_gzip);
    if !gzipped {
        return Ok(next.run(req).await);
    }
    let (mut parts, body) = req.into_parts();
    let packed = read_body(body).await?;
    let plain = gunzip_limited(&packed, MAX_BODY_BYTES)
        .map_err(|e| ApiError::Malformed(format!("gzip: {e}")))?;
    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plain))).await)
}

/// Rejects agents whose `X-Real-IP` falls outside the trusted subnet.
pub async fn trusted_subnet(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state
        .subnet
        .check(header_str(req.headers(), REAL_IP_HEADER))
        .map_err(ApiError::Rejected)?;
    Ok(next.run(req).await)
}

/// Verifies `HashSHA256` over the plain request body when the server has a
/// key and the client sent a hash. `Hash: none` skips the check.
pub async fn verify_hash(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.key().is_empty() {
        return Ok(next.run(req).await);
    }
    if header_str(req.headers(), HASH_BYPASS_HEADER).is_some_and(|v| v.trim().eq_ignore_ascii_case("none")) {
        return Ok(next.run(req).await);
    }
    let Some(expected) = header_str(req.headers(), HASH_HEADER).map(str::to_owned) else {
        return Ok(next.run(req).await);
    };

    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    crypto::verify(&bytes, &expected, state.key())?;
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Signs the handler's response body. Sits inside compression, so the hash
/// covers the uncompressed bytes.
pub async fn sign_response(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.key().is_empty() {
        return Ok(next.run(req).await);
    }
    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();
    let bytes = read_body(body).await?;
    if let Some(hash) = crypto::sign(&bytes, state.key()) {
        if let Ok(value) = HeaderValue::from_str(&hash) {
            parts.headers.insert(HASH_HEADER_NAME.clone(), value);
        }
    }
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn is_compressible(headers: &HeaderMap) -> bool {
    match header_str(headers, header::CONTENT_TYPE.as_str()) {
        None => true,
        Some(ct) => {
            let ct = ct.trim();
            ct.is_empty() || ct.starts_with("application/json") || ct.starts_with("text/html")
        }
    }
}

/// Gzips JSON and HTML responses for clients that accept it.
pub async fn compress_response(req: Request, next: Next) -> Result<Response, ApiError> {
    let accepts = header_str(req.headers(), header::ACCEPT_ENCODING.as_str()).is_some_and(mentions_gzip);
    let response = next.run(req).await;
    if !accepts || !is_compressible(response.headers()) {
        return Ok(response);
    }
    let (mut parts, body) = response.into_parts();
    let bytes = read_body(body).await?;
    if bytes.is_empty() {
        return Ok(Response::from_parts(parts, Body::empty()));
    }
    let packed = gzip(&bytes).map_err(|e| ApiError::Read(e.to_string()))?;
    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Response::from_parts(parts, Body::from(packed)))
}
