//! HTTP handlers for the measurement server
//!
//! Every handler shares one [`StreamAccountant`] through [`ServerState`].
//! Streaming responses are marked uncacheable so repeated requests during a
//! test always reach the server.

use super::accountant::{unix_timestamp, StreamAccountant};
use super::download::{fixed_download_stream, ThrottledDownloadProducer};
use super::upload::{UploadConsumer, UploadReceipt};
use crate::error::AppError;
use crate::logging::StreamLogger;
use crate::models::ServerConfig;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Header carrying the client's upload stream identifier
pub const STREAM_ID_HEADER: &str = "x-stream-id";

const NO_STORE: &str = "no-cache, no-store, must-revalidate";
const FEATURES: [&str; 3] = ["bufferbloat", "download_speed", "upload_speed"];

/// State passed to all handlers
#[derive(Debug, Clone)]
pub struct ServerState {
    pub accountant: Arc<StreamAccountant>,
    pub config: Arc<ServerConfig>,
    pub logger: StreamLogger,
    /// Cancelled when the server starts shutting down; open bodies end on it
    pub shutdown: CancellationToken,
}

fn no_store_headers(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
}

/// `GET /api/ping-light`: four bytes, nothing else
pub async fn ping_light() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain")], "pong")
}

/// `GET /api/ping`
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "pong", "timestamp": unix_timestamp() }))
}

/// `GET /api/download/throttled`: unbounded, paced, ends when the client goes away
pub async fn download_throttled(State(state): State<ServerState>) -> Response {
    let producer = ThrottledDownloadProducer::start(
        Arc::clone(&state.accountant),
        &state.config,
        state.logger.clone(),
    );
    let stream_type = format!("throttled-{}mbps", state.config.download_rate_mbps());

    let mut response = Body::from_stream(producer.into_stream(state.shutdown.clone())).into_response();
    let headers = response.headers_mut();
    no_store_headers(headers);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&stream_type) {
        headers.insert(HeaderName::from_static("x-stream-type"), value);
    }
    response
}

/// `GET /api/download/{megabytes}`: exact-size payload, paced only when a
/// download cap is configured
pub async fn download_fixed(
    State(state): State<ServerState>,
    Path(megabytes): Path<u64>,
) -> Result<Response, AppError> {
    if megabytes > state.config.max_fixed_download_mb {
        return Err(AppError::validation(format!(
            "Requested {} MB exceeds the {} MB limit",
            megabytes, state.config.max_fixed_download_mb
        )));
    }

    let length = megabytes
        .checked_mul(crate::defaults::BYTES_PER_MIB)
        .ok_or_else(|| AppError::validation(format!("Requested {} MB is too large", megabytes)))?;
    let body = fixed_download_stream(megabytes, state.config.download_cap(), state.shutdown.clone());
    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    no_store_headers(headers);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// `POST /api/upload`
pub async fn upload(State(state): State<ServerState>, headers: HeaderMap, body: Body) -> Json<UploadReceipt> {
    let stream_id = headers.get(STREAM_ID_HEADER).and_then(|v| v.to_str().ok());
    let mut consumer = UploadConsumer::new(&state.accountant, &state.logger, state.config.upload_read_size)
        .with_shutdown(state.shutdown.clone());
    if let (Some(mbps), Some(limiter)) = (state.config.max_upload_mbps, state.config.upload_cap()) {
        consumer = consumer.with_cap(mbps, limiter);
    }
    Json(consumer.consume(body.into_data_stream(), stream_id).await)
}

/// `GET /api/config`: the limits clients should expect from this server
pub async fn server_config(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "max_download_mbps": state.config.max_download_mbps,
        "max_upload_mbps": state.config.max_upload_mbps,
        "throttled_download_mbps": state.config.download_rate_mbps(),
        "max_fixed_download_mb": state.config.max_fixed_download_mb,
        "timestamp": unix_timestamp(),
    }))
}

/// `GET /api/stats`
pub async fn stats(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.accountant.snapshot();
    state.logger.stats_served(
        snapshot.download_speed_mbps,
        snapshot.upload_speed_mbps,
        snapshot.streams_active,
    );
    ([(CACHE_CONTROL, NO_STORE)], Json(snapshot))
}

/// `POST /api/stats/reset`
pub async fn reset_stats(State(state): State<ServerState>) -> Json<Value> {
    let previous = state.accountant.reset();
    state.logger.stats_reset(previous);
    Json(json!({ "status": "reset", "timestamp": unix_timestamp() }))
}

/// `GET /health` and `GET /api/health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "features": FEATURES,
        "timestamp": unix_timestamp(),
    }))
}

/// `GET /api/version`
pub async fn version() -> Json<Value> {
    Json(json!({
        "name": crate::PKG_NAME,
        "version": crate::VERSION,
        "status": "enhanced-speed-testing-enabled",
        "features": FEATURES,
        "timestamp": unix_timestamp(),
    }))
}

/// `GET /api/debug`: version plus the raw accounting state
pub async fn debug(State(state): State<ServerState>) -> Json<Value> {
    let snapshot = state.accountant.snapshot();
    Json(json!({
        "version": crate::VERSION,
        "features": ["bufferbloat-testing", "download-speed", "upload-speed"],
        "timestamp": snapshot.timestamp,
        "epoch": state.accountant.epoch(),
        "download_stats": {
            "total_bytes": snapshot.download_bytes,
            "streams_active": snapshot.streams_active,
            "elapsed": snapshot.download_elapsed,
        },
        "upload_stats": {
            "total_bytes": snapshot.upload_bytes,
            "elapsed": snapshot.upload_elapsed,
        },
        "config": {
            "download_rate_bps": state.config.download_rate_bps,
            "download_chunk_size": state.config.download_chunk_size,
            "upload_read_size": state.config.upload_read_size,
            "max_fixed_download_mb": state.config.max_fixed_download_mb,
            "max_download_mbps": state.config.max_download_mbps,
            "max_upload_mbps": state.config.max_upload_mbps,
        },
    }))
}

/// `GET /favicon.ico`
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}
