//! Loopback ingest endpoints for the browser capture script.

use std::collections::HashSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::info;

use packrat_store::{Database, StoreError};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::payload;
use crate::token;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/track-channel", post(track_channel))
        .route("/track-users", post(track_users))
        .route("/track-messages", post(track_messages))
        .route("/get-attachment", get(get_attachment))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            token::require_token,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the ingest endpoints on the loopback interface. Port 0 picks an
/// ephemeral port; the bound address is returned alongside the serve future.
pub async fn listen(
    state: AppState,
    port: u16,
) -> std::io::Result<(SocketAddr, impl Future<Output = std::io::Result<()>>)> {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let addr = listener.local_addr()?;
    let app = build_router(state);
    Ok((addr, async move { axum::serve(listener, app).await }))
}

/// POST bodies must be JSON: a declared non-JSON content type or an
/// unparseable body are both 415.
fn parse_json(headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let is_json = content_type
            .to_str()
            .map(|value| value.trim().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Err(ApiError::NotJson);
        }
    }
    serde_json::from_slice(body).map_err(|_| ApiError::NotJson)
}

async fn track_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let value = parse_json(&headers, &body)?;
    let (server, channel) = payload::parse_track_channel(&value)?;

    let db = state.db.clone();
    task::spawn_blocking(move || -> Result<(), StoreError> {
        db.servers().add(&[server])?;
        db.channels().add(&[channel])
    })
    .await??;

    Ok(StatusCode::OK)
}

async fn track_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let value = parse_json(&headers, &body)?;
    let users = payload::parse_track_users(&value)?;

    let db = state.db.clone();
    task::spawn_blocking(move || db.users().add(&users)).await??;

    Ok(StatusCode::OK)
}

/// Responds `"1"` when at least one submitted message id was not stored
/// before this call, `"0"` otherwise. The capture script uses this to decide
/// whether to keep paging backwards through channel history.
async fn track_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let value = parse_json(&headers, &body)?;
    let messages = payload::parse_track_messages(&value)?;

    let distinct: HashSet<u64> = messages.iter().map(|message| message.id).collect();
    let ids: Vec<u64> = distinct.into_iter().collect();

    let db = state.db.clone();
    let any_new = task::spawn_blocking(move || -> Result<bool, StoreError> {
        let stored = db.messages().count_existing(&ids)?;
        db.messages().add(&messages)?;
        Ok(stored < ids.len() as i64)
    })
    .await??;

    info!(
        submitted = value.as_array().map(Vec::len).unwrap_or(0),
        any_new, "tracked message batch"
    );

    Ok(if any_new { "1" } else { "0" })
}

#[derive(Deserialize)]
struct AttachmentQuery {
    url: String,
}

async fn get_attachment(
    State(state): State<AppState>,
    Query(query): Query<AttachmentQuery>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let blob = task::spawn_blocking(move || db.downloads().get_blob(&query.url)).await??;

    let Some((bytes, mime_type)) = blob else {
        return Err(ApiError::NotFound);
    };

    let mut response = bytes.into_response();
    if let Some(value) = mime_type.and_then(|mime| HeaderValue::from_str(&mime).ok()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
