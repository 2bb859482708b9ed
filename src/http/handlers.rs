//! Request handlers
//!
//! Each handler validates its inputs, runs the storage call on the blocking
//! pool, and maps the outcome onto a status code:
//!
//! | Outcome                  | Status |
//! |--------------------------|--------|
//! | success with a body      | 200    |
//! | success without a body   | 204    |
//! | bad `expire_in`          | 400    |
//! | `StorageError::NotFound` | 404    |
//! | anything else            | 500    |

use crate::storage::{Storage, StorageError, StorageResult};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, error, trace};

/// Shared handler state.
pub type AppState = Arc<dyn Storage>;

/// Errors a handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid expire_in value: {0:?}")]
    InvalidExpiration(String),

    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Storage(StorageError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::InvalidExpiration(_) => {
                debug!(error = %self, "Rejected request");
                StatusCode::BAD_REQUEST
            }
            ApiError::Storage(_) | ApiError::Task(_) => {
                error!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        status_text(status)
    }
}

/// A bare status response with its reason phrase as the body.
fn status_text(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or_default();
    (status, format!("{}\n", reason)).into_response()
}

/// Runs a storage call off the async workers.
async fn blocking<T, F>(storage: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Storage) -> StorageResult<T> + Send + 'static,
{
    let storage = Arc::clone(storage);
    let result = tokio::task::spawn_blocking(move || op(storage.as_ref())).await?;
    Ok(result?)
}

fn json(value: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        value,
    )
        .into_response()
}

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /keys/:id`
pub async fn get_key(
    State(storage): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    trace!(key = %key, "GET");
    let value = blocking(&storage, move |s| s.get(&key)).await?;
    Ok(json(value))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
}

/// `GET /keys?filter=<glob>`
pub async fn get_keys(
    State(storage): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let filter = params
        .filter
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "*".to_string());

    trace!(filter = %filter, "GET pattern");
    let value = blocking(&storage, move |s| s.get_pattern(&filter)).await?;
    Ok(json(value))
}

#[derive(Debug, Default, Deserialize)]
pub struct PutParams {
    pub expire_in: Option<String>,
}

/// Parses `expire_in` as whole seconds. Absent or empty means no expiration.
pub fn parse_expire_in(raw: Option<&str>) -> Result<Option<Duration>, ApiError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ApiError::InvalidExpiration(raw.to_string())),
    }
}

/// `PUT /keys/:id?expire_in=<secs>`
pub async fn put_key(
    State(storage): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<PutParams>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let expiration = parse_expire_in(params.expire_in.as_deref())?;

    trace!(key = %key, len = body.len(), "PUT");
    blocking(&storage, move |s| s.put(&key, body, expiration)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `HEAD /keys/:id`
pub async fn head_key(
    State(storage): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(&storage, move |s| s.get(&key)).await?;
    Ok(StatusCode::OK)
}

/// `DELETE /keys/:id`
pub async fn delete_key(
    State(storage): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    trace!(key = %key, "DELETE");
    blocking(&storage, move |s| s.delete(&key)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /keys`
pub async fn delete_keys(State(storage): State<AppState>) -> Result<StatusCode, ApiError> {
    blocking(&storage, |s| s.delete_all()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> Response {
    debug!(uri = %uri, "Requested URL not found");
    status_text(StatusCode::NOT_FOUND)
}
