//! Request handlers for repository API endpoints

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::errors::{RestError, Result};
use crate::metrics::{HTTP_REQUESTS, HTTP_REQUEST_DURATION, OBJECT_BYTES, OBJECT_OPERATIONS};
use crate::routes::{AppState, Handler, Params};
use crate::storage::{BlobType, ObjectId, ObjectKey, StorageBackend, WriteOutcome};

/// Resolve the request against the route table and run the matched handler
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match state.routes.resolve(&method, &path) {
        Some((handler, params)) => {
            let response = run(handler, &state, &params, request)
                .await
                .unwrap_or_else(IntoResponse::into_response);
            OBJECT_OPERATIONS
                .with_label_values(&[handler.name(), response.status().as_str()])
                .inc();
            response
        }
        None => {
            warn!(method = %method, path = %path, "No route");
            RestError::Unsupported {
                method: method.clone(),
                path,
            }
            .into_response()
        }
    };

    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    HTTP_REQUEST_DURATION.observe(started.elapsed().as_secs_f64());
    response
}

async fn run(handler: Handler, state: &AppState, params: &Params, request: Request) -> Result<Response> {
    let storage = state.storage.as_ref();
    match handler {
        Handler::Metrics => metrics(),
        Handler::CheckConfig => check_object(storage, &ObjectKey::Config).await,
        Handler::GetConfig => get_object(storage, &ObjectKey::Config).await,
        Handler::SaveConfig => save_object(storage, &ObjectKey::Config, request).await,
        Handler::ListBlobs => list_blobs(storage, blob_type(params)?).await,
        Handler::CheckBlob => check_object(storage, &blob_key(params)?).await,
        Handler::GetBlob => get_object(storage, &blob_key(params)?).await,
        Handler::SaveBlob => save_object(storage, &blob_key(params)?, request).await,
        Handler::DeleteBlob => delete_object(storage, &blob_key(params)?).await,
    }
}

/// Unknown types are rejected before the id is looked at
fn blob_type(params: &Params) -> Result<BlobType> {
    params.get("type").unwrap_or_default().parse()
}

fn blob_key(params: &Params) -> Result<ObjectKey> {
    let kind = blob_type(params)?;
    let id = ObjectId::parse(params.get("name").unwrap_or_default())?;
    Ok(ObjectKey::Blob(kind, id))
}

fn declared_length(headers: &HeaderMap) -> Result<Option<u64>> {
    headers
        .get(header::CONTENT_LENGTH)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| RestError::InvalidRequest("invalid Content-Length".to_string()))
        })
        .transpose()
}

fn empty(status: StatusCode) -> Result<Response> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .map_err(|e| RestError::Internal(format!("Failed to build response: {}", e)))
}

/// Prometheus metrics endpoint
fn metrics() -> Result<Response> {
    let text = crate::metrics::render().map_err(|e| {
        error!(error = %e, "Metrics encoding failed");
        RestError::Internal(format!("metrics encoding failed: {}", e))
    })?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(text))
        .map_err(|e| RestError::Internal(format!("Failed to build response: {}", e)))
}

/// HEAD /config, HEAD /{type}/{name}
#[instrument(skip(storage))]
async fn check_object(storage: &dyn StorageBackend, key: &ObjectKey) -> Result<Response> {
    info!(key = %key, "Check object");

    if !storage.exists(key).await? {
        return Err(RestError::NotFound(key.to_string()));
    }
    empty(StatusCode::OK)
}

/// GET /config, GET /{type}/{name}
#[instrument(skip(storage))]
async fn get_object(storage: &dyn StorageBackend, key: &ObjectKey) -> Result<Response> {
    info!(key = %key, "Get object");

    let data = storage.read(key).await.map_err(|e| {
        if !matches!(e, RestError::NotFound(_)) {
            error!(error = %e, "Storage read failed");
        }
        e
    })?;
    OBJECT_BYTES
        .with_label_values(&["read"])
        .inc_by(data.len() as u64);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|e| RestError::Internal(format!("Failed to build response: {}", e)))
}

/// POST /config, POST /{type}/{name}
#[instrument(skip(storage, request))]
async fn save_object(
    storage: &dyn StorageBackend,
    key: &ObjectKey,
    request: Request,
) -> Result<Response> {
    let declared = declared_length(request.headers())?;
    info!(key = %key, declared = ?declared, "Save object");

    let body = request
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();

    let outcome = storage.write(key, body, declared).await.map_err(|e| {
        match &e {
            RestError::Io(_) | RestError::Internal(_) => error!(error = %e, "Storage write failed"),
            _ => warn!(error = %e, "Object rejected"),
        }
        e
    })?;

    if let (WriteOutcome::Created, Some(size)) = (outcome, declared) {
        OBJECT_BYTES.with_label_values(&["written"]).inc_by(size);
    }
    info!(key = %key, outcome = outcome.as_str(), "Object saved");
    empty(StatusCode::OK)
}

/// DELETE /{type}/{name}
#[instrument(skip(storage))]
async fn delete_object(storage: &dyn StorageBackend, key: &ObjectKey) -> Result<Response> {
    info!(key = %key, "Delete object");

    storage.delete(key).await.map_err(|e| {
        if !matches!(e, RestError::NotFound(_)) {
            error!(error = %e, "Storage delete failed");
        }
        e
    })?;
    empty(StatusCode::OK)
}

/// GET /{type}/
#[instrument(skip(storage))]
async fn list_blobs(storage: &dyn StorageBackend, kind: BlobType) -> Result<Response> {
    info!(kind = %kind, "List objects");

    let ids = storage.list(kind).await.map_err(|e| {
        error!(error = %e, "Storage list failed");
        e
    })?;
    let names: Vec<&str> = ids.iter().map(ObjectId::as_str).collect();
    let json = serde_json::to_vec(&names)
        .map_err(|e| RestError::Internal(format!("JSON serialization failed: {}", e)))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .map_err(|e| RestError::Internal(format!("Failed to build response: {}", e)))
}
