//! HTTP handlers, grouped by resource.

pub(crate) mod parameters;
pub(crate) mod reports;
pub(crate) mod requesters;
pub(crate) mod results;
pub(crate) mod samples;
pub(crate) mod staff;

use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;
use crate::AppState;

/// JSON body whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Query string whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Body of `201 Created` responses for plain inserts.
#[derive(Debug, Serialize)]
pub(crate) struct CreatedId {
    pub id: i64,
}

pub(crate) async fn health(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.run(|lab| lab.ping()).await.map_err(|e| {
        tracing::error!(error = %e.message, "health probe failed");
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.message)
    })?;
    Ok(Json(json!({ "status": "ok" })))
}

pub(crate) async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "no such route")
}
