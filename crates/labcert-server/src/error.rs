//! API error type and its JSON rendering.
//!
//! Handlers return [`ApiError`]; the response carries an [`ErrorPayload`]
//! extension that the request-tracing middleware turns into the final body,
//! adding the request id and hiding internal messages unless diagnostics are
//! enabled.

use axum::extract::rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use labcert_core::LabError;
use serde_json::json;

/// Message shown for 5xx errors when diagnostics are off.
pub const GENERIC_INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// Error details attached to a response for the tracing middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    fn from_rejection(status: StatusCode, text: String) -> Self {
        let code = match status {
            StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
            s if s.is_server_error() => "internal_error",
            _ => "validation_error",
        };
        Self::new(status, code, text)
    }
}

impl From<LabError> for ApiError {
    fn from(e: LabError) -> Self {
        let (status, code) = match &e {
            LabError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            LabError::Authentication(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            LabError::Authorization(_) => (StatusCode::FORBIDDEN, "forbidden"),
            LabError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            LabError::Reference(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unknown_reference"),
            LabError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            LabError::Precondition(_) => (StatusCode::CONFLICT, "precondition_failed"),
            LabError::Rendering(_) => (StatusCode::INTERNAL_SERVER_ERROR, "rendering_failed"),
            LabError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::from_rejection(rejection.status(), rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::internal(format!("worker task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = error_body(self.code, &self.message, None);
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorPayload {
            code: self.code,
            message: self.message,
        });
        response
    }
}

/// The `{"error": {...}}` envelope.
pub fn error_body(code: &str, message: &str, request_id: Option<&str>) -> serde_json::Value {
    json!({
        "error": {
            "code": code,
            "message": message,
            "request_id": request_id,
        }
    })
}
