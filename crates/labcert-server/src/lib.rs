//! HTTP API for the lab certification workflow.
//!
//! A thin axum layer over [`labcert_core::Lab`]. Handlers authenticate the
//! bearer token, then run the synchronous core call on the blocking pool so
//! report rendering never stalls the accept loop.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
mod request_tracing;

pub use auth::{AuthUser, Claims, TokenCodec, TokenError};
pub use config::{ApiConfig, ConfigError};
pub use error::ApiError;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{middleware, Router};
use labcert_core::{Lab, LabResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub lab: Arc<Lab>,
    pub tokens: Arc<TokenCodec>,
    pub api: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(lab: Lab, api: ApiConfig) -> Self {
        let tokens = TokenCodec::new(api.token_secret.as_bytes(), api.token_ttl_secs);
        Self {
            lab: Arc::new(lab),
            tokens: Arc::new(tokens),
            api: Arc::new(api),
        }
    }

    /// Run a core operation on the blocking pool, inside the current span.
    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Lab) -> LabResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let lab = Arc::clone(&self.lab);
        let span = tracing::Span::current();
        let result = tokio::task::spawn_blocking(move || span.in_scope(|| op(&lab))).await?;
        result.map_err(ApiError::from)
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_body = state.api.max_upload_bytes;
    Router::new()
        .route("/health", get(http::health))
        .merge(http::samples::routes())
        .merge(http::results::routes())
        .merge(http::reports::routes())
        .merge(http::parameters::routes())
        .merge(http::requesters::routes())
        .merge(http::staff::routes())
        .fallback(http::not_found)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_tracing::request_tracing_middleware,
        ))
        .with_state(state)
}
