//! Recording test results.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use labcert_core::{NewTestResult, Suggestion};
use serde::Deserialize;

use super::{ApiJson, ApiQuery, CreatedId};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/tests", post(record_result))
        .route("/tests/suggest", get(suggest))
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    parameter_id: i64,
    result: String,
}

async fn record_result(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(result): ApiJson<NewTestResult>,
) -> Result<(StatusCode, Json<CreatedId>), ApiError> {
    let id = state
        .run(move |lab| lab.record_result(&caller, &result))
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedId { id })))
}

async fn suggest(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(query): ApiQuery<SuggestQuery>,
) -> Result<Json<Suggestion>, ApiError> {
    let suggestion = state
        .run(move |lab| lab.suggest_within_norm(&caller, query.parameter_id, &query.result))
        .await?;
    Ok(Json(suggestion))
}
