use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use labcert_core::{NewRequester, Requester};

use super::ApiJson;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/requesters", get(list_requesters).post(create_requester))
}

async fn list_requesters(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<Requester>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_requesters(&caller)).await?))
}

async fn create_requester(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(requester): ApiJson<NewRequester>,
) -> Result<(StatusCode, Json<Requester>), ApiError> {
    let created = state
        .run(move |lab| lab.create_requester(&caller, &requester))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}
