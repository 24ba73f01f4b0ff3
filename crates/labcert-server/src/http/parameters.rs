use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use labcert_core::{Norm, NormInput, ParameterFilter, ParameterInput, ParameterView, SampleType};
use serde::Deserialize;

use super::{ApiJson, ApiPath, ApiQuery, CreatedId};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/parameters", get(list_parameters).post(create_parameter))
        .route("/parameters/types", get(sample_types))
        .route(
            "/parameters/:id",
            axum::routing::put(update_parameter).delete(delete_parameter),
        )
        .route("/parameters/:id/norm", get(get_norm).put(upsert_norm))
}

#[derive(Debug, Default, Deserialize)]
struct ParameterQuery {
    #[serde(rename = "type", default)]
    sample_type: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    sample_id: Option<i64>,
}

impl ParameterQuery {
    fn into_filter(self) -> Result<ParameterFilter, ApiError> {
        let sample_type = match self.sample_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                SampleType::parse(raw)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown sample type '{raw}'")))?,
            ),
        };
        Ok(ParameterFilter {
            sample_type,
            text: self.q.filter(|q| !q.trim().is_empty()),
            sample_id: self.sample_id,
        })
    }
}

async fn list_parameters(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(query): ApiQuery<ParameterQuery>,
) -> Result<Json<Vec<ParameterView>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(
        state
            .run(move |lab| lab.list_parameters(&caller, &filter))
            .await?,
    ))
}

async fn sample_types(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<SampleType>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.sample_types(&caller)).await?))
}

async fn create_parameter(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(input): ApiJson<ParameterInput>,
) -> Result<(StatusCode, Json<CreatedId>), ApiError> {
    let id = state
        .run(move |lab| lab.create_parameter(&caller, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedId { id })))
}

async fn update_parameter(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<ParameterInput>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |lab| lab.update_parameter(&caller, id, &input))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_parameter(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |lab| lab.delete_parameter(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_norm(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Option<Norm>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.get_norm(&caller, id)).await?))
}

async fn upsert_norm(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<NormInput>,
) -> Result<Json<Norm>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.upsert_norm(&caller, id, &input))
            .await?,
    ))
}
