use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use labcert_core::{
    Assignment, CreatedReport, LatestResult, ParameterView, RegisteredSample, Sample,
    SampleRegistration, SampleWithAssignee, SampleWithReport,
};
use serde::Deserialize;

use super::{ApiJson, ApiPath};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/samples", post(register_sample))
        .route("/samples/pending", get(list_pending))
        .route("/samples/in-analysis", get(list_in_analysis))
        .route("/samples/awaiting-validation", get(list_awaiting_validation))
        .route("/samples/validated", get(list_validated))
        .route("/samples/assigned", get(list_assigned))
        .route("/samples/:id", get(get_sample).delete(retire_sample))
        .route("/samples/:id/assign", post(assign_evaluator))
        .route("/samples/:id/assignments", get(assignment_history))
        .route(
            "/samples/:id/parameters",
            get(parameters_for).put(assign_parameters),
        )
        .route("/samples/:id/tests", get(latest_results))
        .route("/samples/:id/complete", post(complete_evaluation))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    evaluator_id: i64,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParameterSelection {
    parameter_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    fit_for_consumption: bool,
}

async fn register_sample(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(form): ApiJson<SampleRegistration>,
) -> Result<(StatusCode, Json<RegisteredSample>), ApiError> {
    let registered = state
        .run(move |lab| lab.register_sample(&caller, &form))
        .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn list_pending(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<Sample>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_pending(&caller)).await?))
}

async fn list_in_analysis(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<SampleWithAssignee>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_in_analysis(&caller)).await?))
}

async fn list_awaiting_validation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<Sample>>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.list_awaiting_validation(&caller))
            .await?,
    ))
}

async fn list_validated(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<SampleWithReport>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_validated(&caller)).await?))
}

async fn list_assigned(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<SampleWithAssignee>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_assigned_to_me(&caller)).await?))
}

async fn get_sample(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Sample>, ApiError> {
    Ok(Json(state.run(move |lab| lab.get_sample(&caller, id)).await?))
}

async fn retire_sample(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state.run(move |lab| lab.retire(&caller, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_evaluator(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> Result<Json<Assignment>, ApiError> {
    let assignment = state
        .run(move |lab| {
            lab.assign_evaluator(&caller, id, body.evaluator_id, body.comment.as_deref())
        })
        .await?;
    Ok(Json(assignment))
}

async fn assignment_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<Assignment>>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.assignment_history(&caller, id))
            .await?,
    ))
}

async fn parameters_for(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<ParameterView>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.parameters_for(&caller, id)).await?))
}

async fn assign_parameters(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ParameterSelection>,
) -> Result<Json<Vec<ParameterView>>, ApiError> {
    let views = state
        .run(move |lab| lab.assign_parameters(&caller, id, &body.parameter_ids))
        .await?;
    Ok(Json(views))
}

async fn latest_results(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<LatestResult>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.latest_results(&caller, id)).await?))
}

async fn complete_evaluation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<CompleteRequest>,
) -> Result<(StatusCode, Json<CreatedReport>), ApiError> {
    let created = state
        .run(move |lab| lab.complete_evaluation(&caller, id, body.fit_for_consumption))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}
