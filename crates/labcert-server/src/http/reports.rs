use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use labcert_core::{CreatedReport, Report, ReportData, ReportSummary, ReviewAction};
use serde::Deserialize;

use super::{ApiJson, ApiPath, ApiQuery};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports).post(create_report))
        .route("/reports/upload", post(upload_report))
        .route("/reports/by-sample/:id", get(reports_for_sample))
        .route("/reports/by-sample/:id/preview", get(preview_report))
        .route("/reports/:id/file", get(report_file))
        .route("/reports/:id/validate", post(validate_report))
}

#[derive(Debug, Deserialize)]
struct CreateReportRequest {
    sample_id: i64,
    fit_for_consumption: bool,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    sample_id: i64,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    action: ReviewAction,
    #[serde(default)]
    comment: Option<String>,
}

async fn list_reports(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<ReportSummary>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.list_reports(&caller)).await?))
}

async fn create_report(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(body): ApiJson<CreateReportRequest>,
) -> Result<(StatusCode, Json<CreatedReport>), ApiError> {
    let created = state
        .run(move |lab| lab.create_report(&caller, body.sample_id, body.fit_for_consumption))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn upload_report(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(query): ApiQuery<UploadQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<CreatedReport>), ApiError> {
    let body = body?;
    let filename = query.filename.unwrap_or_default();
    let created = state
        .run(move |lab| lab.upload_report(&caller, query.sample_id, &body, &filename))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn reports_for_sample(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(sample_id): ApiPath<i64>,
) -> Result<Json<Vec<ReportSummary>>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.reports_for_sample(&caller, sample_id))
            .await?,
    ))
}

async fn preview_report(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(sample_id): ApiPath<i64>,
) -> Result<Json<ReportData>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.preview_report(&caller, sample_id))
            .await?,
    ))
}

async fn report_file(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(report_id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let file = state
        .run(move |lab| lab.report_pdf(&caller, report_id))
        .await?;
    let disposition = format!("inline; filename=\"{}\"", file.filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::HeaderName::from_static("x-content-sha256"), file.sha256),
        ],
        file.content,
    )
        .into_response())
}

async fn validate_report(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(report_id): ApiPath<i64>,
    ApiJson(body): ApiJson<ReviewRequest>,
) -> Result<Json<Report>, ApiError> {
    let report = state
        .run(move |lab| {
            lab.validate_report(&caller, report_id, body.action, body.comment.as_deref())
        })
        .await?;
    Ok(Json(report))
}
