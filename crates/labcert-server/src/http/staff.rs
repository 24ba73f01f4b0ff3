use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use labcert_core::{NewStaffMember, Role, StaffMember};
use serde::Deserialize;

use super::{ApiJson, ApiPath, ApiQuery};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/staff", get(list_staff).post(create_staff))
        .route("/staff/roles", get(staff_roles))
        .route("/staff/:id", put(update_staff).delete(deactivate_staff))
        .route("/staff/:id/activate", post(activate_staff))
}

#[derive(Debug, Deserialize)]
struct StaffQuery {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

/// `?role=` lists active holders of that role; otherwise every account is
/// returned, filtered by `?q=`.
async fn list_staff(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiQuery(query): ApiQuery<StaffQuery>,
) -> Result<Json<Vec<StaffMember>>, ApiError> {
    let role = match query.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Role::parse(raw).ok_or_else(|| ApiError::bad_request(format!("unknown role '{raw}'")))?,
        ),
    };
    let members = match role {
        Some(role) => state.run(move |lab| lab.list_staff(&caller, Some(role))).await?,
        None => {
            state
                .run(move |lab| lab.search_staff(&caller, query.q.as_deref()))
                .await?
        }
    };
    Ok(Json(members))
}

async fn staff_roles(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<Role>>, ApiError> {
    Ok(Json(state.run(move |lab| lab.staff_roles(&caller)).await?))
}

async fn create_staff(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(member): ApiJson<NewStaffMember>,
) -> Result<(StatusCode, Json<StaffMember>), ApiError> {
    let created = state
        .run(move |lab| lab.create_staff(&caller, &member))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_staff(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(member): ApiJson<NewStaffMember>,
) -> Result<Json<StaffMember>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.update_staff(&caller, id, &member))
            .await?,
    ))
}

async fn deactivate_staff(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .run(move |lab| lab.set_staff_active(&caller, id, false))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_staff(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<StaffMember>, ApiError> {
    Ok(Json(
        state
            .run(move |lab| lab.set_staff_active(&caller, id, true))
            .await?,
    ))
}
