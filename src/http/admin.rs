//! Staff routes. Every handler takes the `Staff` guard.
use super::error::{AppError, AppResult};
use super::session::Staff;
use super::AppState;
use crate::db::accounts;
use crate::forms::{self, FormData};
use crate::fund::registration;
use crate::grants::{admin, awards};
use crate::reports::{self, ReportRequest};
use crate::scoring;
use axum::extract::{Form, Path, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

type FormMap = Form<HashMap<String, String>>;

const SUCCESS: &str = "success";

fn required_id(form: &FormData, field: &str) -> AppResult<i64> {
    match forms::parse_int(&form.text(field)) {
        Ok(Some(id)) => Ok(id),
        _ => {
            let mut errors = forms::FieldErrors::new();
            errors.add(field, forms::REQUIRED);
            Err(AppError::Invalid(errors))
        }
    }
}

pub async fn membership_handler(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(ship_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    let form = FormData::new(form);
    registration::update_membership(
        &state.pool,
        &state.config,
        ship_id,
        form.flag("approved"),
        form.flag("leader"),
    )
    .await?;
    info!(staff = %staff.email, ship_id, "membership updated");
    Ok(SUCCESS)
}

pub async fn activate_handler(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(account_id): Path<i64>,
) -> AppResult<&'static str> {
    accounts::get_account(&state.pool, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;
    accounts::set_account_active(&state.pool, account_id, true).await?;
    info!(staff = %staff.email, account_id, "account activated");
    Ok(SUCCESS)
}

pub async fn update_app_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(app_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    admin::update_application(&state.pool, app_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn revert_handler(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(app_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let draft_id = admin::revert(&state.pool, app_id, &staff.email).await?;
    Ok(Json(json!({ "draft_id": draft_id })))
}

pub async fn rollover_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(app_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let cycle_id = required_id(&FormData::new(form), "cycle")?;
    let new_id = admin::rollover(&state.pool, &state.store, app_id, cycle_id).await?;
    Ok(Json(json!({ "application_id": new_id })))
}

pub async fn assign_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(app_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let project_id = required_id(&FormData::new(form), "giving_project")?;
    let id = admin::assign(&state.pool, app_id, project_id).await?;
    Ok(Json(json!({ "projectapp_id": id })))
}

pub async fn ratings_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(app_id): Path<i64>,
) -> AppResult<Json<Vec<scoring::RatingRow>>> {
    Ok(Json(scoring::ratings(&state.pool, app_id).await?))
}

pub async fn extend_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(draft_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    admin::extend_draft(&state.pool, draft_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn screening_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(projectapp_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    admin::set_project_screening(&state.pool, projectapp_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn create_award_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(projectapp_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let id = awards::create_award(&state.pool, projectapp_id, &FormData::new(form)).await?;
    Ok(Json(json!({ "award_id": id })))
}

pub async fn update_award_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(award_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    awards::update_award(&state.pool, award_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn sponsored_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(org_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let id = awards::create_sponsored(&state.pool, org_id, &FormData::new(form)).await?;
    Ok(Json(json!({ "sponsored_id": id })))
}

pub async fn logs_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(org_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let logs = admin::logs(&state.pool, org_id).await?;
    Ok(Json(json!({ "logs": logs })))
}

pub async fn add_log_handler(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(org_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let id = admin::add_log(&state.pool, staff.id, org_id, &FormData::new(form)).await?;
    Ok(Json(json!({ "log_id": id })))
}

pub async fn save_draft_handler(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path((org_id, cycle_id)): Path<(i64, i64)>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    admin::save_draft(&state.pool, org_id, cycle_id, &FormData::new(form), &staff.email).await?;
    Ok(SUCCESS)
}

pub async fn report_visible_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Path(report_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    let visible = FormData::new(form).flag("visible");
    awards::set_report_visible(&state.pool, report_id, visible).await?;
    Ok(SUCCESS)
}

pub async fn report_handler(
    State(state): State<AppState>,
    _staff: Staff,
    Json(req): Json<ReportRequest>,
) -> AppResult<Response> {
    let report = reports::run(&state.pool, &req).await?;
    let mut response = ([(header::CONTENT_TYPE, report.content_type)], report.body).into_response();
    if let Some(name) = &report.filename {
        let value = HeaderValue::from_str(&format!("attachment; filename={name}"))
            .map_err(|err| AppError::Internal(err.into()))?;
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
