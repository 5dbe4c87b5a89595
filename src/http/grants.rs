//! Routes for applying organizations, application readers and scorers.
use super::error::{AppError, AppResult};
use super::session::{OrgUser, Session};
use super::{download, logged_in, AppState};
use crate::db::grants as grants_repo;
use crate::db::model::Account;
use crate::forms::{self, FieldErrors, FormData};
use crate::grants::registration::{self, OrgRegistration};
use crate::grants::{cycle, drafts, submit, view, yer, WorkflowError};
use crate::model::{FileField, YerFileField};
use crate::scoring;
use axum::extract::{Form, Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

type FormMap = Form<HashMap<String, String>>;

const SUCCESS: &str = "success";
const CLOSED: &str = "closed";

/// A single uploaded file from a multipart form.
struct Upload {
    field: String,
    filename: String,
    bytes: Vec<u8>,
}

fn upload_error(msg: &str) -> AppError {
    let mut errors = FieldErrors::new();
    errors.add("file", msg);
    AppError::Invalid(errors)
}

async fn read_upload(mut multipart: Multipart) -> AppResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| upload_error(&err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| upload_error(&err.body_text()))?;
        return Ok(Upload {
            field: name,
            filename,
            bytes: bytes.to_vec(),
        });
    }
    Err(upload_error(forms::REQUIRED))
}

fn unknown_field() -> AppError {
    AppError::NotFound("file field not found".into())
}

/// Scorers are giving-project members, so they sign in through the fund.
fn member_login(session: Session) -> AppResult<Account> {
    session.account.ok_or(AppError::Redirect("/fund/login"))
}

pub async fn login_handler(State(state): State<AppState>, Form(form): FormMap) -> AppResult<Response> {
    let form = FormData::new(form);
    let password = form.raw().get("password").cloned().unwrap_or_default();
    let (account, token) = registration::login(&state.pool, &form.text("email"), &password).await?;
    registration::organization_for(&state.pool, &account).await?;
    Ok(logged_in(&token, "/apply/"))
}

pub async fn register_handler(State(state): State<AppState>, Form(form): FormMap) -> AppResult<Response> {
    let parsed = registration::parse_register(&FormData::new(form))?;
    Ok(match registration::register(&state.pool, &parsed).await? {
        OrgRegistration::LoggedIn { token, .. } => logged_in(&token, "/apply/"),
        pending => Json(pending).into_response(),
    })
}

pub async fn home_handler(State(state): State<AppState>, user: OrgUser) -> AppResult<Json<cycle::OrgHome>> {
    Ok(Json(cycle::org_home(&state.pool, &user.organization, Utc::now()).await?))
}

pub async fn support_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "support_email": state.config.site.support_email }))
}

pub async fn info_handler(
    State(state): State<AppState>,
    Path(cycle_id): Path<i64>,
) -> AppResult<Json<cycle::InfoPage>> {
    Ok(Json(cycle::info_page(&state.pool, &state.client, cycle_id).await?))
}

pub async fn apply_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(cycle_id): Path<i64>,
) -> AppResult<Json<drafts::ApplyView>> {
    let view = drafts::open_draft(&state.pool, &state.store, &user.organization, cycle_id, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn submit_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(cycle_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let app_id = submit::submit(&state.pool, &state.config, &user.organization, cycle_id, Utc::now()).await?;
    Ok(Json(json!({ "application_id": app_id, "redirect": "/apply/" })))
}

pub async fn autosave_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(cycle_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    match drafts::autosave(&state.pool, user.organization.id, cycle_id, &FormData::new(form), Utc::now()).await {
        Ok(()) => Ok(SUCCESS),
        Err(WorkflowError::Closed) => Ok(CLOSED),
        Err(err) => Err(err.into()),
    }
}

pub async fn add_file_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(draft_id): Path<i64>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let upload = read_upload(multipart).await?;
    let field = FileField::parse(&upload.field).ok_or_else(unknown_field)?;
    let reference = drafts::add_file(
        &state.pool,
        &state.store,
        user.organization.id,
        draft_id,
        field,
        &upload.filename,
        &upload.bytes,
        Utc::now(),
    )
    .await?;
    Ok(Json(json!({ "field": field.as_str(), "reference": reference })))
}

pub async fn remove_file_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path((draft_id, field)): Path<(i64, String)>,
) -> AppResult<&'static str> {
    let field = FileField::parse(&field).ok_or_else(unknown_field)?;
    drafts::remove_file(&state.pool, &state.store, user.organization.id, draft_id, field).await?;
    Ok(SUCCESS)
}

pub async fn copy_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let copy = drafts::parse_copy(&FormData::new(form))?;
    let draft_id = drafts::copy(&state.pool, &state.store, user.organization.id, &copy, Utc::now()).await?;
    Ok(Json(json!({
        "draft_id": draft_id,
        "redirect": format!("/apply/{}", copy.cycle),
    })))
}

pub async fn discard_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(draft_id): Path<i64>,
) -> AppResult<&'static str> {
    drafts::discard(&state.pool, &state.store, user.organization.id, draft_id).await?;
    Ok(SUCCESS)
}

pub async fn view_handler(
    State(state): State<AppState>,
    session: Session,
    Path(app_id): Path<i64>,
) -> AppResult<Json<view::ApplicationView>> {
    Ok(Json(view::application(&state.pool, session.account.as_ref(), app_id).await?))
}

pub async fn view_file_handler(
    State(state): State<AppState>,
    session: Session,
    Path((app_id, field)): Path<(i64, String)>,
) -> AppResult<Response> {
    let field = FileField::parse(&field).ok_or_else(unknown_field)?;
    let file = view::file(&state.pool, &state.store, session.account.as_ref(), app_id, field).await?;
    Ok(download(file))
}

pub async fn draft_file_handler(
    State(state): State<AppState>,
    session: Session,
    Path((draft_id, field)): Path<(i64, String)>,
) -> AppResult<Response> {
    let field = FileField::parse(&field).ok_or_else(unknown_field)?;
    let staff = session.is_staff();
    let org_id = match &session.account {
        Some(account) => grants_repo::find_organization_by_email(&state.pool, &account.email)
            .await?
            .map(|org| org.id),
        None => None,
    };
    let file = drafts::read_file(&state.pool, &state.store, draft_id, field, org_id, staff).await?;
    Ok(download(file))
}

pub async fn yer_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(award_id): Path<i64>,
) -> AppResult<Json<yer::YerView>> {
    Ok(Json(yer::open(&state.pool, &user.organization, award_id).await?))
}

pub async fn yer_submit_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(award_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let report_id = yer::submit(&state.pool, &state.config, &user.organization, award_id, Utc::now()).await?;
    Ok(Json(json!({ "report_id": report_id, "redirect": "/apply/" })))
}

pub async fn yer_autosave_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(award_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    yer::autosave(&state.pool, user.organization.id, award_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn yer_add_file_handler(
    State(state): State<AppState>,
    user: OrgUser,
    Path(award_id): Path<i64>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let upload = read_upload(multipart).await?;
    let field = YerFileField::parse(&upload.field).ok_or_else(unknown_field)?;
    let reference = yer::add_file(
        &state.pool,
        &state.store,
        user.organization.id,
        award_id,
        field,
        &upload.filename,
        &upload.bytes,
    )
    .await?;
    Ok(Json(json!({ "field": field.as_str(), "reference": reference })))
}

pub async fn yer_view_handler(
    State(state): State<AppState>,
    session: Session,
    Path(report_id): Path<i64>,
) -> AppResult<Json<yer::ReportView>> {
    Ok(Json(yer::view(&state.pool, session.account.as_ref(), report_id).await?))
}

pub async fn yer_file_handler(
    State(state): State<AppState>,
    session: Session,
    Path((report_id, field)): Path<(i64, String)>,
) -> AppResult<Response> {
    let field = YerFileField::parse(&field).ok_or_else(unknown_field)?;
    let file = yer::file(&state.pool, &state.store, session.account.as_ref(), report_id, field).await?;
    Ok(download(file))
}

pub async fn scoring_handler(
    State(state): State<AppState>,
    session: Session,
    Path(app_id): Path<i64>,
) -> AppResult<Json<scoring::ScoringPage>> {
    let account = member_login(session)?;
    Ok(Json(scoring::page(&state.pool, &account, app_id).await?))
}

pub async fn scoring_save_handler(
    State(state): State<AppState>,
    session: Session,
    Path(app_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<Json<Value>> {
    let account = member_login(session)?;
    let total = scoring::save(&state.pool, &account, app_id, &FormData::new(form), Utc::now()).await?;
    Ok(Json(json!({ "total": total })))
}
