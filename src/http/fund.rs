//! Fundraising routes for giving-project members.
use super::error::{AppError, AppResult};
use super::session::{clear_cookie, FundMember, FundUser, Session};
use super::{logged_in, AppState};
use crate::auth;
use crate::db::grants as grants_repo;
use crate::forms::FormData;
use crate::fund::registration::{self, RegisteredOutcome};
use crate::fund::{donors, steps};
use axum::extract::{Form, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

type FormMap = Form<HashMap<String, String>>;

const SUCCESS: &str = "success";

pub async fn logout_handler(State(state): State<AppState>, session: Session) -> AppResult<Response> {
    if let Some(token) = &session.token {
        auth::logout(&state.pool, token).await?;
    }
    Ok(([(header::SET_COOKIE, clear_cookie())], Json(json!({ "redirect": "/" }))).into_response())
}

pub async fn login_handler(State(state): State<AppState>, Form(form): FormMap) -> AppResult<Response> {
    let form = FormData::new(form);
    let (account, token) =
        registration::login(&state.pool, &form.text("email"), form.raw().get("password").map_or("", String::as_str))
            .await?;
    info!(account_id = account.id, "fund login");
    Ok(logged_in(&token, "/fund/"))
}

pub async fn register_handler(State(state): State<AppState>, Form(form): FormMap) -> AppResult<Response> {
    let parsed = registration::parse_register(&FormData::new(form))?;
    let reg = registration::register(&state.pool, &parsed).await?;
    Ok(logged_in(&reg.token, "/fund/registered"))
}

#[derive(Debug, Deserialize)]
pub struct RegisteredQuery {
    sh: Option<i64>,
}

pub async fn registered_handler(
    State(state): State<AppState>,
    user: FundMember,
    Query(q): Query<RegisteredQuery>,
) -> AppResult<Response> {
    Ok(match registration::registered(&state.pool, &user.member, q.sh).await? {
        RegisteredOutcome::Approved => Redirect::to("/fund/").into_response(),
        RegisteredOutcome::Missing => Redirect::to("/fund/projects").into_response(),
        pending => Json(pending).into_response(),
    })
}

pub async fn projects_handler(State(state): State<AppState>, user: FundMember) -> AppResult<Response> {
    let page = registration::projects(&state.pool, &user.member, Utc::now().date_naive()).await?;
    Ok(Json(page).into_response())
}

pub async fn add_project_handler(
    State(state): State<AppState>,
    user: FundMember,
    Form(form): FormMap,
) -> AppResult<Response> {
    let ship_id = registration::add_project(&state.pool, &user.member, &FormData::new(form)).await?;
    Ok(Redirect::to(&format!("/fund/registered?sh={ship_id}")).into_response())
}

pub async fn set_current_handler(
    State(state): State<AppState>,
    user: FundMember,
    Path(ship_id): Path<i64>,
) -> AppResult<Redirect> {
    if registration::set_current(&state.pool, &user.member, ship_id).await? {
        Ok(Redirect::to("/fund/"))
    } else {
        Ok(Redirect::to("/fund/projects"))
    }
}

pub async fn not_member_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "not_member",
        "support_email": state.config.site.support_email,
    }))
}

pub async fn pending_handler(session: Session) -> AppResult<Json<Value>> {
    let account = session.account.ok_or(AppError::Redirect("/fund/login"))?;
    Ok(Json(json!({ "status": "pending", "email": account.email })))
}

pub async fn support_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "support_email": state.config.site.support_email }))
}

pub async fn home_handler(State(state): State<AppState>, user: FundUser) -> AppResult<Json<donors::HomePage>> {
    let page = donors::home(&state.pool, &user.membership, &user.project, Utc::now()).await?;
    Ok(Json(page))
}

pub async fn project_handler(State(state): State<AppState>, user: FundUser) -> AppResult<Json<donors::ProjectPage>> {
    Ok(Json(donors::project_page(&state.pool, &user.membership, &user.project).await?))
}

pub async fn grants_handler(State(state): State<AppState>, user: FundUser) -> AppResult<Json<Value>> {
    let grants = grants_repo::grant_list_for_project(&state.pool, user.project.id).await?;
    Ok(Json(json!({ "header": user.project.title, "grants": grants })))
}

pub async fn add_contacts_handler(
    State(state): State<AppState>,
    user: FundUser,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    donors::add_contacts(&state.pool, &user.membership, &user.project, &FormData::new(form), Utc::now()).await?;
    Ok(SUCCESS)
}

pub async fn estimates_handler(State(state): State<AppState>, user: FundUser) -> AppResult<Json<Value>> {
    let donors = donors::estimate_candidates(&state.pool, user.membership.id).await?;
    Ok(Json(json!({ "donors": donors })))
}

pub async fn add_estimates_handler(
    State(state): State<AppState>,
    user: FundUser,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    donors::add_estimates(&state.pool, &user.membership, &FormData::new(form), Utc::now()).await?;
    Ok(SUCCESS)
}

pub async fn edit_donor_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path(donor_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    donors::edit_donor(
        &state.pool,
        &user.membership,
        &user.project,
        donor_id,
        &FormData::new(form),
        Utc::now(),
    )
    .await?;
    Ok(SUCCESS)
}

pub async fn delete_donor_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path(donor_id): Path<i64>,
) -> AppResult<&'static str> {
    donors::delete_donor(&state.pool, &user.membership, donor_id, Utc::now()).await?;
    Ok(SUCCESS)
}

pub async fn add_step_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path(donor_id): Path<i64>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    steps::add_step(&state.pool, user.membership.id, donor_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn edit_step_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path((donor_id, step_id)): Path<(i64, i64)>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    steps::edit_step(&state.pool, user.membership.id, donor_id, step_id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}

pub async fn step_done_form_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path((donor_id, step_id)): Path<(i64, i64)>,
) -> AppResult<Json<steps::StepDoneDefaults>> {
    let defaults = steps::completion_defaults(&state.pool, user.membership.id, donor_id, step_id).await?;
    Ok(Json(defaults))
}

pub async fn step_done_handler(
    State(state): State<AppState>,
    user: FundUser,
    Path((donor_id, step_id)): Path<(i64, i64)>,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    steps::complete_step(
        &state.pool,
        user.membership.id,
        donor_id,
        step_id,
        &FormData::new(form),
        Utc::now(),
    )
    .await?;
    Ok(SUCCESS)
}

pub async fn mass_step_form_handler(State(state): State<AppState>, user: FundUser) -> AppResult<Json<Value>> {
    let donors = steps::mass_step_candidates(&state.pool, user.membership.id).await?;
    Ok(Json(json!({ "donors": donors })))
}

pub async fn mass_step_handler(
    State(state): State<AppState>,
    user: FundUser,
    Form(form): FormMap,
) -> AppResult<&'static str> {
    steps::mass_step(&state.pool, user.membership.id, &FormData::new(form)).await?;
    Ok(SUCCESS)
}
