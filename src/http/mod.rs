//! JSON HTTP surface: router, shared state and request tracing.
//!
//! Form posts arrive as `application/x-www-form-urlencoded`, uploads as
//! `multipart/form-data`; everything answers JSON except file downloads
//! and staff reports.

pub mod admin;
pub mod cron;
pub mod error;
pub mod fund;
pub mod grants;
pub mod session;

use crate::config::Config;
use crate::db::Pool;
use crate::mail::Mailer;
use crate::storage::{FileStore, StoredFile};
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;

/// Request body cap, sized for document and photo uploads.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub store: FileStore,
    pub mailer: Arc<dyn Mailer>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(pool: Pool, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        let store = FileStore::new(config.files_dir());
        Self {
            pool,
            config: Arc::new(config),
            store,
            mailer,
            client: reqwest::Client::new(),
        }
    }
}

async fn request_tracing(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let span = tracing::info_span!("http.request", method = %method, route = %route);
    let response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| tracing::debug!(status = response.status().as_u16(), "response"));
    response
}

/// Login answer: the session cookie plus where to go next.
pub(crate) fn logged_in(token: &str, next: &str) -> Response {
    (
        [(header::SET_COOKIE, session::set_cookie(token))],
        Json(json!({ "redirect": next })),
    )
        .into_response()
}

/// Streams a stored upload back under its original name.
pub(crate) fn download(file: StoredFile) -> Response {
    let name = file.filename.replace('"', "");
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        file.bytes,
    )
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/logout", post(fund::logout_handler))
        // fund
        .route("/fund/login", post(fund::login_handler))
        .route("/fund/register", post(fund::register_handler))
        .route("/fund/registered", get(fund::registered_handler))
        .route(
            "/fund/projects",
            get(fund::projects_handler).post(fund::add_project_handler),
        )
        .route("/fund/set-current/:ship_id", get(fund::set_current_handler))
        .route("/fund/not-member", get(fund::not_member_handler))
        .route("/fund/pending", get(fund::pending_handler))
        .route("/fund/support", get(fund::support_handler))
        .route("/fund/", get(fund::home_handler))
        .route("/fund/gp", get(fund::project_handler))
        .route("/fund/grants", get(fund::grants_handler))
        .route("/fund/add-contacts", post(fund::add_contacts_handler))
        .route(
            "/fund/add-estimates",
            get(fund::estimates_handler).post(fund::add_estimates_handler),
        )
        .route(
            "/fund/stepmult",
            get(fund::mass_step_form_handler).post(fund::mass_step_handler),
        )
        .route("/fund/:donor_id/edit", post(fund::edit_donor_handler))
        .route("/fund/:donor_id/delete", post(fund::delete_donor_handler))
        .route("/fund/:donor_id/step", post(fund::add_step_handler))
        .route("/fund/:donor_id/:step_id", post(fund::edit_step_handler))
        .route(
            "/fund/:donor_id/:step_id/done",
            get(fund::step_done_form_handler).post(fund::step_done_handler),
        )
        // grant applications
        .route("/apply/login", post(grants::login_handler))
        .route("/apply/register", post(grants::register_handler))
        .route("/apply/", get(grants::home_handler))
        .route("/apply/support", get(grants::support_handler))
        .route("/apply/info/:cycle_id", get(grants::info_handler))
        .route("/apply/copy", post(grants::copy_handler))
        .route("/apply/discard/:draft_id", post(grants::discard_handler))
        .route(
            "/apply/:id",
            get(grants::apply_handler).post(grants::submit_handler),
        )
        .route("/apply/:id/autosave", post(grants::autosave_handler))
        .route("/apply/:id/add-file", post(grants::add_file_handler))
        .route("/apply/:id/remove/:file_field", post(grants::remove_file_handler))
        .route("/grants/view/:app_id", get(grants::view_handler))
        .route(
            "/grants/view-file/:app_id/:file_field",
            get(grants::view_file_handler),
        )
        .route(
            "/grants/draft-file/:draft_id/:file_field",
            get(grants::draft_file_handler),
        )
        .route(
            "/report/:award_id",
            get(grants::yer_handler).post(grants::yer_submit_handler),
        )
        .route("/report/:award_id/autosave", post(grants::yer_autosave_handler))
        .route("/report/:award_id/add-file", post(grants::yer_add_file_handler))
        .route("/report/view/:report_id", get(grants::yer_view_handler))
        .route(
            "/report/view/:report_id/:file_field",
            get(grants::yer_file_handler),
        )
        .route(
            "/scoring/:app_id",
            get(grants::scoring_handler).post(grants::scoring_save_handler),
        )
        // staff
        .route(
            "/admin/fund/memberships/:ship_id",
            post(admin::membership_handler),
        )
        .route("/admin/accounts/:account_id/activate", post(admin::activate_handler))
        .route("/admin/grants/apps/:app_id", post(admin::update_app_handler))
        .route("/admin/grants/apps/:app_id/revert", post(admin::revert_handler))
        .route("/admin/grants/apps/:app_id/rollover", post(admin::rollover_handler))
        .route("/admin/grants/apps/:app_id/assign", post(admin::assign_handler))
        .route("/admin/grants/apps/:app_id/ratings", get(admin::ratings_handler))
        .route("/admin/grants/drafts/:draft_id/extend", post(admin::extend_handler))
        .route(
            "/admin/grants/project-apps/:projectapp_id/screening",
            post(admin::screening_handler),
        )
        .route(
            "/admin/grants/project-apps/:projectapp_id/award",
            post(admin::create_award_handler),
        )
        .route("/admin/grants/awards/:award_id", post(admin::update_award_handler))
        .route(
            "/admin/grants/orgs/:org_id/sponsored",
            post(admin::sponsored_handler),
        )
        .route(
            "/admin/grants/orgs/:org_id/logs",
            get(admin::logs_handler).post(admin::add_log_handler),
        )
        .route(
            "/admin/grants/orgs/:org_id/drafts/:cycle_id",
            post(admin::save_draft_handler),
        )
        .route(
            "/admin/grants/year-end-reports/:report_id/visible",
            post(admin::report_visible_handler),
        )
        .route("/admin/grants/report", post(admin::report_handler))
        // cron
        .route("/cron/fund/overdue", get(cron::overdue_handler))
        .route("/cron/fund/new-accounts", get(cron::new_accounts_handler))
        .route("/cron/fund/gifts", get(cron::gifts_handler))
        .route("/cron/grants/draft-warning", get(cron::draft_warning_handler))
        .route("/cron/grants/yer-reminder", get(cron::yer_reminder_handler))
        .layer(from_fn(request_tracing))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
