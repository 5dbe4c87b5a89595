//! Scheduled jobs, triggered by an external scheduler hitting these routes.
use super::error::{AppError, AppResult};
use super::AppState;
use crate::fund::cron as fund_cron;
use crate::grants::{awards, drafts};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use tracing::{info, warn};

pub const SECRET_HEADER: &str = "x-cron-secret";

fn check_secret(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let secret = &state.config.cron.secret;
    if secret.is_empty() {
        return Ok(());
    }
    let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if given == Some(secret.as_str()) {
        Ok(())
    } else {
        warn!("cron request with bad secret");
        Err(AppError::Forbidden)
    }
}

pub async fn overdue_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    check_secret(&state, &headers)?;
    let sent = fund_cron::email_overdue(&state.pool, &state.config, Utc::now().date_naive()).await?;
    info!(sent, "overdue step emails queued");
    Ok(StatusCode::OK)
}

pub async fn new_accounts_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    check_secret(&state, &headers)?;
    let sent = fund_cron::new_accounts(&state.pool, &state.config).await?;
    info!(sent, "pending account emails queued");
    Ok(StatusCode::OK)
}

pub async fn gifts_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    check_secret(&state, &headers)?;
    let sent = fund_cron::gift_notify(&state.pool, &state.config).await?;
    info!(sent, "gift notifications queued");
    Ok(StatusCode::OK)
}

pub async fn draft_warning_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    check_secret(&state, &headers)?;
    let sent = drafts::draft_warnings(&state.pool, &state.config, Utc::now()).await?;
    info!(sent, "draft warnings queued");
    Ok(StatusCode::OK)
}

pub async fn yer_reminder_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    check_secret(&state, &headers)?;
    let sent = awards::yer_reminders(&state.pool, &state.config, Utc::now().date_naive()).await?;
    info!(sent, "year-end report reminders queued");
    Ok(StatusCode::OK)
}
