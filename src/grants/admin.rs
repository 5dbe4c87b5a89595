//! Staff operations on applications and drafts.
use super::application::draft_contents;
use super::drafts::{contents_from_form, copy_files, delete_files};
use super::{field_error, WorkflowError, FORM_ERROR};
use crate::db::fund as fund_repo;
use crate::db::grants as repo;
use crate::db::model::ApplicationLog;
use crate::db::Pool;
use crate::forms::{self, FormData};
use crate::model::{FileField, ScreeningStatus};
use crate::storage::FileStore;
use chrono::{DateTime, NaiveTime, Utc};
use tracing::{info, instrument};

pub const ALREADY_SUBMITTED: &str =
    "This organization has already submitted an application to this grant cycle.";
pub const INVALID_CHOICE: &str = "Select a valid choice.";

/// Moves an application back to a draft for the same cycle. Its files move
/// with it. Returns the draft id.
#[instrument(skip_all)]
pub async fn revert(pool: &Pool, app_id: i64, staff: &str) -> Result<i64, WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let contents = draft_contents(&app);
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    repo::delete_application_tx(&mut tx, app.id).await?;
    let draft_id = repo::insert_draft_tx(
        &mut tx,
        app.organization_id,
        app.grant_cycle_id,
        &contents,
        &app.data.files,
        now,
    )
    .await?
    .ok_or_else(|| field_error(FORM_ERROR, "A draft already exists for this grant cycle."))?;
    tx.commit().await?;

    info!(app_id, draft_id, staff, "application reverted to draft");
    Ok(draft_id)
}

/// Copies an application into another cycle as a fresh submission.
/// Returns the new application id.
#[instrument(skip_all)]
pub async fn rollover(
    pool: &Pool,
    store: &FileStore,
    app_id: i64,
    cycle_id: i64,
) -> Result<i64, WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let cycle = repo::get_cycle(pool, cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("grant cycle"))?;
    if repo::application_exists(pool, app.organization_id, cycle.id).await?
        || repo::find_draft(pool, app.organization_id, cycle.id).await?.is_some()
    {
        return Err(field_error("cycle", super::drafts::CYCLE_TAKEN));
    }

    let mut data = app.data.clone();
    data.text.cycle_question.clear();
    data.files = copy_files(store, &app.data.files, &[FileField::Budget]).await;

    let mut tx = pool.begin().await?;
    let new_id = match repo::insert_application_tx(
        &mut tx,
        app.organization_id,
        cycle.id,
        Utc::now(),
        ScreeningStatus::Received,
        &data,
    )
    .await
    {
        Ok(id) => id,
        Err(err) => {
            drop(tx);
            delete_files(store, &data.files).await;
            return Err(err.into());
        }
    };
    tx.commit().await?;
    info!(app_id, new_id, cycle = %cycle.title, "application rolled over");
    Ok(new_id)
}

/// Sets or clears a draft's extended deadline. A bare date extends to the
/// end of that day.
#[instrument(skip_all)]
pub async fn extend_draft(pool: &Pool, draft_id: i64, form: &FormData) -> Result<(), WorkflowError> {
    let draft = repo::get_draft(pool, draft_id)
        .await?
        .ok_or(WorkflowError::NotFound("draft"))?;
    let raw = form.text("extended_deadline");
    let deadline = if raw.is_empty() {
        None
    } else {
        Some(parse_deadline(&raw).ok_or_else(|| {
            field_error("extended_deadline", "Enter a valid date/time.")
        })?)
    };
    repo::set_draft_extension(pool, draft.id, deadline).await?;
    info!(draft_id, ?deadline, "draft deadline extended");
    Ok(())
}

fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
    forms::parse_date(raw).map(|d| d.and_time(end_of_day).and_utc())
}

fn parse_status(form: &FormData, field: &str) -> Result<Option<ScreeningStatus>, WorkflowError> {
    let raw = form.text(field);
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(ScreeningStatus::from_code)
        .map(Some)
        .ok_or_else(|| field_error(field, INVALID_CHOICE))
}

/// Pre-screening status plus scoring bonuses of an application.
#[instrument(skip_all)]
pub async fn update_application(pool: &Pool, app_id: i64, form: &FormData) -> Result<(), WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    match parse_status(form, "pre_screening_status")? {
        Some(status) if status.is_pre_screening() => {
            repo::set_pre_screening(pool, app.id, status).await?;
        }
        Some(_) => return Err(field_error("pre_screening_status", INVALID_CHOICE)),
        None => {}
    }
    repo::set_scoring_bonuses(
        pool,
        app.id,
        form.flag("scoring_bonus_poc"),
        form.flag("scoring_bonus_geo"),
    )
    .await?;
    info!(app_id, "application updated by staff");
    Ok(())
}

/// Assigns an application to a giving project; returns the link id.
#[instrument(skip_all)]
pub async fn assign(pool: &Pool, app_id: i64, project_id: i64) -> Result<i64, WorkflowError> {
    repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    fund_repo::get_project(pool, project_id)
        .await?
        .ok_or(WorkflowError::NotFound("giving project"))?;
    let id = repo::assign_project(pool, app_id, project_id).await?;
    info!(app_id, project_id, projectapp_id = id, "application assigned");
    Ok(id)
}

/// Per-project screening status; only post-pre-screening stages apply.
#[instrument(skip_all)]
pub async fn set_project_screening(
    pool: &Pool,
    projectapp_id: i64,
    form: &FormData,
) -> Result<(), WorkflowError> {
    let link = repo::get_project_app(pool, projectapp_id)
        .await?
        .ok_or(WorkflowError::NotFound("project application"))?;
    let status = parse_status(form, "screening_status")?;
    if status.is_some_and(|s| s.is_pre_screening()) {
        return Err(field_error("screening_status", INVALID_CHOICE));
    }
    repo::set_project_screening(pool, link.id, status).await?;
    Ok(())
}

/// Records a staff contact with an organization.
#[instrument(skip_all)]
pub async fn add_log(
    pool: &Pool,
    staff_id: i64,
    org_id: i64,
    form: &FormData,
) -> Result<i64, WorkflowError> {
    repo::get_organization(pool, org_id)
        .await?
        .ok_or(WorkflowError::NotFound("organization"))?;
    let notes = form.text("notes");
    if notes.is_empty() {
        return Err(field_error("notes", forms::REQUIRED));
    }
    let application_id = match forms::parse_int(&form.text("application")) {
        Ok(Some(id)) => match repo::get_application(pool, id).await? {
            Some(app) if app.organization_id == org_id => Some(app.id),
            _ => return Err(field_error("application", INVALID_CHOICE)),
        },
        Ok(None) => None,
        Err(_) => return Err(field_error("application", INVALID_CHOICE)),
    };
    let id = repo::add_log(pool, org_id, application_id, staff_id, &form.text("contacted"), &notes)
        .await?;
    Ok(id)
}

pub async fn logs(pool: &Pool, org_id: i64) -> anyhow::Result<Vec<ApplicationLog>> {
    repo::logs_for_org(pool, org_id).await
}

/// Staff edit of an organization's draft contents.
#[instrument(skip_all)]
pub async fn save_draft(
    pool: &Pool,
    org_id: i64,
    cycle_id: i64,
    form: &FormData,
    staff: &str,
) -> Result<(), WorkflowError> {
    if repo::application_exists(pool, org_id, cycle_id).await? {
        return Err(field_error(FORM_ERROR, ALREADY_SUBMITTED));
    }
    let draft = repo::find_draft(pool, org_id, cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("draft"))?;
    repo::save_draft_contents(pool, draft.id, &contents_from_form(form), staff, Utc::now()).await?;
    info!(draft_id = draft.id, staff, "draft saved by staff");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn deadlines_accept_dates_and_timestamps() {
        let d = parse_deadline("03/20/2014").unwrap();
        assert_eq!(d.date_naive(), chrono::NaiveDate::from_ymd_opt(2014, 3, 20).unwrap());
        assert_eq!(d.hour(), 23);
        assert_eq!(
            parse_deadline("2014-03-20T17:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2014, 3, 20, 17, 0, 0).unwrap()
        );
        assert_eq!(parse_deadline("soon"), None);
    }

    #[test]
    fn statuses_parse_from_codes() {
        let form = FormData::from_pairs([("pre_screening_status", "50"), ("bad", "55")]);
        assert_eq!(
            parse_status(&form, "pre_screening_status").unwrap(),
            Some(ScreeningStatus::PreScreenedIn)
        );
        assert!(parse_status(&form, "bad").is_err());
        assert_eq!(parse_status(&form, "missing").unwrap(), None);
    }
}
