//! Turning a draft into a submitted application.
use super::application::validate;
use super::WorkflowError;
use crate::config::Config;
use crate::db::grants as repo;
use crate::db::model::Organization;
use crate::db::Pool;
use crate::model::ScreeningStatus;
use crate::{mail, outbox};
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

/// Validates the organization's draft for the cycle and, in one
/// transaction, stores the application, refreshes the organization profile
/// and deletes the draft. Returns the new application id.
#[instrument(skip_all)]
pub async fn submit(
    pool: &Pool,
    cfg: &Config,
    org: &Organization,
    cycle_id: i64,
    now: DateTime<Utc>,
) -> Result<i64, WorkflowError> {
    let cycle = repo::get_cycle(pool, cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("grant cycle"))?;
    if repo::application_exists(pool, org.id, cycle.id).await? {
        return Err(WorkflowError::AlreadyApplied);
    }
    let draft = repo::find_draft(pool, org.id, cycle.id)
        .await?
        .ok_or(WorkflowError::NotFound("draft"))?;
    if !draft.editable(cycle.close, now) {
        return Err(WorkflowError::Closed);
    }

    let data = validate(&draft.contents, &draft.files, &cycle)?;

    let mut tx = pool.begin().await?;
    let app_id =
        repo::insert_application_tx(&mut tx, org.id, cycle.id, now, ScreeningStatus::Received, &data)
            .await?;
    repo::apply_profile_tx(&mut tx, org.id, &data).await?;
    repo::delete_draft_tx(&mut tx, draft.id).await?;
    outbox::queue_email_tx(
        &mut tx,
        &mail::application_submitted(cfg, &org.email, &org.name, &cycle.title),
    )
    .await?;
    tx.commit().await?;

    info!(app_id, org_id = org.id, cycle = %cycle.title, "application submitted");
    Ok(app_id)
}
