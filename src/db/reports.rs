//! Bulk reads behind the staff reports.
use super::awards::{context_from_row, sponsored_from_row, AWARD_CONTEXT_SQL};
use super::grants::application_from_row;
use super::model::{AwardContext, GrantApplication, SponsoredProgramGrant, SubmittedSummary};
use super::Pool;
use crate::model::ScreeningStatus;
use anyhow::Result;
use sqlx::Row;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct ApplicationRow {
    pub application: GrantApplication,
    pub organization: String,
    pub cycle: String,
}

/// Every submitted application, newest first.
#[instrument(skip_all)]
pub async fn application_rows(pool: &Pool) -> Result<Vec<ApplicationRow>> {
    let rows = sqlx::query(
        "SELECT a.*, o.name AS org_name, c.title AS cycle_title FROM applications a \
         JOIN organizations o ON o.id = a.organization_id \
         JOIN grant_cycles c ON c.id = a.grant_cycle_id \
         ORDER BY a.submission_time DESC, a.id DESC",
    )
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(ApplicationRow {
            application: application_from_row(row)?,
            organization: row.get("org_name"),
            cycle: row.get("cycle_title"),
        });
    }
    Ok(out)
}

/// A giving-project assignment with its screening status and award, if any.
#[derive(Debug, Clone)]
pub struct ProjectLink {
    pub application_id: i64,
    pub project: String,
    pub screening_status: Option<ScreeningStatus>,
    pub award_amount: Option<i64>,
}

#[instrument(skip_all)]
pub async fn project_links(pool: &Pool) -> Result<Vec<ProjectLink>> {
    let rows = sqlx::query(
        "SELECT pa.application_id, pa.screening_status, gp.title, g.amount FROM project_apps pa \
         JOIN giving_projects gp ON gp.id = pa.giving_project_id \
         LEFT JOIN gp_grants g ON g.projectapp_id = pa.id \
         ORDER BY pa.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ProjectLink {
            application_id: row.get("application_id"),
            project: row.get("title"),
            screening_status: row
                .get::<Option<i64>, _>("screening_status")
                .and_then(ScreeningStatus::from_code),
            award_amount: row.get("amount"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn all_awards(pool: &Pool) -> Result<Vec<AwardContext>> {
    let sql = format!("{AWARD_CONTEXT_SQL} ORDER BY g.created DESC, g.id DESC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(context_from_row).collect())
}

#[instrument(skip_all)]
pub async fn all_sponsored_grants(pool: &Pool) -> Result<Vec<SponsoredProgramGrant>> {
    let rows = sqlx::query("SELECT * FROM sponsored_grants ORDER BY entered DESC, id DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(sponsored_from_row).collect())
}

/// Submitted applications keyed by organization id.
#[instrument(skip_all)]
pub async fn submitted_by_org(pool: &Pool) -> Result<Vec<(i64, SubmittedSummary)>> {
    let rows = sqlx::query(
        "SELECT a.id, a.organization_id, a.grant_cycle_id, a.submission_time, c.title FROM applications a \
         JOIN grant_cycles c ON c.id = a.grant_cycle_id \
         ORDER BY a.submission_time DESC, a.id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("organization_id"),
                SubmittedSummary {
                    id: row.get("id"),
                    grant_cycle_id: row.get("grant_cycle_id"),
                    cycle_title: row.get("title"),
                    submission_time: row.get("submission_time"),
                },
            )
        })
        .collect())
}
