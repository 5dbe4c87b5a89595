use super::grants::parse_contents;
use super::model::{
    AwardContext, GivingProjectGrant, SponsoredProgramGrant, YearEndReport, YearEndReportData,
    YerDraft,
};
use super::Pool;
use crate::model::YerFileField;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

fn award_from_row(row: &SqliteRow) -> GivingProjectGrant {
    GivingProjectGrant {
        id: row.get("id"),
        projectapp_id: row.get("projectapp_id"),
        amount: row.get("amount"),
        check_number: row.get("check_number"),
        check_mailed: row.get("check_mailed"),
        agreement_mailed: row.get("agreement_mailed"),
        agreement_returned: row.get("agreement_returned"),
        approved: row.get("approved"),
        created: row.get("created"),
    }
}

pub(crate) fn sponsored_from_row(row: &SqliteRow) -> SponsoredProgramGrant {
    SponsoredProgramGrant {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        amount: row.get("amount"),
        check_number: row.get("check_number"),
        check_mailed: row.get("check_mailed"),
        approved: row.get("approved"),
        entered: row.get("entered"),
        description: row.get("description"),
    }
}

/// Editable columns of a giving-project award.
#[derive(Debug, Clone, Default)]
pub struct AwardFields {
    pub amount: i64,
    pub check_number: Option<i64>,
    pub check_mailed: Option<NaiveDate>,
    pub agreement_mailed: Option<NaiveDate>,
    pub agreement_returned: Option<NaiveDate>,
    pub approved: Option<NaiveDate>,
}

#[instrument(skip_all)]
pub async fn create_award(pool: &Pool, projectapp_id: i64, fields: &AwardFields) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO gp_grants (projectapp_id, amount, check_number, check_mailed, agreement_mailed, agreement_returned, approved, created) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(projectapp_id)
    .bind(fields.amount)
    .bind(fields.check_number)
    .bind(fields.check_mailed)
    .bind(fields.agreement_mailed)
    .bind(fields.agreement_returned)
    .bind(fields.approved)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to create award")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn update_award(pool: &Pool, id: i64, fields: &AwardFields) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE gp_grants SET amount = ?, check_number = ?, check_mailed = ?, agreement_mailed = ?, \
         agreement_returned = ?, approved = ? WHERE id = ?",
    )
    .bind(fields.amount)
    .bind(fields.check_number)
    .bind(fields.check_mailed)
    .bind(fields.agreement_mailed)
    .bind(fields.agreement_returned)
    .bind(fields.approved)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn get_award(pool: &Pool, id: i64) -> Result<Option<GivingProjectGrant>> {
    let row = sqlx::query("SELECT * FROM gp_grants WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(award_from_row))
}

pub(crate) const AWARD_CONTEXT_SQL: &str = "SELECT g.*, a.id AS application_id, o.id AS organization_id, \
     o.name AS org_name, o.email AS org_email, gp.title AS gp_title \
     FROM gp_grants g \
     JOIN project_apps pa ON pa.id = g.projectapp_id \
     JOIN applications a ON a.id = pa.application_id \
     JOIN organizations o ON o.id = a.organization_id \
     JOIN giving_projects gp ON gp.id = pa.giving_project_id";

pub(crate) fn context_from_row(row: &SqliteRow) -> AwardContext {
    AwardContext {
        award: award_from_row(row),
        application_id: row.get("application_id"),
        organization_id: row.get("organization_id"),
        organization: row.get("org_name"),
        org_email: row.get("org_email"),
        giving_project: row.get("gp_title"),
    }
}

#[instrument(skip_all)]
pub async fn award_context(pool: &Pool, award_id: i64) -> Result<Option<AwardContext>> {
    let sql = format!("{AWARD_CONTEXT_SQL} WHERE g.id = ?");
    let row = sqlx::query(&sql)
        .bind(award_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(context_from_row))
}

#[instrument(skip_all)]
pub async fn awards_for_org(pool: &Pool, org_id: i64) -> Result<Vec<AwardContext>> {
    let sql = format!("{AWARD_CONTEXT_SQL} WHERE o.id = ? ORDER BY g.created DESC");
    let rows = sqlx::query(&sql).bind(org_id).fetch_all(pool).await?;
    Ok(rows.iter().map(context_from_row).collect())
}

/// Mailed agreements still waiting for a year-end report.
#[instrument(skip_all)]
pub async fn awards_awaiting_report(pool: &Pool) -> Result<Vec<AwardContext>> {
    let sql = format!(
        "{AWARD_CONTEXT_SQL} WHERE g.agreement_mailed IS NOT NULL \
         AND NOT EXISTS (SELECT 1 FROM year_end_reports r WHERE r.award_id = g.id) ORDER BY g.id"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(context_from_row).collect())
}

#[instrument(skip_all)]
pub async fn create_sponsored_grant(
    pool: &Pool,
    org_id: i64,
    amount: i64,
    check_number: Option<i64>,
    check_mailed: Option<NaiveDate>,
    approved: Option<NaiveDate>,
    description: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO sponsored_grants (organization_id, amount, check_number, check_mailed, approved, entered, description) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(org_id)
    .bind(amount)
    .bind(check_number)
    .bind(check_mailed)
    .bind(approved)
    .bind(Utc::now())
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to create sponsored grant")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn sponsored_grants_for_org(pool: &Pool, org_id: i64) -> Result<Vec<SponsoredProgramGrant>> {
    let rows = sqlx::query("SELECT * FROM sponsored_grants WHERE organization_id = ? ORDER BY entered DESC")
        .bind(org_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(sponsored_from_row).collect())
}

// ---- year-end reports ----

const YER_COLUMNS: [&str; 20] = [
    "email",
    "phone",
    "website",
    "contact_person",
    "summarize_last_year",
    "goal_progress",
    "quantitative_measures",
    "evaluation",
    "achieved",
    "collaboration",
    "new_funding",
    "major_changes",
    "total_size",
    "donations_count",
    "donations_count_prev",
    "photo1",
    "photo2",
    "photo_release",
    "stay_informed",
    "award_id",
];

fn report_from_row(row: &SqliteRow) -> YearEndReport {
    let stay_informed = serde_json::from_str(&row.get::<String, _>("stay_informed"))
        .unwrap_or(Value::Object(Map::new()));
    YearEndReport {
        id: row.get("id"),
        award_id: row.get("award_id"),
        submitted: row.get("submitted"),
        visible: row.get("visible"),
        data: YearEndReportData {
            email: row.get("email"),
            phone: row.get("phone"),
            website: row.get("website"),
            contact_person: row.get("contact_person"),
            summarize_last_year: row.get("summarize_last_year"),
            goal_progress: row.get("goal_progress"),
            quantitative_measures: row.get("quantitative_measures"),
            evaluation: row.get("evaluation"),
            achieved: row.get("achieved"),
            collaboration: row.get("collaboration"),
            new_funding: row.get("new_funding"),
            major_changes: row.get("major_changes"),
            total_size: row.get("total_size"),
            donations_count: row.get("donations_count"),
            donations_count_prev: row.get("donations_count_prev"),
            photo1: row.get("photo1"),
            photo2: row.get("photo2"),
            photo_release: row.get("photo_release"),
            stay_informed,
        },
    }
}

pub async fn insert_report_tx(
    tx: &mut Transaction<'_, Sqlite>,
    award_id: i64,
    data: &YearEndReportData,
    submitted: DateTime<Utc>,
) -> Result<i64> {
    let sql = format!(
        "INSERT INTO year_end_reports (submitted, {}) VALUES (?{}) RETURNING id",
        YER_COLUMNS.join(", "),
        ", ?".repeat(YER_COLUMNS.len())
    );
    let id: i64 = sqlx::query(&sql)
        .bind(submitted)
        .bind(&data.email)
        .bind(&data.phone)
        .bind(&data.website)
        .bind(&data.contact_person)
        .bind(&data.summarize_last_year)
        .bind(&data.goal_progress)
        .bind(&data.quantitative_measures)
        .bind(&data.evaluation)
        .bind(&data.achieved)
        .bind(&data.collaboration)
        .bind(&data.new_funding)
        .bind(&data.major_changes)
        .bind(data.total_size)
        .bind(data.donations_count)
        .bind(data.donations_count_prev)
        .bind(&data.photo1)
        .bind(&data.photo2)
        .bind(&data.photo_release)
        .bind(data.stay_informed.to_string())
        .bind(award_id)
        .fetch_one(&mut **tx)
        .await
        .context("failed to insert year-end report")?
        .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_report(pool: &Pool, id: i64) -> Result<Option<YearEndReport>> {
    let row = sqlx::query("SELECT * FROM year_end_reports WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(report_from_row))
}

#[instrument(skip_all)]
pub async fn report_for_award(pool: &Pool, award_id: i64) -> Result<Option<YearEndReport>> {
    let row = sqlx::query("SELECT * FROM year_end_reports WHERE award_id = ?")
        .bind(award_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(report_from_row))
}

#[instrument(skip_all)]
pub async fn set_report_visible(pool: &Pool, id: i64, visible: bool) -> Result<()> {
    sqlx::query("UPDATE year_end_reports SET visible = ? WHERE id = ?")
        .bind(visible)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---- year-end report drafts ----

fn yer_draft_from_row(row: &SqliteRow) -> YerDraft {
    YerDraft {
        id: row.get("id"),
        award_id: row.get("award_id"),
        modified: row.get("modified"),
        contents: parse_contents(&row.get::<String, _>("contents")),
        photo1: row.get("photo1"),
        photo2: row.get("photo2"),
        photo_release: row.get("photo_release"),
    }
}

#[instrument(skip_all)]
pub async fn find_yer_draft(pool: &Pool, award_id: i64) -> Result<Option<YerDraft>> {
    let row = sqlx::query("SELECT * FROM yer_drafts WHERE award_id = ?")
        .bind(award_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(yer_draft_from_row))
}

/// Creates the draft for an award, returning the existing one if it raced.
#[instrument(skip_all)]
pub async fn create_yer_draft(
    pool: &Pool,
    award_id: i64,
    contents: &Map<String, Value>,
) -> Result<YerDraft> {
    sqlx::query(
        "INSERT INTO yer_drafts (award_id, modified, contents) VALUES (?, ?, ?) \
         ON CONFLICT (award_id) DO NOTHING",
    )
    .bind(award_id)
    .bind(Utc::now())
    .bind(Value::Object(contents.clone()).to_string())
    .execute(pool)
    .await
    .context("failed to create year-end report draft")?;
    let row = sqlx::query("SELECT * FROM yer_drafts WHERE award_id = ?")
        .bind(award_id)
        .fetch_one(pool)
        .await?;
    Ok(yer_draft_from_row(&row))
}

#[instrument(skip_all)]
pub async fn save_yer_contents(pool: &Pool, id: i64, contents: &Map<String, Value>) -> Result<()> {
    sqlx::query("UPDATE yer_drafts SET contents = ?, modified = ? WHERE id = ?")
        .bind(Value::Object(contents.clone()).to_string())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_yer_file(pool: &Pool, id: i64, field: YerFileField, value: &str) -> Result<()> {
    let sql = format!("UPDATE yer_drafts SET {} = ?, modified = ? WHERE id = ?", field.as_str());
    sqlx::query(&sql)
        .bind(value)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_yer_draft_tx(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM yer_drafts WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
