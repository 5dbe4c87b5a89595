use super::model::{
    ApplicationData, ApplicationLog, ApplicationRating, ApplicationText, Draft, DraftSummary,
    FileRefs, GrantApplication, GrantCycle, GrantListItem, Organization, ProjectApp, RatingScores,
    SubmittedSummary,
};
use super::Pool;
use crate::model::{FileField, ScreeningStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

fn org_from_row(row: &SqliteRow) -> Organization {
    Organization {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        address: row.get("address"),
        city: row.get("city"),
        state: row.get("state"),
        zip: row.get("zip"),
        telephone_number: row.get("telephone_number"),
        fax_number: row.get("fax_number"),
        email_address: row.get("email_address"),
        website: row.get("website"),
        status: row.get("status"),
        ein: row.get("ein"),
        founded: row.get("founded"),
        mission: row.get("mission"),
        fiscal_org: row.get("fiscal_org"),
        fiscal_person: row.get("fiscal_person"),
        fiscal_telephone: row.get("fiscal_telephone"),
        fiscal_email: row.get("fiscal_email"),
        fiscal_address: row.get("fiscal_address"),
        fiscal_letter: row.get("fiscal_letter"),
    }
}

fn cycle_from_row(row: &SqliteRow) -> GrantCycle {
    GrantCycle {
        id: row.get("id"),
        title: row.get("title"),
        open: row.get("open"),
        close: row.get("close"),
        extra_question: row.get("extra_question"),
        info_page: row.get("info_page"),
        email_signature: row.get("email_signature"),
        conflicts: row.get("conflicts"),
        private: row.get("private"),
    }
}

fn files_from_row(row: &SqliteRow) -> FileRefs {
    let mut files = FileRefs::default();
    for field in FileField::ALL {
        files.set(field, row.get::<String, _>(field.as_str()));
    }
    files
}

pub(crate) fn parse_contents(raw: &str) -> Map<String, Value> {
    serde_json::from_str::<Map<String, Value>>(raw).unwrap_or_default()
}

fn draft_from_row(row: &SqliteRow) -> Draft {
    Draft {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        grant_cycle_id: row.get("grant_cycle_id"),
        created: row.get("created"),
        modified: row.get("modified"),
        modified_by: row.get("modified_by"),
        contents: parse_contents(&row.get::<String, _>("contents")),
        files: files_from_row(row),
        extended_deadline: row.get("extended_deadline"),
    }
}

pub(crate) fn application_from_row(row: &SqliteRow) -> Result<GrantApplication> {
    let mut text = ApplicationText::default();
    for column in ApplicationText::COLUMNS {
        text.set(column, row.get::<String, _>(*column));
    }
    let timeline: Vec<String> = serde_json::from_str(&row.get::<String, _>("timeline"))
        .context("application timeline is not a JSON array")?;
    let status_code: i64 = row.get("pre_screening_status");
    let pre_screening_status = ScreeningStatus::from_code(status_code)
        .ok_or_else(|| anyhow!("unknown screening status {status_code}"))?;
    Ok(GrantApplication {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        grant_cycle_id: row.get("grant_cycle_id"),
        submission_time: row.get("submission_time"),
        pre_screening_status,
        scoring_bonus_poc: row.get("scoring_bonus_poc"),
        scoring_bonus_geo: row.get("scoring_bonus_geo"),
        data: ApplicationData {
            text,
            founded: row.get("founded"),
            budget_last: row.get("budget_last"),
            budget_current: row.get("budget_current"),
            amount_requested: row.get("amount_requested"),
            project_budget: row.get("project_budget"),
            timeline,
            files: files_from_row(row),
        },
    })
}

// ---- organizations ----

#[instrument(skip_all)]
pub async fn create_organization(pool: &Pool, name: &str, email: &str) -> Result<i64> {
    let id: i64 = sqlx::query("INSERT INTO organizations (name, email) VALUES (?, ?) RETURNING id")
        .bind(name.trim())
        .bind(email.trim().to_lowercase())
        .fetch_one(pool)
        .await
        .context("failed to create organization")?
        .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_organization(pool: &Pool, id: i64) -> Result<Option<Organization>> {
    let row = sqlx::query("SELECT * FROM organizations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(org_from_row))
}

#[instrument(skip_all)]
pub async fn find_organization_by_name(pool: &Pool, name: &str) -> Result<Option<Organization>> {
    let row = sqlx::query("SELECT * FROM organizations WHERE name = ? COLLATE NOCASE")
        .bind(name.trim())
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(org_from_row))
}

#[instrument(skip_all)]
pub async fn find_organization_by_email(pool: &Pool, email: &str) -> Result<Option<Organization>> {
    let row = sqlx::query("SELECT * FROM organizations WHERE email = ? AND email != ''")
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(org_from_row))
}

#[instrument(skip_all)]
pub async fn set_organization_email(pool: &Pool, id: i64, email: &str) -> Result<()> {
    sqlx::query("UPDATE organizations SET email = ? WHERE id = ?")
        .bind(email.trim().to_lowercase())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_organizations(pool: &Pool) -> Result<Vec<Organization>> {
    let rows = sqlx::query("SELECT * FROM organizations ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(org_from_row).collect())
}

/// Copies the profile columns of a submitted application onto its organization.
pub async fn apply_profile_tx(
    tx: &mut Transaction<'_, Sqlite>,
    org_id: i64,
    data: &ApplicationData,
) -> Result<()> {
    let mut assignments: Vec<String> = Organization::PROFILE_TEXT
        .iter()
        .filter(|c| **c != "fiscal_letter")
        .map(|c| format!("{c} = ?"))
        .collect();
    assignments.push("founded = ?".into());
    assignments.push("fiscal_letter = ?".into());
    let sql = format!("UPDATE organizations SET {} WHERE id = ?", assignments.join(", "));
    let mut q = sqlx::query(&sql);
    for column in Organization::PROFILE_TEXT.iter().filter(|c| **c != "fiscal_letter") {
        q = q.bind(data.text.get(column).unwrap_or_default());
    }
    q.bind(data.founded)
        .bind(data.files.get(FileField::FiscalLetter))
        .bind(org_id)
        .execute(&mut **tx)
        .await
        .context("failed to update organization profile")?;
    Ok(())
}

// ---- grant cycles ----

#[derive(Debug, Clone, Default)]
pub struct NewCycle {
    pub title: String,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
    pub extra_question: String,
    pub info_page: String,
    pub email_signature: String,
    pub private: bool,
}

#[instrument(skip_all)]
pub async fn create_cycle(pool: &Pool, new: &NewCycle) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO grant_cycles (title, open, close, extra_question, info_page, email_signature, private) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&new.title)
    .bind(new.open)
    .bind(new.close)
    .bind(&new.extra_question)
    .bind(&new.info_page)
    .bind(&new.email_signature)
    .bind(new.private)
    .fetch_one(pool)
    .await
    .context("failed to create grant cycle")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_cycle(pool: &Pool, id: i64) -> Result<Option<GrantCycle>> {
    let row = sqlx::query("SELECT * FROM grant_cycles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(cycle_from_row))
}

#[instrument(skip_all)]
pub async fn list_cycles(pool: &Pool) -> Result<Vec<GrantCycle>> {
    let rows = sqlx::query("SELECT * FROM grant_cycles ORDER BY close DESC, id DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(cycle_from_row).collect())
}

// ---- drafts ----

#[instrument(skip_all)]
pub async fn get_draft(pool: &Pool, id: i64) -> Result<Option<Draft>> {
    let row = sqlx::query("SELECT * FROM drafts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(draft_from_row))
}

#[instrument(skip_all)]
pub async fn find_draft(pool: &Pool, org_id: i64, cycle_id: i64) -> Result<Option<Draft>> {
    let row = sqlx::query("SELECT * FROM drafts WHERE organization_id = ? AND grant_cycle_id = ?")
        .bind(org_id)
        .bind(cycle_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(draft_from_row))
}

/// Inserts a draft unless the org already has an application or draft for the cycle.
pub async fn insert_draft_tx(
    tx: &mut Transaction<'_, Sqlite>,
    org_id: i64,
    cycle_id: i64,
    contents: &Map<String, Value>,
    files: &FileRefs,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let taken: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM applications WHERE organization_id = ? AND grant_cycle_id = ? \
         UNION ALL SELECT id FROM drafts WHERE organization_id = ? AND grant_cycle_id = ? LIMIT 1",
    )
    .bind(org_id)
    .bind(cycle_id)
    .bind(org_id)
    .bind(cycle_id)
    .fetch_optional(&mut **tx)
    .await?;
    if taken.is_some() {
        return Ok(None);
    }
    let columns: Vec<&str> = FileField::ALL.iter().map(FileField::as_str).collect();
    let sql = format!(
        "INSERT INTO drafts (organization_id, grant_cycle_id, created, modified, contents, {}) \
         VALUES (?, ?, ?, ?, ?{}) RETURNING id",
        columns.join(", "),
        ", ?".repeat(columns.len())
    );
    let mut q = sqlx::query(&sql)
        .bind(org_id)
        .bind(cycle_id)
        .bind(now)
        .bind(now)
        .bind(Value::Object(contents.clone()).to_string());
    for field in FileField::ALL {
        q = q.bind(files.get(field));
    }
    let id: i64 = q.fetch_one(&mut **tx).await?.get("id");
    Ok(Some(id))
}

#[instrument(skip_all)]
pub async fn insert_draft(
    pool: &Pool,
    org_id: i64,
    cycle_id: i64,
    contents: &Map<String, Value>,
    files: &FileRefs,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let id = insert_draft_tx(&mut tx, org_id, cycle_id, contents, files, Utc::now()).await?;
    tx.commit().await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn save_draft_contents(
    pool: &Pool,
    id: i64,
    contents: &Map<String, Value>,
    modified_by: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE drafts SET contents = ?, modified = ?, modified_by = ? WHERE id = ?")
        .bind(Value::Object(contents.clone()).to_string())
        .bind(now)
        .bind(modified_by)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to save draft")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_draft_file(pool: &Pool, id: i64, field: FileField, value: &str) -> Result<()> {
    // column name comes from the closed FileField set
    let sql = format!("UPDATE drafts SET {} = ?, modified = ? WHERE id = ?", field.as_str());
    sqlx::query(&sql)
        .bind(value)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_draft_extension(
    pool: &Pool,
    id: i64,
    deadline: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE drafts SET extended_deadline = ? WHERE id = ?")
        .bind(deadline)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_draft(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM drafts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_draft_tx(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM drafts WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn drafts_for_org(pool: &Pool, org_id: i64) -> Result<Vec<DraftSummary>> {
    let rows = sqlx::query(
        "SELECT d.id, d.grant_cycle_id, d.modified, d.extended_deadline, c.title, c.close \
         FROM drafts d JOIN grant_cycles c ON c.id = d.grant_cycle_id \
         WHERE d.organization_id = ? ORDER BY c.close",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| DraftSummary {
            id: row.get("id"),
            grant_cycle_id: row.get("grant_cycle_id"),
            cycle_title: row.get("title"),
            modified: row.get("modified"),
            close: row.get("close"),
            extended_deadline: row.get("extended_deadline"),
        })
        .collect())
}

/// Every draft with its cycle and the org's login, for deadline reminders.
#[instrument(skip_all)]
pub async fn drafts_with_cycles(pool: &Pool) -> Result<Vec<(Draft, GrantCycle, String)>> {
    let rows = sqlx::query("SELECT d.*, o.email AS org_email FROM drafts d JOIN organizations o ON o.id = d.organization_id ORDER BY d.id")
        .fetch_all(pool)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let draft = draft_from_row(row);
        let Some(cycle) = get_cycle(pool, draft.grant_cycle_id).await? else {
            continue;
        };
        out.push((draft, cycle, row.get::<String, _>("org_email")));
    }
    Ok(out)
}

// ---- applications ----

/// Inserts a submitted application snapshot.
pub async fn insert_application_tx(
    tx: &mut Transaction<'_, Sqlite>,
    org_id: i64,
    cycle_id: i64,
    submission_time: DateTime<Utc>,
    status: ScreeningStatus,
    data: &ApplicationData,
) -> Result<i64> {
    let mut columns: Vec<&str> = vec![
        "organization_id",
        "grant_cycle_id",
        "submission_time",
        "pre_screening_status",
    ];
    columns.extend(ApplicationText::COLUMNS.iter().copied());
    columns.extend(ApplicationData::MONEY_COLUMNS);
    columns.push("project_budget");
    columns.push("timeline");
    columns.extend(FileField::ALL.iter().map(FileField::as_str));
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO applications ({}) VALUES ({}) RETURNING id",
        columns.join(", "),
        placeholders
    );

    let mut q = sqlx::query(&sql)
        .bind(org_id)
        .bind(cycle_id)
        .bind(submission_time)
        .bind(status.code());
    for column in ApplicationText::COLUMNS {
        q = q.bind(data.text.get(column).unwrap_or_default());
    }
    for column in ApplicationData::MONEY_COLUMNS {
        q = q.bind(data.money(column));
    }
    q = q
        .bind(data.project_budget)
        .bind(serde_json::to_string(&data.timeline)?);
    for field in FileField::ALL {
        q = q.bind(data.files.get(field));
    }
    let id: i64 = q
        .fetch_one(&mut **tx)
        .await
        .context("failed to insert application")?
        .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_application(pool: &Pool, id: i64) -> Result<Option<GrantApplication>> {
    let row = sqlx::query("SELECT * FROM applications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(application_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_application(
    pool: &Pool,
    org_id: i64,
    cycle_id: i64,
) -> Result<Option<GrantApplication>> {
    let row =
        sqlx::query("SELECT * FROM applications WHERE organization_id = ? AND grant_cycle_id = ?")
            .bind(org_id)
            .bind(cycle_id)
            .fetch_optional(pool)
            .await?;
    row.as_ref().map(application_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn application_exists(pool: &Pool, org_id: i64, cycle_id: i64) -> Result<bool> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM applications WHERE organization_id = ? AND grant_cycle_id = ?",
    )
    .bind(org_id)
    .bind(cycle_id)
    .fetch_one(pool)
    .await?;
    Ok(n > 0)
}

pub async fn delete_application_tx(tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM applications WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn applications_for_org(pool: &Pool, org_id: i64) -> Result<Vec<SubmittedSummary>> {
    let rows = sqlx::query(
        "SELECT a.id, a.grant_cycle_id, a.submission_time, c.title FROM applications a \
         JOIN grant_cycles c ON c.id = a.grant_cycle_id \
         WHERE a.organization_id = ? ORDER BY a.submission_time DESC, a.id DESC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| SubmittedSummary {
            id: row.get("id"),
            grant_cycle_id: row.get("grant_cycle_id"),
            cycle_title: row.get("title"),
            submission_time: row.get("submission_time"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn set_pre_screening(pool: &Pool, id: i64, status: ScreeningStatus) -> Result<()> {
    sqlx::query("UPDATE applications SET pre_screening_status = ? WHERE id = ?")
        .bind(status.code())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_scoring_bonuses(pool: &Pool, id: i64, poc: bool, geo: bool) -> Result<()> {
    sqlx::query("UPDATE applications SET scoring_bonus_poc = ?, scoring_bonus_geo = ? WHERE id = ?")
        .bind(poc)
        .bind(geo)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---- project apps ----

fn project_app_from_row(row: &SqliteRow) -> ProjectApp {
    ProjectApp {
        id: row.get("id"),
        application_id: row.get("application_id"),
        giving_project_id: row.get("giving_project_id"),
        screening_status: row
            .get::<Option<i64>, _>("screening_status")
            .and_then(ScreeningStatus::from_code),
    }
}

/// Links an application to a giving project; returns the existing link if present.
#[instrument(skip_all)]
pub async fn assign_project(pool: &Pool, application_id: i64, project_id: i64) -> Result<i64> {
    sqlx::query(
        "INSERT INTO project_apps (application_id, giving_project_id) VALUES (?, ?) \
         ON CONFLICT (application_id, giving_project_id) DO NOTHING",
    )
    .bind(application_id)
    .bind(project_id)
    .execute(pool)
    .await?;
    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM project_apps WHERE application_id = ? AND giving_project_id = ?",
    )
    .bind(application_id)
    .bind(project_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_project_app(pool: &Pool, id: i64) -> Result<Option<ProjectApp>> {
    let row = sqlx::query("SELECT * FROM project_apps WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(project_app_from_row))
}

#[instrument(skip_all)]
pub async fn project_apps_for_application(pool: &Pool, application_id: i64) -> Result<Vec<ProjectApp>> {
    let rows = sqlx::query("SELECT * FROM project_apps WHERE application_id = ? ORDER BY id")
        .bind(application_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(project_app_from_row).collect())
}

#[instrument(skip_all)]
pub async fn set_project_screening(
    pool: &Pool,
    projectapp_id: i64,
    status: Option<ScreeningStatus>,
) -> Result<()> {
    sqlx::query("UPDATE project_apps SET screening_status = ? WHERE id = ?")
        .bind(status.map(|s| s.code()))
        .bind(projectapp_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Applications assigned to a project that made it through pre-screening.
#[instrument(skip_all)]
pub async fn grant_list_for_project(pool: &Pool, project_id: i64) -> Result<Vec<GrantListItem>> {
    let rows = sqlx::query(
        "SELECT a.id, a.amount_requested, a.support_type, a.pre_screening_status, pa.screening_status, \
                o.name AS org_name, c.title AS cycle_title \
         FROM project_apps pa \
         JOIN applications a ON a.id = pa.application_id \
         JOIN organizations o ON o.id = a.organization_id \
         JOIN grant_cycles c ON c.id = a.grant_cycle_id \
         WHERE pa.giving_project_id = ? AND a.pre_screening_status >= ? \
         ORDER BY o.name",
    )
    .bind(project_id)
    .bind(ScreeningStatus::PreScreenedIn.code())
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let pre: i64 = row.get("pre_screening_status");
        out.push(GrantListItem {
            application_id: row.get("id"),
            organization: row.get("org_name"),
            cycle: row.get("cycle_title"),
            amount_requested: row.get("amount_requested"),
            support_type: row.get("support_type"),
            pre_screening_status: ScreeningStatus::from_code(pre)
                .ok_or_else(|| anyhow!("unknown screening status {pre}"))?,
            screening_status: row
                .get::<Option<i64>, _>("screening_status")
                .and_then(ScreeningStatus::from_code),
        });
    }
    Ok(out)
}

/// Approved membership of `email` in a project assigned to the application.
#[instrument(skip_all)]
pub async fn assigned_membership_for(
    pool: &Pool,
    email: &str,
    application_id: i64,
) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT m.id FROM memberships m \
         JOIN members mb ON mb.id = m.member_id \
         JOIN project_apps pa ON pa.giving_project_id = m.giving_project_id \
         WHERE mb.email = ? AND pa.application_id = ? AND m.approved = 1 \
         ORDER BY m.id LIMIT 1",
    )
    .bind(email.trim().to_lowercase())
    .bind(application_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

// ---- application logs ----

#[instrument(skip_all)]
pub async fn add_log(
    pool: &Pool,
    org_id: i64,
    application_id: Option<i64>,
    staff_id: i64,
    contacted: &str,
    notes: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO application_logs (date, organization_id, application_id, staff_id, contacted, notes) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(Utc::now())
    .bind(org_id)
    .bind(application_id)
    .bind(staff_id)
    .bind(contacted)
    .bind(notes)
    .fetch_one(pool)
    .await
    .context("failed to add application log")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn logs_for_org(pool: &Pool, org_id: i64) -> Result<Vec<ApplicationLog>> {
    let rows = sqlx::query(
        "SELECT * FROM application_logs WHERE organization_id = ? ORDER BY date DESC, id DESC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ApplicationLog {
            id: row.get("id"),
            date: row.get("date"),
            organization_id: row.get("organization_id"),
            application_id: row.get("application_id"),
            staff_id: row.get("staff_id"),
            contacted: row.get("contacted"),
            notes: row.get("notes"),
        })
        .collect())
}

// ---- ratings ----

fn rating_from_row(row: &SqliteRow) -> ApplicationRating {
    ApplicationRating {
        id: row.get("id"),
        application_id: row.get("application_id"),
        membership_id: row.get("membership_id"),
        scores: RatingScores {
            program: row.get("program"),
            diversity: row.get("diversity"),
            soundness: row.get("soundness"),
            lack_of_access: row.get("lack_of_access"),
            collaboration: row.get("collaboration"),
            comments: row.get("comments"),
        },
        submitted: row.get("submitted"),
        submission_time: row.get("submission_time"),
    }
}

#[instrument(skip_all)]
pub async fn get_rating(
    pool: &Pool,
    application_id: i64,
    membership_id: i64,
) -> Result<Option<ApplicationRating>> {
    let row = sqlx::query("SELECT * FROM ratings WHERE application_id = ? AND membership_id = ?")
        .bind(application_id)
        .bind(membership_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(rating_from_row))
}

#[instrument(skip_all)]
pub async fn save_rating(
    pool: &Pool,
    application_id: i64,
    membership_id: i64,
    scores: &RatingScores,
    submitted_at: Option<DateTime<Utc>>,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO ratings (application_id, membership_id, program, diversity, soundness, lack_of_access, collaboration, comments, submitted, submission_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (application_id, membership_id) DO UPDATE SET \
           program = excluded.program, diversity = excluded.diversity, soundness = excluded.soundness, \
           lack_of_access = excluded.lack_of_access, collaboration = excluded.collaboration, \
           comments = excluded.comments, submitted = excluded.submitted, submission_time = excluded.submission_time \
         RETURNING id",
    )
    .bind(application_id)
    .bind(membership_id)
    .bind(scores.program)
    .bind(scores.diversity)
    .bind(scores.soundness)
    .bind(scores.lack_of_access)
    .bind(scores.collaboration)
    .bind(&scores.comments)
    .bind(submitted_at.is_some())
    .bind(submitted_at)
    .fetch_one(pool)
    .await
    .context("failed to save rating")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn ratings_for_application(
    pool: &Pool,
    application_id: i64,
) -> Result<Vec<ApplicationRating>> {
    let rows = sqlx::query("SELECT * FROM ratings WHERE application_id = ? ORDER BY id")
        .bind(application_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(rating_from_row).collect())
}
