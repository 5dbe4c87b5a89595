use super::model::{
    Donor, GivingProject, Member, Membership, MembershipSummary, NewsItem, ProjectResource, Step,
};
use super::Pool;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

fn project_from_row(row: &SqliteRow) -> GivingProject {
    GivingProject {
        id: row.get("id"),
        title: row.get("title"),
        public: row.get("public"),
        pre_approved: row.get("pre_approved"),
        fundraising_training: row.get("fundraising_training"),
        fundraising_deadline: row.get("fundraising_deadline"),
        fund_goal: row.get("fund_goal"),
        suggested_steps: row.get("suggested_steps"),
        site_visits: row.get("site_visits"),
        calendar: row.get("calendar"),
    }
}

fn member_from_row(row: &SqliteRow) -> Member {
    Member {
        id: row.get("id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        current: row.get("current"),
    }
}

fn membership_from_row(row: &SqliteRow) -> Membership {
    Membership {
        id: row.get("id"),
        giving_project_id: row.get("giving_project_id"),
        member_id: row.get("member_id"),
        approved: row.get("approved"),
        leader: row.get("leader"),
        copied_contacts: row.get("copied_contacts"),
        emailed: row.get("emailed"),
        last_activity: row.get("last_activity"),
        notifications: row.get("notifications"),
    }
}

fn donor_from_row(row: &SqliteRow) -> Donor {
    Donor {
        id: row.get("id"),
        membership_id: row.get("membership_id"),
        added: row.get("added"),
        firstname: row.get("firstname"),
        lastname: row.get("lastname"),
        amount: row.get("amount"),
        likelihood: row.get("likelihood"),
        talked: row.get("talked"),
        asked: row.get("asked"),
        promised: row.get("promised"),
        received_this: row.get("received_this"),
        received_next: row.get("received_next"),
        received_afternext: row.get("received_afternext"),
        gift_notified: row.get("gift_notified"),
        phone: row.get("phone"),
        email: row.get("email"),
        notes: row.get("notes"),
        next_step_id: row.get("next_step_id"),
    }
}

fn step_from_row(row: &SqliteRow) -> Step {
    Step {
        id: row.get("id"),
        donor_id: row.get("donor_id"),
        created: row.get("created"),
        date: row.get("date"),
        description: row.get("description"),
        completed: row.get("completed"),
        asked: row.get("asked"),
        promised: row.get("promised"),
    }
}

// ---- giving projects ----

#[derive(Debug, Clone)]
pub struct NewProject {
    pub title: String,
    pub public: bool,
    pub pre_approved: String,
    pub fundraising_training: DateTime<Utc>,
    pub fundraising_deadline: NaiveDate,
    pub fund_goal: i64,
    pub suggested_steps: String,
}

#[instrument(skip_all)]
pub async fn create_project(pool: &Pool, new: &NewProject) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO giving_projects (title, public, pre_approved, fundraising_training, fundraising_deadline, fund_goal, suggested_steps) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&new.title)
    .bind(new.public)
    .bind(&new.pre_approved)
    .bind(new.fundraising_training)
    .bind(new.fundraising_deadline)
    .bind(new.fund_goal)
    .bind(&new.suggested_steps)
    .fetch_one(pool)
    .await
    .context("failed to create giving project")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_project(pool: &Pool, id: i64) -> Result<Option<GivingProject>> {
    let row = sqlx::query("SELECT * FROM giving_projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(project_from_row))
}

#[instrument(skip_all)]
pub async fn get_project_by_title(pool: &Pool, title: &str) -> Result<Option<GivingProject>> {
    let row = sqlx::query("SELECT * FROM giving_projects WHERE title = ?")
        .bind(title)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(project_from_row))
}

/// Public projects still fundraising, offered at registration.
#[instrument(skip_all)]
pub async fn list_open_projects(pool: &Pool, today: NaiveDate) -> Result<Vec<GivingProject>> {
    let rows = sqlx::query(
        "SELECT * FROM giving_projects WHERE public = 1 AND fundraising_deadline >= ? ORDER BY title",
    )
    .bind(today)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(project_from_row).collect())
}

#[instrument(skip_all)]
pub async fn list_projects(pool: &Pool) -> Result<Vec<GivingProject>> {
    let rows = sqlx::query("SELECT * FROM giving_projects ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(project_from_row).collect())
}

#[instrument(skip_all)]
pub async fn project_resources(pool: &Pool, project_id: i64) -> Result<Vec<ProjectResource>> {
    let rows = sqlx::query(
        "SELECT pr.session, r.title, r.summary, r.link FROM project_resources pr \
         JOIN resources r ON r.id = pr.resource_id \
         WHERE pr.giving_project_id = ? ORDER BY pr.session, pr.id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ProjectResource {
            session: row.get("session"),
            title: row.get("title"),
            summary: row.get("summary"),
            link: row.get("link"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn add_project_resource(
    pool: &Pool,
    project_id: i64,
    session: &str,
    title: &str,
    summary: &str,
    link: &str,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let resource_id: i64 =
        sqlx::query("INSERT INTO resources (title, summary, link) VALUES (?, ?, ?) RETURNING id")
            .bind(title)
            .bind(summary)
            .bind(link)
            .fetch_one(&mut *tx)
            .await?
            .get("id");
    sqlx::query(
        "INSERT INTO project_resources (giving_project_id, resource_id, session) VALUES (?, ?, ?)",
    )
    .bind(project_id)
    .bind(resource_id)
    .bind(session)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(resource_id)
}

// ---- members and memberships ----

#[instrument(skip_all)]
pub async fn create_member(pool: &Pool, email: &str, first: &str, last: &str) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO members (email, first_name, last_name) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(email.trim().to_lowercase())
    .bind(first)
    .bind(last)
    .fetch_one(pool)
    .await
    .context("failed to create member")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_member_by_email(pool: &Pool, email: &str) -> Result<Option<Member>> {
    let row = sqlx::query("SELECT * FROM members WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(member_from_row))
}

#[instrument(skip_all)]
pub async fn get_member(pool: &Pool, id: i64) -> Result<Option<Member>> {
    let row = sqlx::query("SELECT * FROM members WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(member_from_row))
}

#[instrument(skip_all)]
pub async fn set_member_current(pool: &Pool, member_id: i64, membership_id: i64) -> Result<()> {
    sqlx::query("UPDATE members SET current = ? WHERE id = ?")
        .bind(membership_id)
        .bind(member_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_membership(pool: &Pool, id: i64) -> Result<Option<Membership>> {
    let row = sqlx::query("SELECT * FROM memberships WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(membership_from_row))
}

#[instrument(skip_all)]
pub async fn memberships_for_member(pool: &Pool, member_id: i64) -> Result<Vec<Membership>> {
    let rows = sqlx::query("SELECT * FROM memberships WHERE member_id = ? ORDER BY id")
        .bind(member_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(membership_from_row).collect())
}

#[instrument(skip_all)]
pub async fn membership_summaries(pool: &Pool, member_id: i64) -> Result<Vec<MembershipSummary>> {
    let rows = sqlx::query(
        "SELECT m.id, m.giving_project_id, m.approved, m.leader, p.title FROM memberships m \
         JOIN giving_projects p ON p.id = m.giving_project_id \
         WHERE m.member_id = ? ORDER BY m.id",
    )
    .bind(member_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| MembershipSummary {
            id: row.get("id"),
            giving_project_id: row.get("giving_project_id"),
            project_title: row.get("title"),
            approved: row.get("approved"),
            leader: row.get("leader"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn find_membership(
    pool: &Pool,
    member_id: i64,
    project_id: i64,
) -> Result<Option<Membership>> {
    let row = sqlx::query("SELECT * FROM memberships WHERE member_id = ? AND giving_project_id = ?")
        .bind(member_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(membership_from_row))
}

#[instrument(skip_all)]
pub async fn create_membership(
    pool: &Pool,
    member_id: i64,
    project_id: i64,
    approved: bool,
    notifications: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO memberships (member_id, giving_project_id, approved, notifications) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(member_id)
    .bind(project_id)
    .bind(approved)
    .bind(notifications)
    .fetch_one(pool)
    .await
    .context("failed to create membership")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn set_membership_flags(
    pool: &Pool,
    id: i64,
    approved: bool,
    leader: bool,
) -> Result<()> {
    sqlx::query("UPDATE memberships SET approved = ?, leader = ? WHERE id = ?")
        .bind(approved)
        .bind(leader)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn touch_last_activity(pool: &Pool, id: i64, today: NaiveDate) -> Result<()> {
    sqlx::query("UPDATE memberships SET last_activity = ? WHERE id = ?")
        .bind(today)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns the pending notification and clears it so it shows only once.
#[instrument(skip_all)]
pub async fn take_notifications(pool: &Pool, id: i64) -> Result<String> {
    let mut tx = pool.begin().await?;
    let text: Option<String> =
        sqlx::query_scalar("SELECT notifications FROM memberships WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let text = text.unwrap_or_default();
    if !text.is_empty() {
        sqlx::query("UPDATE memberships SET notifications = '' WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(text)
}

#[instrument(skip_all)]
pub async fn set_emailed(pool: &Pool, id: i64, day: NaiveDate) -> Result<()> {
    sqlx::query("UPDATE memberships SET emailed = ? WHERE id = ?")
        .bind(day)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Membership plus the member's contact details, for cron emails.
#[derive(Debug, Clone)]
pub struct MembershipContact {
    pub membership: Membership,
    pub email: String,
    pub first_name: String,
}

fn contact_from_row(row: &SqliteRow) -> MembershipContact {
    MembershipContact {
        membership: membership_from_row(row),
        email: row.get("member_email"),
        first_name: row.get("member_first_name"),
    }
}

/// Memberships in projects still fundraising whose last reminder is older than `limit`.
#[instrument(skip_all)]
pub async fn memberships_due_reminder(
    pool: &Pool,
    today: NaiveDate,
    limit: NaiveDate,
) -> Result<Vec<MembershipContact>> {
    let rows = sqlx::query(
        "SELECT m.*, mb.email AS member_email, mb.first_name AS member_first_name \
         FROM memberships m \
         JOIN members mb ON mb.id = m.member_id \
         JOIN giving_projects p ON p.id = m.giving_project_id \
         WHERE p.fundraising_deadline >= ? AND (m.emailed IS NULL OR m.emailed <= ?) \
         ORDER BY m.id",
    )
    .bind(today)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(contact_from_row).collect())
}

#[instrument(skip_all)]
pub async fn membership_contact(pool: &Pool, id: i64) -> Result<Option<MembershipContact>> {
    let row = sqlx::query(
        "SELECT m.*, mb.email AS member_email, mb.first_name AS member_first_name \
         FROM memberships m JOIN members mb ON mb.id = m.member_id WHERE m.id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(contact_from_row))
}

#[instrument(skip_all)]
pub async fn project_leaders(pool: &Pool, project_id: i64) -> Result<Vec<MembershipContact>> {
    let rows = sqlx::query(
        "SELECT m.*, mb.email AS member_email, mb.first_name AS member_first_name \
         FROM memberships m JOIN members mb ON mb.id = m.member_id \
         WHERE m.giving_project_id = ? AND m.leader = 1 ORDER BY m.id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(contact_from_row).collect())
}

/// `(project_id, unapproved count)` for projects with pending memberships.
#[instrument(skip_all)]
pub async fn pending_membership_counts(pool: &Pool) -> Result<Vec<(i64, i64)>> {
    let rows = sqlx::query(
        "SELECT giving_project_id, COUNT(*) AS n FROM memberships WHERE approved = 0 \
         GROUP BY giving_project_id ORDER BY giving_project_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("giving_project_id"), row.get("n")))
        .collect())
}

#[instrument(skip_all)]
pub async fn pending_memberships(pool: &Pool) -> Result<Vec<MembershipContact>> {
    let rows = sqlx::query(
        "SELECT m.*, mb.email AS member_email, mb.first_name AS member_first_name \
         FROM memberships m JOIN members mb ON mb.id = m.member_id \
         WHERE m.approved = 0 ORDER BY m.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(contact_from_row).collect())
}

// ---- donors ----

#[derive(Debug, Clone, Default)]
pub struct DonorFields {
    pub firstname: String,
    pub lastname: String,
    pub amount: Option<i64>,
    pub likelihood: Option<i64>,
    pub phone: String,
    pub email: String,
    pub notes: String,
}

#[instrument(skip_all)]
pub async fn insert_donor(pool: &Pool, membership_id: i64, fields: &DonorFields) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO donors (membership_id, added, firstname, lastname, amount, likelihood, phone, email, notes) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(membership_id)
    .bind(Utc::now())
    .bind(&fields.firstname)
    .bind(&fields.lastname)
    .bind(fields.amount)
    .bind(fields.likelihood)
    .bind(&fields.phone)
    .bind(&fields.email)
    .bind(&fields.notes)
    .fetch_one(pool)
    .await
    .context("failed to insert donor")?
    .get("id");
    Ok(id)
}

/// Overwrites the editable donor columns; estimates are kept when `None`
/// and `keep_estimates` is set.
#[instrument(skip_all)]
pub async fn update_donor(
    pool: &Pool,
    donor_id: i64,
    fields: &DonorFields,
    keep_estimates: bool,
) -> Result<()> {
    let sql = if keep_estimates {
        "UPDATE donors SET firstname = ?, lastname = ?, phone = ?, email = ?, notes = ? WHERE id = ?"
    } else {
        "UPDATE donors SET firstname = ?, lastname = ?, phone = ?, email = ?, notes = ?, amount = ?, likelihood = ? WHERE id = ?"
    };
    let mut q = sqlx::query(sql)
        .bind(&fields.firstname)
        .bind(&fields.lastname)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.notes);
    if !keep_estimates {
        q = q.bind(fields.amount).bind(fields.likelihood);
    }
    q.bind(donor_id).execute(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_donor_estimates(
    pool: &Pool,
    donor_id: i64,
    amount: i64,
    likelihood: i64,
) -> Result<()> {
    sqlx::query("UPDATE donors SET amount = ?, likelihood = ? WHERE id = ?")
        .bind(amount)
        .bind(likelihood)
        .bind(donor_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_donor_gifts(
    pool: &Pool,
    donor_id: i64,
    received_this: i64,
    received_next: i64,
    received_afternext: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE donors SET received_this = ?, received_next = ?, received_afternext = ? WHERE id = ?",
    )
    .bind(received_this)
    .bind(received_next)
    .bind(received_afternext)
    .bind(donor_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_donor(pool: &Pool, donor_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM donors WHERE id = ?")
        .bind(donor_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Donor scoped to the caller's membership.
#[instrument(skip_all)]
pub async fn get_donor(pool: &Pool, donor_id: i64, membership_id: i64) -> Result<Option<Donor>> {
    let row = sqlx::query("SELECT * FROM donors WHERE id = ? AND membership_id = ?")
        .bind(donor_id)
        .bind(membership_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(donor_from_row))
}

#[instrument(skip_all)]
pub async fn donors_for_membership(pool: &Pool, membership_id: i64) -> Result<Vec<Donor>> {
    let rows = sqlx::query("SELECT * FROM donors WHERE membership_id = ? ORDER BY id")
        .bind(membership_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(donor_from_row).collect())
}

#[instrument(skip_all)]
pub async fn donors_for_project(pool: &Pool, project_id: i64) -> Result<Vec<Donor>> {
    let rows = sqlx::query(
        "SELECT d.* FROM donors d JOIN memberships m ON m.id = d.membership_id \
         WHERE m.giving_project_id = ? ORDER BY d.id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(donor_from_row).collect())
}

/// Donors with gifts that their fundraiser has not been told about yet.
#[instrument(skip_all)]
pub async fn unnotified_gift_donors(pool: &Pool) -> Result<Vec<Donor>> {
    let rows = sqlx::query(
        "SELECT * FROM donors WHERE gift_notified = 0 \
         AND (received_this + received_next + received_afternext) > 0 ORDER BY membership_id, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(donor_from_row).collect())
}

pub async fn mark_gift_notified_tx(
    tx: &mut Transaction<'_, Sqlite>,
    donor_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE donors SET gift_notified = 1 WHERE id = ?")
        .bind(donor_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn set_notifications_tx(
    tx: &mut Transaction<'_, Sqlite>,
    membership_id: i64,
    text: &str,
) -> Result<()> {
    sqlx::query("UPDATE memberships SET notifications = ? WHERE id = ?")
        .bind(text)
        .bind(membership_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---- steps ----

#[instrument(skip_all)]
pub async fn get_step(pool: &Pool, step_id: i64, donor_id: i64) -> Result<Option<Step>> {
    let row = sqlx::query("SELECT * FROM steps WHERE id = ? AND donor_id = ?")
        .bind(step_id)
        .bind(donor_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(step_from_row))
}

#[instrument(skip_all)]
pub async fn steps_for_membership(pool: &Pool, membership_id: i64) -> Result<Vec<Step>> {
    let rows = sqlx::query(
        "SELECT s.* FROM steps s JOIN donors d ON d.id = s.donor_id \
         WHERE d.membership_id = ? ORDER BY s.date, s.id",
    )
    .bind(membership_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(step_from_row).collect())
}

/// Inserts a step and points the donor at it, refusing when one is outstanding.
#[instrument(skip_all)]
pub async fn add_next_step(
    pool: &Pool,
    donor_id: i64,
    date: NaiveDate,
    description: &str,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let current: Option<i64> = sqlx::query_scalar("SELECT next_step_id FROM donors WHERE id = ?")
        .bind(donor_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| anyhow!("donor {donor_id} not found"))?;
    if current.is_some() {
        return Ok(None);
    }
    let step_id = insert_step_tx(&mut tx, donor_id, date, description).await?;
    tx.commit().await?;
    Ok(Some(step_id))
}

pub async fn insert_step_tx(
    tx: &mut Transaction<'_, Sqlite>,
    donor_id: i64,
    date: NaiveDate,
    description: &str,
) -> Result<i64> {
    let step_id: i64 = sqlx::query(
        "INSERT INTO steps (donor_id, created, date, description) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(donor_id)
    .bind(Utc::now())
    .bind(date)
    .bind(description)
    .fetch_one(&mut **tx)
    .await?
    .get("id");
    sqlx::query("UPDATE donors SET next_step_id = ? WHERE id = ?")
        .bind(step_id)
        .bind(donor_id)
        .execute(&mut **tx)
        .await?;
    Ok(step_id)
}

#[instrument(skip_all)]
pub async fn update_step(
    pool: &Pool,
    step_id: i64,
    date: NaiveDate,
    description: &str,
) -> Result<()> {
    sqlx::query("UPDATE steps SET date = ?, description = ? WHERE id = ? AND completed IS NULL")
        .bind(date)
        .bind(description)
        .bind(step_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Column values written when a step is marked complete.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub completed: DateTime<Utc>,
    pub step_asked: bool,
    pub step_promised: Option<i64>,
    pub donor: Donor,
    pub next_step: Option<(NaiveDate, String)>,
}

/// Writes a completed step, the donor changes and the optional next step.
/// Returns false, writing nothing, when the step was already completed.
pub async fn complete_step_tx(
    tx: &mut Transaction<'_, Sqlite>,
    step_id: i64,
    done: &StepCompletion,
) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE steps SET completed = ?, asked = ?, promised = ? WHERE id = ? AND completed IS NULL",
    )
    .bind(done.completed)
    .bind(done.step_asked)
    .bind(done.step_promised)
    .bind(step_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();
    if updated == 0 {
        return Ok(false);
    }
    let d = &done.donor;
    sqlx::query(
        "UPDATE donors SET talked = ?, asked = ?, promised = ?, lastname = ?, phone = ?, email = ?, notes = ?, next_step_id = NULL \
         WHERE id = ?",
    )
    .bind(d.talked)
    .bind(d.asked)
    .bind(d.promised)
    .bind(&d.lastname)
    .bind(&d.phone)
    .bind(&d.email)
    .bind(&d.notes)
    .bind(d.id)
    .execute(&mut **tx)
    .await?;
    if let Some((date, description)) = &done.next_step {
        insert_step_tx(tx, d.id, *date, description).await?;
    }
    Ok(true)
}

pub async fn touch_last_activity_tx(
    tx: &mut Transaction<'_, Sqlite>,
    membership_id: i64,
    today: NaiveDate,
) -> Result<()> {
    sqlx::query("UPDATE memberships SET last_activity = ? WHERE id = ?")
        .bind(today)
        .bind(membership_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Completed steps of a membership with the donor they belong to.
#[instrument(skip_all)]
pub async fn completed_steps_for_membership(pool: &Pool, membership_id: i64) -> Result<Vec<Step>> {
    let rows = sqlx::query(
        "SELECT s.* FROM steps s JOIN donors d ON d.id = s.donor_id \
         WHERE d.membership_id = ? AND s.completed IS NOT NULL ORDER BY s.completed, s.id",
    )
    .bind(membership_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(step_from_row).collect())
}

// ---- news ----

/// Creates or replaces the single story of a membership for `day`.
#[instrument(skip_all)]
pub async fn upsert_news(
    pool: &Pool,
    membership_id: i64,
    date: DateTime<Utc>,
    summary: &str,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query(
        "INSERT INTO news_items (membership_id, date, day, updated, summary) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (membership_id, day) DO UPDATE SET summary = excluded.summary, updated = excluded.updated \
         RETURNING id",
    )
    .bind(membership_id)
    .bind(date)
    .bind(date.date_naive())
    .bind(now)
    .bind(summary)
    .fetch_one(pool)
    .await
    .context("failed to save news item")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn news_for_project(pool: &Pool, project_id: i64) -> Result<Vec<NewsItem>> {
    let rows = sqlx::query(
        "SELECT n.* FROM news_items n JOIN memberships m ON m.id = n.membership_id \
         WHERE m.giving_project_id = ? ORDER BY n.date DESC, n.id DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| NewsItem {
            id: row.get("id"),
            membership_id: row.get("membership_id"),
            date: row.get("date"),
            updated: row.get("updated"),
            summary: row.get("summary"),
        })
        .collect())
}
