//! Contacts (donors) and the member and project pages built from them.
use super::{form_error, WorkflowError};
use crate::db::fund::{self as repo, DonorFields};
use crate::db::grants as grants_repo;
use crate::db::model::{
    Donor, GivingProject, GrantListItem, Membership, NewsItem, ProjectResource, Step,
};
use crate::db::Pool;
use crate::forms::{self, intcomma, FieldErrors, FormData};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};

pub const EMPTY_FORMSET: &str = "Please enter at least one contact.";
const LIKELIHOOD_MAX: &str = "Ensure this value is less than or equal to 100.";
const NOT_NEGATIVE: &str = "Ensure this value is greater than or equal to 0.";

/// Fundraising totals shown at the top of the member and project pages.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub contacts: i64,
    pub estimated: i64,
    pub talked: i64,
    pub asked: i64,
    pub promised: i64,
    pub received: i64,
    pub bar: i64,
    pub contactsremaining: i64,
    pub togo: i64,
    pub header: String,
}

fn tally(donors: &[Donor]) -> Progress {
    let mut p = Progress {
        contacts: donors.len() as i64,
        ..Progress::default()
    };
    for d in donors {
        p.estimated = p.estimated.saturating_add(d.estimated());
        if d.asked {
            p.asked += 1;
        } else if d.talked {
            p.talked += 1;
        }
        if d.received() > 0 {
            p.received = p.received.saturating_add(d.received());
        } else if let Some(promised) = d.promised {
            p.promised = p.promised.saturating_add(promised);
        }
    }
    p
}

/// Member progress: the goal is the sum of the contacts' estimates.
pub fn personal_progress(donors: &[Donor]) -> Progress {
    let mut p = tally(donors);
    if p.contacts == 0 {
        return p;
    }
    p.bar = 100 * p.asked / p.contacts;
    p.contactsremaining = p.contacts - p.talked - p.asked;
    p.togo = p.estimated.saturating_sub(p.promised).saturating_sub(p.received);
    p.header = format!("${} fundraising goal", intcomma(p.estimated));
    if p.togo < 0 {
        p.togo = 0;
        p.header = format!("${} raised", intcomma(p.promised.saturating_add(p.received)));
    }
    p
}

/// Project progress: the goal is the project's `fund_goal`.
pub fn project_progress(donors: &[Donor], fund_goal: i64) -> Progress {
    let mut p = tally(donors);
    p.estimated = 0;
    if p.contacts > 0 {
        p.bar = 100 * p.asked / p.contacts;
    }
    p.contactsremaining = p.contacts - p.talked - p.asked;
    p.togo = fund_goal.saturating_sub(p.promised).saturating_sub(p.received).max(0);
    p.header = format!("${} fundraising goal", intcomma(fund_goal));
    p
}

/// Placeholder dates that push donors without an upcoming step to the end,
/// asked before promised before received.
fn no_step_sort_date(donor: &Donor) -> NaiveDate {
    let ymd = |y| NaiveDate::from_ymd_opt(y, 1, 1).unwrap_or(NaiveDate::MAX);
    if donor.received() > 0 {
        ymd(2800)
    } else if donor.promised.is_some_and(|p| p > 0) {
        ymd(2700)
    } else if donor.asked {
        ymd(2600)
    } else {
        ymd(2500)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonorEntry {
    pub donor: Donor,
    pub next_step: Option<Step>,
    pub completed_steps: Vec<Step>,
    pub next_date: NaiveDate,
    pub overdue: bool,
}

/// Groups steps onto their donors and orders the donors by next date.
pub fn donor_entries(donors: Vec<Donor>, steps: &[Step], today: NaiveDate) -> (Vec<DonorEntry>, Vec<Step>) {
    let mut entries: Vec<DonorEntry> = donors
        .into_iter()
        .map(|donor| DonorEntry {
            next_date: no_step_sort_date(&donor),
            donor,
            next_step: None,
            completed_steps: Vec::new(),
            overdue: false,
        })
        .collect();
    let index: HashMap<i64, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.donor.id, i))
        .collect();

    let mut upcoming = Vec::new();
    for step in steps {
        let Some(&i) = index.get(&step.donor_id) else {
            continue;
        };
        let entry = &mut entries[i];
        if step.completed.is_some() {
            entry.completed_steps.push(step.clone());
        } else {
            entry.next_date = step.date;
            entry.overdue = step.date < today;
            entry.next_step = Some(step.clone());
            upcoming.push(step.clone());
        }
    }
    upcoming.sort_by_key(|s| s.date);
    entries.sort_by_key(|e| e.next_date);
    (entries, upcoming)
}

#[derive(Debug, Clone, Serialize)]
pub struct HomePage {
    pub header: String,
    pub membership_id: i64,
    pub donors: Vec<DonorEntry>,
    pub upcoming_steps: Vec<Step>,
    pub notification: String,
    pub progress: Progress,
    pub need_estimates: bool,
    pub require_estimates: bool,
    pub suggested_steps: Vec<String>,
    pub news: Vec<NewsItem>,
    pub grants: Vec<GrantListItem>,
}

/// Member home page. Reading it consumes the pending notification.
#[instrument(skip_all)]
pub async fn home(
    pool: &Pool,
    membership: &Membership,
    project: &GivingProject,
    now: DateTime<Utc>,
) -> Result<HomePage> {
    let donors = repo::donors_for_membership(pool, membership.id).await?;
    let steps = repo::steps_for_membership(pool, membership.id).await?;
    let require_estimates = project.require_estimates(now);
    let need_estimates = require_estimates && donors.iter().any(|d| d.amount.is_none());
    if need_estimates && donors.iter().any(|d| d.amount.is_some()) {
        warn!(membership_id = membership.id, "some contacts have estimates and some do not");
    }
    let progress = personal_progress(&donors);
    let (donors, upcoming_steps) = donor_entries(donors, &steps, now.date_naive());
    let notification = repo::take_notifications(pool, membership.id).await?;
    if !notification.is_empty() {
        info!(membership_id = membership.id, "displaying notification");
    }
    Ok(HomePage {
        header: project.title.clone(),
        membership_id: membership.id,
        donors,
        upcoming_steps,
        notification,
        progress,
        need_estimates,
        require_estimates,
        suggested_steps: project.suggested_steps().into_iter().map(String::from).collect(),
        news: repo::news_for_project(pool, project.id).await?,
        grants: grants_repo::grant_list_for_project(pool, project.id).await?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectPage {
    pub header: String,
    pub progress: Progress,
    pub news: Vec<NewsItem>,
    pub upcoming_steps: Vec<Step>,
    pub resources: BTreeMap<String, Vec<ProjectResource>>,
    pub grants: Vec<GrantListItem>,
}

#[instrument(skip_all)]
pub async fn project_page(
    pool: &Pool,
    membership: &Membership,
    project: &GivingProject,
) -> Result<ProjectPage> {
    let donors = repo::donors_for_project(pool, project.id).await?;
    let upcoming_steps: Vec<Step> = repo::steps_for_membership(pool, membership.id)
        .await?
        .into_iter()
        .filter(|s| s.completed.is_none())
        .take(2)
        .collect();
    let mut resources: BTreeMap<String, Vec<ProjectResource>> = BTreeMap::new();
    for r in repo::project_resources(pool, project.id).await? {
        resources.entry(r.session.clone()).or_default().push(r);
    }
    Ok(ProjectPage {
        header: project.title.clone(),
        progress: project_progress(&donors, project.fund_goal),
        news: repo::news_for_project(pool, project.id).await?,
        upcoming_steps,
        resources,
        grants: grants_repo::grant_list_for_project(pool, project.id).await?,
    })
}

// ---- contact forms ----

fn parse_amount(form: &FormData, key: &str, required: bool, errors: &mut FieldErrors) -> Option<i64> {
    match forms::parse_whole_number(&form.text(key)) {
        Ok(None) => {
            if required {
                errors.add(key, forms::REQUIRED);
            }
            None
        }
        Ok(Some(v)) => Some(v),
        Err(msg) => {
            if form.text(key).starts_with('-') {
                errors.add(key, NOT_NEGATIVE);
            } else {
                errors.add(key, msg);
            }
            None
        }
    }
}

fn parse_likelihood(form: &FormData, required: bool, errors: &mut FieldErrors) -> Option<i64> {
    match forms::parse_int(&form.text("likelihood")) {
        Ok(None) => {
            if required {
                errors.add("likelihood", forms::REQUIRED);
            }
            None
        }
        Ok(Some(v)) if v > 100 => {
            errors.add("likelihood", LIKELIHOOD_MAX);
            None
        }
        Ok(Some(v)) if v < 0 => {
            errors.add("likelihood", NOT_NEGATIVE);
            None
        }
        Ok(Some(v)) => Some(v),
        Err(msg) => {
            errors.add("likelihood", msg);
            None
        }
    }
}

/// Contact fields. `with_estimates` includes amount and likelihood, which
/// are then required when `require_estimates` holds.
pub fn parse_donor(
    form: &FormData,
    with_estimates: bool,
    require_estimates: bool,
) -> Result<DonorFields, FieldErrors> {
    let mut errors = FieldErrors::new();
    let firstname = form.text("firstname");
    if firstname.is_empty() {
        errors.add("firstname", forms::REQUIRED);
    } else if firstname.chars().count() > 100 {
        errors.add("firstname", "Ensure this value has at most 100 characters.");
    }
    let (amount, likelihood) = if with_estimates {
        (
            parse_amount(form, "amount", require_estimates, &mut errors),
            parse_likelihood(form, require_estimates, &mut errors),
        )
    } else {
        (None, None)
    };
    let email = form.text("email");
    if !email.is_empty() && !forms::is_valid_email(&email) {
        errors.add("email", forms::INVALID_EMAIL);
    }
    errors.into_result()?;
    Ok(DonorFields {
        firstname,
        lastname: form.text("lastname"),
        amount,
        likelihood,
        phone: form.text("phone"),
        email,
        notes: form.text("notes"),
    })
}

fn row_is_blank(row: &FormData) -> bool {
    row.raw().values().all(|v| v.trim().is_empty())
}

/// Adds one contact, or a `form-N-*` formset of contacts. Returns how many
/// were created.
#[instrument(skip_all)]
pub async fn add_contacts(
    pool: &Pool,
    membership: &Membership,
    project: &GivingProject,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<usize, WorkflowError> {
    repo::touch_last_activity(pool, membership.id, now.date_naive()).await?;
    let estimates = project.require_estimates(now);
    let rows = form.formset_rows(forms::MAX_FORMSET_ROWS)?;

    let mut contacts = Vec::new();
    if rows == 0 {
        contacts.push(parse_donor(form, estimates, estimates)?);
    } else {
        let mut errors = FieldErrors::new();
        for i in 0..rows {
            let row = form.formset_row(i);
            if row_is_blank(&row) {
                continue;
            }
            match parse_donor(&row, estimates, estimates) {
                Ok(fields) => contacts.push(fields),
                Err(row_errors) => errors.merge_prefixed(&format!("form-{i}-"), row_errors),
            }
        }
        errors.into_result()?;
        if contacts.is_empty() {
            return Err(form_error(EMPTY_FORMSET));
        }
    }

    for fields in &contacts {
        repo::insert_donor(pool, membership.id, fields).await?;
    }
    info!(membership_id = membership.id, count = contacts.len(), "contacts added");
    Ok(contacts.len())
}

#[instrument(skip_all)]
pub async fn edit_donor(
    pool: &Pool,
    membership: &Membership,
    project: &GivingProject,
    donor_id: i64,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    repo::touch_last_activity(pool, membership.id, now.date_naive()).await?;
    let donor = repo::get_donor(pool, donor_id, membership.id)
        .await?
        .ok_or(WorkflowError::NotFound("donor"))?;
    let estimates = project.require_estimates(now);
    let fields = parse_donor(form, estimates, false)?;
    repo::update_donor(pool, donor.id, &fields, !estimates).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_donor(
    pool: &Pool,
    membership: &Membership,
    donor_id: i64,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    repo::touch_last_activity(pool, membership.id, now.date_naive()).await?;
    let donor = repo::get_donor(pool, donor_id, membership.id)
        .await?
        .ok_or(WorkflowError::NotFound("donor"))?;
    repo::delete_donor(pool, donor.id).await?;
    info!(membership_id = membership.id, donor_id, "donor deleted");
    Ok(())
}

/// Donors still missing an estimate.
pub async fn estimate_candidates(pool: &Pool, membership_id: i64) -> Result<Vec<Donor>> {
    Ok(repo::donors_for_membership(pool, membership_id)
        .await?
        .into_iter()
        .filter(|d| d.amount.is_none())
        .collect())
}

/// Saves `form-N-donor/amount/likelihood` rows for donors without an amount.
#[instrument(skip_all)]
pub async fn add_estimates(
    pool: &Pool,
    membership: &Membership,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<usize, WorkflowError> {
    repo::touch_last_activity(pool, membership.id, now.date_naive()).await?;
    let candidates: HashMap<i64, Donor> = estimate_candidates(pool, membership.id)
        .await?
        .into_iter()
        .map(|d| (d.id, d))
        .collect();

    let mut errors = FieldErrors::new();
    let mut updates = Vec::new();
    for i in 0..form.formset_rows(forms::MAX_FORMSET_ROWS)? {
        let row = form.formset_row(i);
        let mut row_errors = FieldErrors::new();
        let donor_id = forms::parse_int(&row.text("donor")).ok().flatten();
        if !donor_id.is_some_and(|id| candidates.contains_key(&id)) {
            row_errors.add("donor", "Select a valid choice.");
        }
        let amount = parse_amount(&row, "amount", true, &mut row_errors);
        let likelihood = parse_likelihood(&row, true, &mut row_errors);
        match (donor_id, amount, likelihood) {
            (Some(id), Some(a), Some(l)) if row_errors.is_empty() => updates.push((id, a, l)),
            _ => errors.merge_prefixed(&format!("form-{i}-"), row_errors),
        }
    }
    errors.into_result()?;

    for (id, amount, likelihood) in &updates {
        repo::set_donor_estimates(pool, *id, *amount, *likelihood).await?;
    }
    Ok(updates.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor(id: i64) -> Donor {
        Donor {
            id,
            membership_id: 1,
            added: Utc::now(),
            firstname: format!("D{id}"),
            lastname: String::new(),
            amount: Some(1000),
            likelihood: Some(50),
            talked: false,
            asked: false,
            promised: None,
            received_this: 0,
            received_next: 0,
            received_afternext: 0,
            gift_notified: false,
            phone: String::new(),
            email: String::new(),
            notes: String::new(),
            next_step_id: None,
        }
    }

    #[test]
    fn progress_goal_and_raised_headers() {
        let mut a = donor(1);
        a.asked = true;
        let mut b = donor(2);
        b.talked = true;
        let p = personal_progress(&[a.clone(), b.clone(), donor(3), donor(4)]);
        assert_eq!(p.estimated, 2000);
        assert_eq!((p.asked, p.talked, p.contactsremaining), (1, 1, 2));
        assert_eq!(p.bar, 25);
        assert_eq!(p.togo, 2000);
        assert_eq!(p.header, "$2,000 fundraising goal");

        a.promised = Some(1500);
        b.received_this = 900;
        let p = personal_progress(&[a, b]);
        assert_eq!(p.togo, 0);
        assert_eq!(p.header, "$2,400 raised");
    }

    #[test]
    fn progress_saturates_on_huge_amounts() {
        let mut a = donor(1);
        a.amount = Some(i64::MAX);
        a.received_this = i64::MAX;
        a.received_next = i64::MAX;
        let mut b = donor(2);
        b.amount = Some(i64::MAX);
        b.promised = Some(i64::MAX);
        let p = personal_progress(&[a.clone(), b.clone()]);
        assert_eq!(p.estimated, i64::MAX);
        assert_eq!(p.received, i64::MAX);
        assert_eq!(p.togo, 0);
        assert_eq!(project_progress(&[a, b], 1000).togo, 0);
    }

    #[test]
    fn project_progress_uses_fund_goal() {
        let mut a = donor(1);
        a.promised = Some(300);
        let p = project_progress(&[a, donor(2)], 1000);
        assert_eq!(p.togo, 700);
        assert_eq!(p.header, "$1,000 fundraising goal");
        assert_eq!(project_progress(&[], 0).togo, 0);
    }

    #[test]
    fn donors_sort_by_next_step_then_status() {
        let today = NaiveDate::from_ymd_opt(2014, 3, 10).unwrap();
        let mut asked = donor(1);
        asked.asked = true;
        let mut promised = donor(2);
        promised.asked = true;
        promised.promised = Some(100);
        let mut gave = donor(3);
        gave.received_next = 50;
        let fresh = donor(4);
        let with_step = donor(5);
        let step = Step {
            id: 10,
            donor_id: 5,
            created: Utc::now(),
            date: NaiveDate::from_ymd_opt(2014, 3, 1).unwrap(),
            description: "call".into(),
            completed: None,
            asked: false,
            promised: None,
        };
        let (entries, upcoming) =
            donor_entries(vec![gave, promised, asked, fresh, with_step], &[step], today);
        let order: Vec<i64> = entries.iter().map(|e| e.donor.id).collect();
        assert_eq!(order, vec![5, 4, 1, 2, 3]);
        assert!(entries[0].overdue);
        assert_eq!(upcoming.len(), 1);
    }

    #[test]
    fn donor_form_limits() {
        let form = FormData::from_pairs([("firstname", "Ann"), ("likelihood", "120"), ("amount", "abc")]);
        let errors = parse_donor(&form, true, true).unwrap_err();
        assert_eq!(errors.get("likelihood").unwrap(), [LIKELIHOOD_MAX]);
        assert_eq!(errors.get("amount").unwrap(), [forms::INVALID_WHOLE_NUMBER]);

        let form = FormData::from_pairs([("firstname", "Ann"), ("amount", "1,000")]);
        let fields = parse_donor(&form, true, false).unwrap();
        assert_eq!(fields.amount, Some(1000));
        assert_eq!(fields.likelihood, None);
        assert!(parse_donor(&FormData::default(), false, false).unwrap_err().has("firstname"));
    }
}
