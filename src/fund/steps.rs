//! Outreach steps: scheduling, editing, bulk scheduling and completion.
use super::{form_error, WorkflowError};
use crate::db::fund::{self as repo, StepCompletion};
use crate::db::model::{Donor, Step};
use crate::db::{outbox as queue, Pool};
use crate::forms::{self, FieldErrors, FormData};
use crate::model::{OutboxKind, StepResponse};
use crate::outbox::StoryPayload;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

pub const HAS_UPCOMING_STEP: &str = "This contact already has an upcoming step.";
pub const DATE_FORMAT_MSG: &str = "Enter a date in mm/dd/yyyy format.";
pub const MASS_DATE_MSG: &str = "Please enter a date in mm/dd/yyyy format.";
pub const DESCRIPTION_MSG: &str = "Enter a description.";
/// Rows offered by the bulk step form.
pub const MASS_STEP_ROWS: usize = 10;

/// Date and description of a new or edited step.
pub fn parse_step_form(form: &FormData) -> Result<(NaiveDate, String), FieldErrors> {
    let mut errors = FieldErrors::new();
    let raw_date = form.text("date");
    let description = form.text("description");
    let date = if raw_date.is_empty() {
        errors.add("date", forms::REQUIRED);
        None
    } else {
        let parsed = forms::parse_date(&raw_date);
        if parsed.is_none() {
            errors.add("date", MASS_DATE_MSG);
        }
        parsed
    };
    if description.is_empty() {
        errors.add("description", forms::REQUIRED);
    } else if description.chars().count() > 255 {
        errors.add("description", "Ensure this value has at most 255 characters.");
    }
    match date {
        Some(date) if errors.is_empty() => Ok((date, description)),
        _ => Err(errors),
    }
}

async fn scoped_donor(pool: &Pool, membership_id: i64, donor_id: i64) -> Result<Donor, WorkflowError> {
    repo::get_donor(pool, donor_id, membership_id)
        .await?
        .ok_or(WorkflowError::NotFound("donor"))
}

#[instrument(skip_all)]
pub async fn add_step(
    pool: &Pool,
    membership_id: i64,
    donor_id: i64,
    form: &FormData,
) -> Result<i64, WorkflowError> {
    repo::touch_last_activity(pool, membership_id, Utc::now().date_naive()).await?;
    let donor = scoped_donor(pool, membership_id, donor_id).await?;
    if donor.next_step_id.is_some() {
        return Err(form_error(HAS_UPCOMING_STEP));
    }
    let (date, description) = parse_step_form(form)?;
    let step_id = repo::add_next_step(pool, donor.id, date, &description)
        .await?
        .ok_or_else(|| form_error(HAS_UPCOMING_STEP))?;
    info!(donor_id, step_id, "step added");
    Ok(step_id)
}

#[instrument(skip_all)]
pub async fn edit_step(
    pool: &Pool,
    membership_id: i64,
    donor_id: i64,
    step_id: i64,
    form: &FormData,
) -> Result<(), WorkflowError> {
    repo::touch_last_activity(pool, membership_id, Utc::now().date_naive()).await?;
    let step = incomplete_step(pool, membership_id, donor_id, step_id).await?;
    let (date, description) = parse_step_form(form)?;
    repo::update_step(pool, step.id, date, &description).await?;
    Ok(())
}

async fn incomplete_step(
    pool: &Pool,
    membership_id: i64,
    donor_id: i64,
    step_id: i64,
) -> Result<Step, WorkflowError> {
    let donor = scoped_donor(pool, membership_id, donor_id).await?;
    repo::get_step(pool, step_id, donor.id)
        .await?
        .filter(|s| s.completed.is_none())
        .ok_or(WorkflowError::NotFound("step"))
}

/// Donors offered in the bulk step form: no upcoming step, no promise, no
/// gift; newest first.
#[instrument(skip_all)]
pub async fn mass_step_candidates(pool: &Pool, membership_id: i64) -> Result<Vec<Donor>, WorkflowError> {
    let mut donors = repo::donors_for_membership(pool, membership_id).await?;
    donors.sort_by(|a, b| b.added.cmp(&a.added).then(b.id.cmp(&a.id)));
    Ok(donors
        .into_iter()
        .filter(|d| d.next_step_id.is_none() && d.promised.is_none() && d.received() == 0)
        .take(MASS_STEP_ROWS)
        .collect())
}

/// Schedules steps for several donors at once. Rows are `form-N-donor`,
/// `form-N-date` and `form-N-description`; fully blank rows are skipped.
#[instrument(skip_all)]
pub async fn mass_step(pool: &Pool, membership_id: i64, form: &FormData) -> Result<usize, WorkflowError> {
    repo::touch_last_activity(pool, membership_id, Utc::now().date_naive()).await?;
    let mut errors = FieldErrors::new();
    let mut rows = Vec::new();
    for i in 0..form.formset_rows(MASS_STEP_ROWS)? {
        let row = form.formset_row(i);
        let mut row_errors = FieldErrors::new();
        let raw_date = row.text("date");
        let description = row.text("description");
        let date = forms::parse_date(&raw_date);
        if !raw_date.is_empty() && date.is_none() {
            row_errors.add("date", MASS_DATE_MSG);
        }
        match (raw_date.is_empty(), description.is_empty()) {
            (true, true) => continue,
            (false, true) => row_errors.add("description", DESCRIPTION_MSG),
            (true, false) => row_errors.add("date", MASS_DATE_MSG),
            (false, false) => {}
        }
        let donor_id = match forms::parse_int(&row.text("donor")) {
            Ok(Some(id)) => Some(id),
            _ => {
                row_errors.add("donor", forms::REQUIRED);
                None
            }
        };
        if row_errors.is_empty() {
            if let (Some(donor_id), Some(date)) = (donor_id, date) {
                rows.push((donor_id, date, description));
            }
        } else {
            errors.merge_prefixed(&format!("form-{i}-"), row_errors);
        }
    }
    errors.into_result()?;

    let mut added = 0;
    for (donor_id, date, description) in rows {
        let donor = scoped_donor(pool, membership_id, donor_id).await?;
        if repo::add_next_step(pool, donor.id, date, &description).await?.is_some() {
            added += 1;
        }
    }
    info!(membership_id, added, "mass steps added");
    Ok(added)
}

/// Parsed completion form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDone {
    pub asked: bool,
    pub response: StepResponse,
    pub promised_amount: Option<i64>,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub notes: String,
    pub next_step: Option<(NaiveDate, String)>,
}

pub fn parse_step_done(form: &FormData) -> Result<StepDone, FieldErrors> {
    let mut errors = FieldErrors::new();
    let response = StepResponse::parse_code(&form.text("response")).unwrap_or_else(|| {
        errors.add("response", "Select a valid choice.");
        StepResponse::Unsure
    });
    let promised_amount = match forms::parse_whole_number(&form.text("promised_amount")) {
        Ok(v) => v,
        Err(msg) => {
            if form.text("promised_amount").trim_start().starts_with('-') {
                errors.add("promised_amount", "Promise amounts cannot be negative");
            } else {
                errors.add("promised_amount", msg);
            }
            None
        }
    };
    let last_name = form.text("last_name");
    let phone = form.text("phone");
    let email = form.text("email");
    if !email.is_empty() && !forms::is_valid_email(&email) {
        errors.add("email", forms::INVALID_EMAIL);
    }

    if response == StepResponse::Promised {
        if promised_amount.unwrap_or(0) == 0 && !errors.has("promised_amount") {
            errors.add("promised_amount", "Enter an amount.");
        }
        if last_name.is_empty() {
            errors.add("last_name", "Enter a last name.");
        }
        if phone.is_empty() && email.is_empty() {
            errors.add("phone", forms::PHONE_OR_EMAIL);
        }
    }

    let next_desc = form.text("next_step");
    let raw_next_date = form.text("next_step_date");
    let next_date = forms::parse_date(&raw_next_date);
    if !raw_next_date.is_empty() && next_date.is_none() {
        errors.add("next_step_date", MASS_DATE_MSG);
    }
    let next_step = match (next_desc.is_empty(), next_date) {
        (false, Some(date)) => Some((date, next_desc)),
        (false, None) => {
            if !errors.has("next_step_date") {
                errors.add("next_step_date", DATE_FORMAT_MSG);
            }
            None
        }
        (true, Some(_)) => {
            errors.add("next_step", DESCRIPTION_MSG);
            None
        }
        (true, None) => None,
    };

    errors.into_result()?;
    Ok(StepDone {
        asked: form.flag("asked"),
        response,
        promised_amount,
        last_name,
        phone,
        email,
        notes: form.text("notes"),
        next_step,
    })
}

/// Applies a validated completion to a donor; returns the step's asked flag
/// and promise.
pub fn apply_completion(donor: &mut Donor, done: &StepDone) -> (bool, Option<i64>) {
    let mut step_asked = false;
    let mut step_promised = None;
    donor.talked = true;
    donor.notes = done.notes.clone();
    donor.next_step_id = None;
    if done.asked {
        if !donor.asked {
            step_asked = true;
            donor.asked = true;
        }
        match done.response {
            StepResponse::Declined => {
                donor.promised = Some(0);
                step_promised = Some(0);
            }
            StepResponse::Promised => {
                if let Some(amount) = done.promised_amount.filter(|a| *a > 0) {
                    if donor.promised.unwrap_or(0) == 0 {
                        step_promised = Some(amount);
                        donor.promised = Some(amount);
                        donor.lastname = done.last_name.clone();
                        if !done.phone.is_empty() {
                            donor.phone = done.phone.clone();
                        }
                        if !done.email.is_empty() {
                            donor.email = done.email.clone();
                        }
                    }
                }
            }
            StepResponse::Unsure => {}
        }
    }
    (step_asked, step_promised)
}

/// Marks a step complete, updates the donor, schedules the next step and
/// queues the day's story recomputation, all in one transaction.
#[instrument(skip_all)]
pub async fn complete_step(
    pool: &Pool,
    membership_id: i64,
    donor_id: i64,
    step_id: i64,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    repo::touch_last_activity(pool, membership_id, now.date_naive()).await?;
    let step = incomplete_step(pool, membership_id, donor_id, step_id).await?;
    let mut donor = scoped_donor(pool, membership_id, donor_id).await?;
    let done = parse_step_done(form)?;

    let (step_asked, step_promised) = apply_completion(&mut donor, &done);
    let completion = StepCompletion {
        completed: now,
        step_asked,
        step_promised,
        donor,
        next_step: done.next_step.clone(),
    };

    let mut tx = pool.begin().await?;
    if !repo::complete_step_tx(&mut tx, step.id, &completion).await? {
        return Err(WorkflowError::NotFound("step"));
    }
    repo::touch_last_activity_tx(&mut tx, membership_id, now.date_naive()).await?;
    let payload = serde_json::to_value(StoryPayload { timestamp: now }).map_err(anyhow::Error::from)?;
    queue::enqueue_tx(&mut tx, OutboxKind::UpdateStory, membership_id, &payload, now).await?;
    tx.commit().await?;
    info!(donor_id, step_id, asked = done.asked, "step completed");
    Ok(())
}

/// Initial values for the completion form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepDoneDefaults {
    pub asked: bool,
    pub response: i64,
    pub promised_amount: Option<i64>,
    pub notes: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
}

pub fn done_defaults(donor: &Donor) -> StepDoneDefaults {
    let (response, promised_amount) = match donor.promised {
        Some(0) => (StepResponse::Declined, None),
        Some(p) => (StepResponse::Promised, Some(p)),
        None => (StepResponse::Unsure, None),
    };
    StepDoneDefaults {
        asked: donor.asked,
        response: response.as_code(),
        promised_amount,
        notes: donor.notes.clone(),
        last_name: donor.lastname.clone(),
        phone: donor.phone.clone(),
        email: donor.email.clone(),
    }
}

#[instrument(skip_all)]
pub async fn completion_defaults(
    pool: &Pool,
    membership_id: i64,
    donor_id: i64,
    step_id: i64,
) -> Result<StepDoneDefaults, WorkflowError> {
    let step = incomplete_step(pool, membership_id, donor_id, step_id).await?;
    let donor = scoped_donor(pool, membership_id, step.donor_id).await?;
    Ok(done_defaults(&donor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor() -> Donor {
        Donor {
            id: 1,
            membership_id: 1,
            added: Utc::now(),
            firstname: "Ann".into(),
            lastname: String::new(),
            amount: Some(100),
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
            next_step_id: Some(9),
        }
    }

    #[test]
    fn promise_without_details_reports_three_fields() {
        let form = FormData::from_pairs([("asked", "on"), ("response", "1"), ("promised_amount", "")]);
        let errors = parse_step_done(&form).unwrap_err();
        assert_eq!(errors.get("promised_amount").unwrap(), ["Enter an amount."]);
        assert_eq!(errors.get("last_name").unwrap(), ["Enter a last name."]);
        assert_eq!(errors.get("phone").unwrap(), [forms::PHONE_OR_EMAIL]);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn next_step_needs_date_and_description() {
        let form = FormData::from_pairs([("response", "2"), ("next_step", "Call again")]);
        let errors = parse_step_done(&form).unwrap_err();
        assert_eq!(errors.get("next_step_date").unwrap(), [DATE_FORMAT_MSG]);

        let form = FormData::from_pairs([("response", "2"), ("next_step_date", "03/04/2014")]);
        let errors = parse_step_done(&form).unwrap_err();
        assert_eq!(errors.get("next_step").unwrap(), [DESCRIPTION_MSG]);
    }

    #[test]
    fn negative_promise_is_rejected() {
        let form = FormData::from_pairs([("response", "2"), ("promised_amount", "-5")]);
        let errors = parse_step_done(&form).unwrap_err();
        assert_eq!(
            errors.get("promised_amount").unwrap(),
            ["Promise amounts cannot be negative"]
        );
    }

    #[test]
    fn decline_zeroes_promise_regardless_of_amount() {
        let form = FormData::from_pairs([
            ("asked", "on"),
            ("response", "3"),
            ("promised_amount", "500"),
            ("notes", "not this year"),
        ]);
        let done = parse_step_done(&form).unwrap();
        let mut d = donor();
        let (asked, promised) = apply_completion(&mut d, &done);
        assert!(asked && d.asked && d.talked);
        assert_eq!(promised, Some(0));
        assert_eq!(d.promised, Some(0));
        assert_eq!(d.notes, "not this year");
        assert_eq!(d.next_step_id, None);
    }

    #[test]
    fn promise_updates_contact_details() {
        let form = FormData::from_pairs([
            ("asked", "on"),
            ("response", "1"),
            ("promised_amount", "1,200"),
            ("last_name", "Lee"),
            ("email", "ann@example.org"),
        ]);
        let done = parse_step_done(&form).unwrap();
        let mut d = donor();
        d.phone = "206-555-0100".into();
        let (_, promised) = apply_completion(&mut d, &done);
        assert_eq!(promised, Some(1200));
        assert_eq!(d.promised, Some(1200));
        assert_eq!(d.lastname, "Lee");
        assert_eq!(d.phone, "206-555-0100");
        assert_eq!(d.email, "ann@example.org");
    }

    #[test]
    fn defaults_follow_prior_promise() {
        let mut d = donor();
        assert_eq!(done_defaults(&d).response, 2);
        d.promised = Some(0);
        assert_eq!(done_defaults(&d).response, 3);
        d.promised = Some(40);
        let defaults = done_defaults(&d);
        assert_eq!((defaults.response, defaults.promised_amount), (1, Some(40)));
    }
}
