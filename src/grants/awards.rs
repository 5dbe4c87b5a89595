//! Giving-project awards, sponsored program grants and year-end report
//! reminders.
use super::WorkflowError;
use crate::config::Config;
use crate::db::awards::{self as repo, AwardFields};
use crate::db::grants as grants_repo;
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use crate::{mail, outbox};
use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, instrument};

pub const INVALID_DATE: &str = "Enter a valid date.";

/// Reminders go out this many days before a report is due.
pub const REMINDER_DAYS: [i64; 2] = [30, 7];

fn optional_date(form: &FormData, field: &str, errors: &mut FieldErrors) -> Option<NaiveDate> {
    let raw = form.text(field);
    if raw.is_empty() {
        return None;
    }
    let parsed = forms::parse_date(&raw);
    if parsed.is_none() {
        errors.add(field, INVALID_DATE);
    }
    parsed
}

fn amount(form: &FormData, errors: &mut FieldErrors) -> i64 {
    match forms::parse_whole_number(&form.text("amount")) {
        Ok(Some(v)) => v,
        Ok(None) => {
            errors.add("amount", forms::REQUIRED);
            0
        }
        Err(msg) => {
            errors.add("amount", msg);
            0
        }
    }
}

fn check_number(form: &FormData, errors: &mut FieldErrors) -> Option<i64> {
    forms::parse_int(&form.text("check_number")).unwrap_or_else(|msg| {
        errors.add("check_number", msg);
        None
    })
}

pub fn parse_award(form: &FormData) -> Result<AwardFields, FieldErrors> {
    let mut errors = FieldErrors::new();
    let fields = AwardFields {
        amount: amount(form, &mut errors),
        check_number: check_number(form, &mut errors),
        check_mailed: optional_date(form, "check_mailed", &mut errors),
        agreement_mailed: optional_date(form, "agreement_mailed", &mut errors),
        agreement_returned: optional_date(form, "agreement_returned", &mut errors),
        approved: optional_date(form, "approved", &mut errors),
    };
    errors.into_result()?;
    Ok(fields)
}

/// Awards a grant to an application through its giving project link.
#[instrument(skip_all)]
pub async fn create_award(pool: &Pool, projectapp_id: i64, form: &FormData) -> Result<i64, WorkflowError> {
    let link = grants_repo::get_project_app(pool, projectapp_id)
        .await?
        .ok_or(WorkflowError::NotFound("project application"))?;
    let fields = parse_award(form)?;
    let id = repo::create_award(pool, link.id, &fields).await?;
    info!(award_id = id, projectapp_id, amount = fields.amount, "award created");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn update_award(pool: &Pool, award_id: i64, form: &FormData) -> Result<(), WorkflowError> {
    let fields = parse_award(form)?;
    if !repo::update_award(pool, award_id, &fields).await? {
        return Err(WorkflowError::NotFound("award"));
    }
    info!(award_id, "award updated");
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_sponsored(pool: &Pool, org_id: i64, form: &FormData) -> Result<i64, WorkflowError> {
    grants_repo::get_organization(pool, org_id)
        .await?
        .ok_or(WorkflowError::NotFound("organization"))?;
    let mut errors = FieldErrors::new();
    let amount = amount(form, &mut errors);
    let check_number = check_number(form, &mut errors);
    let check_mailed = optional_date(form, "check_mailed", &mut errors);
    let approved = optional_date(form, "approved", &mut errors);
    errors.into_result()?;
    let id = repo::create_sponsored_grant(
        pool,
        org_id,
        amount,
        check_number,
        check_mailed,
        approved,
        &form.text("description"),
    )
    .await?;
    info!(id, org_id, amount, "sponsored program grant created");
    Ok(id)
}

/// Shows or hides a submitted report from giving-project members.
pub async fn set_report_visible(pool: &Pool, report_id: i64, visible: bool) -> Result<(), WorkflowError> {
    repo::get_report(pool, report_id)
        .await?
        .ok_or(WorkflowError::NotFound("year-end report"))?;
    repo::set_report_visible(pool, report_id, visible).await?;
    Ok(())
}

/// Whether a report due on `due` gets a reminder on `today`.
pub fn reminder_due(due: NaiveDate, today: NaiveDate) -> bool {
    REMINDER_DAYS.contains(&(due - today).num_days())
}

/// Emails organizations whose year-end report is due in exactly 30 or 7
/// days and has not been submitted.
#[instrument(skip_all)]
pub async fn yer_reminders(pool: &Pool, cfg: &Config, today: NaiveDate) -> Result<usize> {
    let mut sent = 0;
    for ctx in repo::awards_awaiting_report(pool).await? {
        let Some(due) = ctx.award.yearend_due() else {
            continue;
        };
        if !reminder_due(due, today) {
            continue;
        }
        let email = mail::yer_reminder(cfg, &ctx.org_email, &ctx.organization, due, ctx.award.id);
        outbox::queue_email(pool, &email).await?;
        info!(award_id = ctx.award.id, %due, "year-end report reminder queued");
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminders_fire_on_exact_days() {
        let today = NaiveDate::from_ymd_opt(2014, 5, 1).unwrap();
        assert!(reminder_due(NaiveDate::from_ymd_opt(2014, 5, 31).unwrap(), today));
        assert!(reminder_due(NaiveDate::from_ymd_opt(2014, 5, 8).unwrap(), today));
        assert!(!reminder_due(NaiveDate::from_ymd_opt(2014, 5, 30).unwrap(), today));
        assert!(!reminder_due(NaiveDate::from_ymd_opt(2014, 5, 9).unwrap(), today));
        assert!(!reminder_due(today, today));
    }

    #[test]
    fn award_form_parsing() {
        let form = FormData::from_pairs([
            ("amount", "5,000"),
            ("check_mailed", "04/09/2014"),
            ("agreement_mailed", "someday"),
        ]);
        let errors = parse_award(&form).unwrap_err();
        assert_eq!(errors.get("agreement_mailed").unwrap(), [INVALID_DATE]);

        let form = FormData::from_pairs([("amount", "5,000"), ("agreement_mailed", "2014-04-09")]);
        let fields = parse_award(&form).unwrap();
        assert_eq!(fields.amount, 5000);
        assert_eq!(fields.agreement_mailed, NaiveDate::from_ymd_opt(2014, 4, 9));
        assert!(parse_award(&FormData::default()).unwrap_err().has("amount"));
    }
}
