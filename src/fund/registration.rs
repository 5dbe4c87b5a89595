//! Member registration, login and project membership management.
use super::{form_error, WorkflowError};
use crate::auth::{self, LoginOutcome};
use crate::config::Config;
use crate::db::accounts;
use crate::db::fund as repo;
use crate::db::model::{Account, GivingProject, Member, MembershipSummary};
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use crate::{mail, outbox};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

pub const PASSWORD_MISMATCH: &str = "Passwords did not match.";
pub const MEMBER_EXISTS: &str = "That email is already registered. Log in instead.";
pub const ACCOUNT_EXISTS: &str = "That email is already registered through Social Justice Fund's online grant application. Please use a different email address.";
pub const ALREADY_IN_PROJECT: &str = "You are already registered with that giving project.";
pub const LOGIN_MISMATCH: &str = "Your login and password didn't match.";
pub const LOGIN_INACTIVE: &str = "Your account is not active. Contact an administrator.";
pub const WELCOME: &str = "Welcome to Project Central! I'm Odo, your Online Donor Organizing assistant. I'll be here to guide you through the fundraising process and cheer you on.";

#[derive(Debug, Clone)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub giving_project: Option<i64>,
}

/// Parses the registration form; emails are lowercased.
pub fn parse_register(form: &FormData) -> Result<RegisterForm, FieldErrors> {
    let mut errors = FieldErrors::new();
    let email = form.text("email").to_lowercase();
    if email.is_empty() {
        errors.add("email", forms::REQUIRED);
    } else if !forms::is_valid_email(&email) {
        errors.add("email", forms::INVALID_EMAIL);
    }
    for key in ["password", "passwordtwo", "first_name", "last_name"] {
        if form.text(key).is_empty() {
            errors.add(key, forms::REQUIRED);
        }
    }
    let password = form.raw().get("password").cloned().unwrap_or_default();
    let confirm = form.raw().get("passwordtwo").cloned().unwrap_or_default();
    if !password.is_empty() && !confirm.is_empty() && password != confirm {
        errors.add(super::FORM_ERROR, PASSWORD_MISMATCH);
    }
    let giving_project = match forms::parse_int(&form.text("giving_project")) {
        Ok(v) => v,
        Err(_) => {
            errors.add("giving_project", "Select a valid choice.");
            None
        }
    };
    errors.into_result()?;
    Ok(RegisterForm {
        email,
        password,
        first_name: form.text("first_name"),
        last_name: form.text("last_name"),
        giving_project,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub account_id: i64,
    pub member_id: i64,
    pub membership_id: Option<i64>,
    pub token: String,
}

/// Creates the login and member, plus a membership when a project was picked.
#[instrument(skip_all)]
pub async fn register(pool: &Pool, form: &RegisterForm) -> Result<Registration, WorkflowError> {
    if repo::find_member_by_email(pool, &form.email).await?.is_some() {
        info!(email = %form.email, "member tried to re-register");
        return Err(form_error(MEMBER_EXISTS));
    }
    if accounts::find_account_by_email(pool, &form.email).await?.is_some() {
        warn!(email = %form.email, "account exists without a member");
        return Err(form_error(ACCOUNT_EXISTS));
    }
    let project = match form.giving_project {
        Some(id) => Some(
            repo::get_project(pool, id)
                .await?
                .ok_or(WorkflowError::NotFound("giving project"))?,
        ),
        None => None,
    };

    let account_id = auth::create_account(
        pool,
        &form.email,
        &form.password,
        &form.first_name,
        &form.last_name,
        true,
    )
    .await?;
    let member_id =
        repo::create_member(pool, &form.email, &form.first_name, &form.last_name).await?;
    info!(member_id, "registration: account and member created");

    let mut membership_id = None;
    if let Some(project) = project {
        let id = repo::create_membership(pool, member_id, project.id, false, WELCOME).await?;
        repo::set_member_current(pool, member_id, id).await?;
        info!(member_id, project = %project.title, "registration: membership created");
        membership_id = Some(id);
    }

    let token = match auth::login(pool, &form.email, &form.password).await? {
        LoginOutcome::LoggedIn { token, .. } => token,
        other => {
            error!(?other, email = %form.email, "login failed right after registering");
            return Err(form_error(
                "There was a problem with your registration. Please contact a site admin for assistance.",
            ));
        }
    };
    Ok(Registration {
        account_id,
        member_id,
        membership_id,
        token,
    })
}

/// Fund login with the fund's wording for failures.
pub async fn login(pool: &Pool, email: &str, password: &str) -> Result<(Account, String), WorkflowError> {
    match auth::login(pool, &email.trim().to_lowercase(), password).await? {
        LoginOutcome::LoggedIn { account, token } => Ok((account, token)),
        LoginOutcome::Inactive => {
            warn!(email, "inactive account tried to log in");
            Err(form_error(LOGIN_INACTIVE))
        }
        LoginOutcome::NoAccount | LoginOutcome::WrongPassword => Err(form_error(LOGIN_MISMATCH)),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegisteredOutcome {
    /// Approved now or earlier; continue to the home page.
    Approved,
    Pending { project: String },
    /// The membership does not belong to the member.
    Missing,
}

/// Checks the new membership against the project's pre-approved list.
#[instrument(skip_all)]
pub async fn registered(
    pool: &Pool,
    member: &Member,
    ship_id: Option<i64>,
) -> Result<RegisteredOutcome> {
    let ship_id = ship_id.unwrap_or(member.current);
    let ship = match repo::get_membership(pool, ship_id).await? {
        Some(ship) if ship.member_id == member.id => ship,
        _ => {
            warn!(member_id = member.id, ship_id, "membership missing at registered");
            return Ok(RegisteredOutcome::Missing);
        }
    };
    if ship.approved {
        return Ok(RegisteredOutcome::Approved);
    }
    let Some(project) = repo::get_project(pool, ship.giving_project_id).await? else {
        return Ok(RegisteredOutcome::Missing);
    };
    if project
        .pre_approved_emails()
        .contains(&member.email.to_lowercase())
    {
        repo::set_membership_flags(pool, ship.id, true, ship.leader).await?;
        repo::set_member_current(pool, member.id, ship.id).await?;
        info!(member_id = member.id, project = %project.title, "pre-approval succeeded");
        return Ok(RegisteredOutcome::Approved);
    }
    Ok(RegisteredOutcome::Pending {
        project: project.title,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectsPage {
    pub memberships: Vec<MembershipSummary>,
    pub open_projects: Vec<GivingProject>,
}

pub async fn projects(pool: &Pool, member: &Member, today: NaiveDate) -> Result<ProjectsPage> {
    Ok(ProjectsPage {
        memberships: repo::membership_summaries(pool, member.id).await?,
        open_projects: repo::list_open_projects(pool, today).await?,
    })
}

/// Joins another project. Returns the new membership id.
#[instrument(skip_all)]
pub async fn add_project(pool: &Pool, member: &Member, form: &FormData) -> Result<i64, WorkflowError> {
    let project_id = match forms::parse_int(&form.text("giving_project")) {
        Ok(Some(id)) => id,
        _ => {
            let mut errors = FieldErrors::new();
            errors.add("giving_project", forms::REQUIRED);
            return Err(errors.into());
        }
    };
    let project = repo::get_project(pool, project_id)
        .await?
        .ok_or(WorkflowError::NotFound("giving project"))?;
    if repo::find_membership(pool, member.id, project.id).await?.is_some() {
        return Err(form_error(ALREADY_IN_PROJECT));
    }
    let id = repo::create_membership(pool, member.id, project.id, false, "").await?;
    info!(member_id = member.id, project = %project.title, "membership requested");
    Ok(id)
}

/// Switches the member's current membership. False when the membership is
/// not the member's own approved one.
#[instrument(skip_all)]
pub async fn set_current(pool: &Pool, member: &Member, ship_id: i64) -> Result<bool> {
    match repo::get_membership(pool, ship_id).await? {
        Some(ship) if ship.member_id == member.id && ship.approved => {
            repo::set_member_current(pool, member.id, ship.id).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Staff update of a membership. Approval queues a notice to the member.
#[instrument(skip_all)]
pub async fn update_membership(
    pool: &Pool,
    cfg: &Config,
    ship_id: i64,
    approved: bool,
    leader: bool,
) -> Result<(), WorkflowError> {
    let contact = repo::membership_contact(pool, ship_id)
        .await?
        .ok_or(WorkflowError::NotFound("membership"))?;
    repo::set_membership_flags(pool, ship_id, approved, leader).await?;
    if approved && !contact.membership.approved {
        let project = repo::get_project(pool, contact.membership.giving_project_id)
            .await?
            .ok_or(WorkflowError::NotFound("giving project"))?;
        outbox::queue_email(pool, &mail::membership_approved(cfg, &contact.email, &project.title))
            .await?;
        info!(ship_id, "membership approved, email queued");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_form_checks_password_confirmation() {
        let form = FormData::from_pairs([
            ("email", "Ann@Example.org"),
            ("password", "one"),
            ("passwordtwo", "two"),
            ("first_name", "Ann"),
            ("last_name", "Lee"),
        ]);
        let errors = parse_register(&form).unwrap_err();
        assert_eq!(errors.get(super::super::FORM_ERROR).unwrap(), [PASSWORD_MISMATCH]);

        let form = FormData::from_pairs([
            ("email", "Ann@Example.org"),
            ("password", "pw"),
            ("passwordtwo", "pw"),
            ("first_name", "Ann"),
            ("last_name", "Lee"),
            ("giving_project", ""),
        ]);
        let parsed = parse_register(&form).unwrap();
        assert_eq!(parsed.email, "ann@example.org");
        assert_eq!(parsed.giving_project, None);
    }
}
