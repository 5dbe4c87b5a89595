//! Organization registration and login.
use super::{field_error, WorkflowError, FORM_ERROR};
use crate::auth::{self, LoginOutcome};
use crate::db::accounts;
use crate::db::grants as repo;
use crate::db::model::{Account, Organization};
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

pub const PASSWORD_MISMATCH: &str = "Passwords did not match.";
pub const EMAIL_TAKEN: &str = "That email is already registered. Log in instead.";
pub const NEEDS_APPROVAL: &str =
    "You have registered successfully but your account needs administrator approval.";
pub const WRONG_PASSWORD: &str = "Your password didn't match the one on file. Please try again.";
pub const INACTIVE: &str = "Your account is inactive. Please contact an administrator.";
pub const NO_ACCOUNT: &str = "Your email was not found in our system. Please register or try again.";
pub const NOT_AN_ORG: &str =
    "That login is not associated with an organization. Please contact an administrator.";

#[derive(Debug, Clone)]
pub struct OrgRegisterForm {
    pub organization: String,
    pub email: String,
    pub password: String,
}

pub fn parse_register(form: &FormData) -> Result<OrgRegisterForm, FieldErrors> {
    let mut errors = FieldErrors::new();
    let email = form.text("email").to_lowercase();
    for key in ["organization", "email", "password", "passwordtwo"] {
        if form.text(key).is_empty() {
            errors.add(key, forms::REQUIRED);
        }
    }
    if !email.is_empty() && !forms::is_valid_email(&email) {
        errors.add("email", forms::INVALID_EMAIL);
    }
    let password = form.raw().get("password").cloned().unwrap_or_default();
    let confirm = form.raw().get("passwordtwo").cloned().unwrap_or_default();
    if !password.is_empty() && !confirm.is_empty() && password != confirm {
        errors.add("password", PASSWORD_MISMATCH);
    }
    errors.into_result()?;
    Ok(OrgRegisterForm {
        organization: form.text("organization"),
        email,
        password,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrgRegistration {
    LoggedIn { organization_id: i64, token: String },
    /// Claimed an existing organization; staff must activate the login.
    PendingApproval { message: &'static str },
}

/// Creates the login. A name matching an existing organization attaches
/// the login to it but leaves the account inactive.
#[instrument(skip_all)]
pub async fn register(pool: &Pool, form: &OrgRegisterForm) -> Result<OrgRegistration, WorkflowError> {
    if accounts::find_account_by_email(pool, &form.email).await?.is_some()
        || repo::find_organization_by_email(pool, &form.email).await?.is_some()
    {
        return Err(field_error(FORM_ERROR, EMAIL_TAKEN));
    }

    if let Some(org) = repo::find_organization_by_name(pool, &form.organization).await? {
        auth::create_account(pool, &form.email, &form.password, &form.organization, "(organization)", false)
            .await?;
        repo::set_organization_email(pool, org.id, &form.email).await?;
        info!(org_id = org.id, email = %form.email, "matching org name found; login needs approval");
        return Ok(OrgRegistration::PendingApproval {
            message: NEEDS_APPROVAL,
        });
    }

    auth::create_account(pool, &form.email, &form.password, &form.organization, "(organization)", true)
        .await?;
    let organization_id = repo::create_organization(pool, &form.organization, &form.email).await?;
    info!(organization_id, "organization registered");

    match auth::login(pool, &form.email, &form.password).await? {
        LoginOutcome::LoggedIn { token, .. } => Ok(OrgRegistration::LoggedIn {
            organization_id,
            token,
        }),
        other => {
            error!(?other, email = %form.email, "password not working at registration");
            Err(field_error(
                FORM_ERROR,
                "There was a problem with your registration. Please contact a site admin for assistance.",
            ))
        }
    }
}

/// Organization login with the grants wording for failures.
#[instrument(skip_all)]
pub async fn login(pool: &Pool, email: &str, password: &str) -> Result<(Account, String), WorkflowError> {
    let email = email.trim().to_lowercase();
    match auth::login(pool, &email, password).await? {
        LoginOutcome::LoggedIn { account, token } => Ok((account, token)),
        LoginOutcome::WrongPassword => Err(field_error(FORM_ERROR, WRONG_PASSWORD)),
        LoginOutcome::Inactive => {
            warn!(email, "inactive organization login");
            Err(field_error(FORM_ERROR, INACTIVE))
        }
        LoginOutcome::NoAccount => Err(field_error(FORM_ERROR, NO_ACCOUNT)),
    }
}

/// The organization a login belongs to.
pub async fn organization_for(pool: &Pool, account: &Account) -> Result<Organization, WorkflowError> {
    repo::find_organization_by_email(pool, &account.email)
        .await?
        .ok_or_else(|| field_error(FORM_ERROR, NOT_AN_ORG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_is_reported_on_password() {
        let form = FormData::from_pairs([
            ("organization", "Org"),
            ("email", "Org@Example.org"),
            ("password", "a"),
            ("passwordtwo", "b"),
        ]);
        let errors = parse_register(&form).unwrap_err();
        assert_eq!(errors.get("password").unwrap(), [PASSWORD_MISMATCH]);
        assert_eq!(errors.len(), 1);
    }
}
