//! Cookie sessions and the guards built on them.
use super::error::AppError;
use super::AppState;
use crate::db::accounts;
use crate::db::fund as fund_repo;
use crate::db::model::{Account, GivingProject, Member, Membership, Organization};
use crate::fund::membership;
use crate::grants;
use crate::model::MembershipStatus;
use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const SESSION_COOKIE: &str = "session";

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
}

pub fn set_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; Max-Age=0")
}

/// The caller's session. `account` is who the request acts as: staff may
/// pass `?user=<email>` to act as that login, while `login` stays the
/// account that actually signed in.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub login: Option<Account>,
    pub account: Option<Account>,
}

impl Session {
    pub fn is_staff(&self) -> bool {
        self.login.as_ref().is_some_and(|a| a.is_staff)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Ok(Session::default());
        };
        let login = accounts::account_for_session(&state.pool, &token).await?;
        let mut account = login.clone();
        if let Some(staff) = login.as_ref().filter(|a| a.is_staff) {
            let params: HashMap<String, String> = Query::try_from_uri(&parts.uri)
                .map(|Query(q)| q)
                .unwrap_or_default();
            if let Some(email) = params.get("user").map(|e| e.trim().to_lowercase()) {
                match accounts::find_account_by_email(&state.pool, &email).await? {
                    Some(target) => {
                        debug!(staff = %staff.email, user = %email, "staff override");
                        account = Some(target);
                    }
                    None => warn!(staff = %staff.email, user = %email, "override user not found"),
                }
            }
        }
        Ok(Session {
            token: Some(token),
            login,
            account,
        })
    }
}

/// A logged-in member, approved or not.
#[derive(Debug, Clone)]
pub struct FundMember {
    pub account: Account,
    pub member: Member,
}

#[async_trait]
impl FromRequestParts<AppState> for FundMember {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let account = session.account.ok_or(AppError::Redirect("/fund/login"))?;
        let member = fund_repo::find_member_by_email(&state.pool, &account.email)
            .await?
            .ok_or(AppError::Redirect("/fund/not-member"))?;
        Ok(FundMember { account, member })
    }
}

/// A member with a resolved, approved membership.
#[derive(Debug, Clone)]
pub struct FundUser {
    pub account: Account,
    pub member: Member,
    pub membership: Membership,
    pub project: GivingProject,
}

#[async_trait]
impl FromRequestParts<AppState> for FundUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let account = session.account.ok_or(AppError::Redirect("/fund/login"))?;
        let resolution = membership::resolve(&state.pool, &account.email).await?;
        let (member, ship) = match resolution.status {
            MembershipStatus::NoMember => return Err(AppError::Redirect("/fund/not-member")),
            MembershipStatus::NoMembership => return Err(AppError::Redirect("/fund/projects")),
            MembershipStatus::Unapproved => return Err(AppError::Redirect("/fund/pending")),
            MembershipStatus::Approved => match resolution.approved() {
                Some((member, ship)) => (member.clone(), ship.clone()),
                None => return Err(AppError::Redirect("/fund/pending")),
            },
        };
        let project = fund_repo::get_project(&state.pool, ship.giving_project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("giving project not found".into()))?;
        Ok(FundUser {
            account,
            member,
            membership: ship,
            project,
        })
    }
}

/// A logged-in organization.
#[derive(Debug, Clone)]
pub struct OrgUser {
    pub account: Account,
    pub organization: Organization,
}

#[async_trait]
impl FromRequestParts<AppState> for OrgUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let account = session.account.ok_or(AppError::Redirect("/apply/login"))?;
        let organization = match grants::registration::organization_for(&state.pool, &account).await {
            Ok(org) => org,
            Err(grants::WorkflowError::Invalid(_)) => return Err(AppError::Redirect("/apply/login")),
            Err(err) => return Err(err.into()),
        };
        Ok(OrgUser {
            account,
            organization,
        })
    }
}

/// A signed-in staff account; overrides do not apply.
#[derive(Debug, Clone)]
pub struct Staff(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for Staff {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        match session.login {
            Some(account) if account.is_staff => Ok(Staff(account)),
            Some(_) => Err(AppError::Forbidden),
            None => Err(AppError::Redirect("/fund/login")),
        }
    }
}
