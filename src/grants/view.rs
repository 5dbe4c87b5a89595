//! Reading submitted applications and their attachments.
use super::drafts::{file_links, FileLink};
use super::WorkflowError;
use crate::db::grants as repo;
use crate::db::model::{Account, GrantApplication, GrantCycle, Organization, ProjectApp};
use crate::db::Pool;
use crate::model::{FileField, ViewPermission};
use crate::storage::{FileStore, StoredFile};
use anyhow::Result;
use serde::Serialize;
use tracing::instrument;

/// How much of an application the caller may see.
#[instrument(skip_all)]
pub async fn view_permission(
    pool: &Pool,
    account: Option<&Account>,
    app: &GrantApplication,
) -> Result<ViewPermission> {
    let Some(account) = account else {
        return Ok(ViewPermission::Anonymous);
    };
    if account.is_staff {
        return Ok(ViewPermission::Staff);
    }
    if let Some(org) = repo::get_organization(pool, app.organization_id).await? {
        if !org.email.is_empty() && org.email.eq_ignore_ascii_case(&account.email) {
            return Ok(ViewPermission::Creator);
        }
    }
    if repo::assigned_membership_for(pool, &account.email, app.id)
        .await?
        .is_some()
    {
        return Ok(ViewPermission::ProjectMember);
    }
    Ok(ViewPermission::Anonymous)
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    pub application: GrantApplication,
    pub organization: Organization,
    pub cycle: GrantCycle,
    pub projects: Vec<ProjectApp>,
    pub files: Vec<FileLink>,
    pub perm: ViewPermission,
}

/// Application fields with file links and the caller's permission.
/// Staff-only project assignments are left out for everyone else.
pub async fn application(
    pool: &Pool,
    account: Option<&Account>,
    app_id: i64,
) -> Result<ApplicationView, WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let organization = repo::get_organization(pool, app.organization_id)
        .await?
        .ok_or(WorkflowError::NotFound("organization"))?;
    let cycle = repo::get_cycle(pool, app.grant_cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("grant cycle"))?;
    let perm = view_permission(pool, account, &app).await?;
    let projects = if perm == ViewPermission::Staff {
        repo::project_apps_for_application(pool, app.id).await?
    } else {
        Vec::new()
    };
    Ok(ApplicationView {
        files: file_links(&app.data.files),
        application: app,
        organization,
        cycle,
        projects,
        perm,
    })
}

/// An application attachment for anyone allowed past anonymous.
pub async fn file(
    pool: &Pool,
    store: &FileStore,
    account: Option<&Account>,
    app_id: i64,
    field: FileField,
) -> Result<StoredFile, WorkflowError> {
    let app = repo::get_application(pool, app_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    if view_permission(pool, account, &app).await? == ViewPermission::Anonymous {
        return Err(WorkflowError::NotFound("application"));
    }
    let reference = app.data.files.get(field);
    if reference.is_empty() {
        return Err(WorkflowError::NotFound("file"));
    }
    Ok(store.read(reference).await?)
}
