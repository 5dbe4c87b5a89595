//! Year-end reports: the autosaved draft, photo uploads, submission and
//! viewing.
use super::drafts::FileLink;
use super::{field_error, WorkflowError};
use crate::config::Config;
use crate::db::awards as repo;
use crate::db::grants as grants_repo;
use crate::db::model::{Account, AwardContext, Organization, YearEndReport, YearEndReportData, YerDraft};
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use crate::model::{ViewPermission, YerFileField};
use crate::storage::{self, FileStore, StoredFile};
use crate::{mail, outbox};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

/// Narrative answers, all required.
pub const NARRATIVES: [&str; 8] = [
    "summarize_last_year",
    "goal_progress",
    "quantitative_measures",
    "evaluation",
    "achieved",
    "collaboration",
    "new_funding",
    "major_changes",
];

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YerView {
    Submitted { report_id: i64 },
    Draft {
        award: Box<AwardContext>,
        draft: Box<YerDraft>,
    },
}

async fn owned_award(pool: &Pool, org_id: i64, award_id: i64) -> Result<AwardContext, WorkflowError> {
    match repo::award_context(pool, award_id).await? {
        Some(ctx) if ctx.organization_id == org_id => Ok(ctx),
        _ => Err(WorkflowError::NotFound("award")),
    }
}

async fn draft_for(pool: &Pool, award_id: i64) -> Result<YerDraft, WorkflowError> {
    repo::find_yer_draft(pool, award_id)
        .await?
        .ok_or(WorkflowError::NotFound("year-end report draft"))
}

/// Opens the report draft for an award, creating it with contact details
/// filled in from the organization and its application.
#[instrument(skip_all)]
pub async fn open(pool: &Pool, org: &Organization, award_id: i64) -> Result<YerView, WorkflowError> {
    let ctx = owned_award(pool, org.id, award_id).await?;
    if let Some(report) = repo::report_for_award(pool, award_id).await? {
        return Ok(YerView::Submitted { report_id: report.id });
    }
    let draft = match repo::find_yer_draft(pool, award_id).await? {
        Some(draft) => draft,
        None => {
            let website = grants_repo::get_application(pool, ctx.application_id)
                .await?
                .map(|app| app.data.text.website)
                .unwrap_or_default();
            let email = if org.email_address.is_empty() {
                org.email.clone()
            } else {
                org.email_address.clone()
            };
            let mut contents = Map::new();
            contents.insert("website".into(), Value::String(website));
            contents.insert("email".into(), Value::String(email));
            contents.insert("phone".into(), Value::String(org.telephone_number.clone()));
            info!(award_id, org_id = org.id, "year-end report draft created");
            repo::create_yer_draft(pool, award_id, &contents).await?
        }
    };
    Ok(YerView::Draft {
        award: Box::new(ctx),
        draft: Box::new(draft),
    })
}

#[instrument(skip_all)]
pub async fn autosave(pool: &Pool, org_id: i64, award_id: i64, form: &FormData) -> Result<(), WorkflowError> {
    owned_award(pool, org_id, award_id).await?;
    let draft = draft_for(pool, award_id).await?;
    let contents: Map<String, Value> = form
        .raw()
        .iter()
        .filter(|(k, _)| YerFileField::parse(k).is_none() && k.as_str() != "user_id")
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    repo::save_yer_contents(pool, draft.id, &contents).await?;
    Ok(())
}

/// Stores a photo or release form on the report draft.
#[instrument(skip_all)]
pub async fn add_file(
    pool: &Pool,
    store: &FileStore,
    org_id: i64,
    award_id: i64,
    field: YerFileField,
    filename: &str,
    bytes: &[u8],
) -> Result<String, WorkflowError> {
    owned_award(pool, org_id, award_id).await?;
    let draft = draft_for(pool, award_id).await?;
    if !forms::allowed_file(filename) {
        return Err(field_error(field.as_str(), forms::UNSUPPORTED_FILE));
    }
    let reference = store.save(filename, bytes).await?;
    repo::set_yer_file(pool, draft.id, field, &reference).await?;
    let old = draft.file(field);
    if !old.is_empty() {
        if let Err(err) = store.delete(old).await {
            warn!(?err, award_id, "could not delete replaced report file");
        }
    }
    Ok(reference)
}

fn count(draft: &YerDraft, field: &str, required: bool, errors: &mut FieldErrors) -> Option<i64> {
    match forms::parse_whole_number(&draft.field(field)) {
        Ok(Some(v)) => Some(v),
        Ok(None) => {
            if required {
                errors.add(field, forms::REQUIRED);
            }
            None
        }
        Err(msg) => {
            errors.add(field, msg);
            None
        }
    }
}

/// Checks a report draft and produces the typed report.
pub fn validate(draft: &YerDraft) -> Result<YearEndReportData, FieldErrors> {
    let mut errors = FieldErrors::new();
    for field in ["email", "phone"].into_iter().chain(NARRATIVES) {
        if draft.field(field).is_empty() {
            errors.add(field, forms::REQUIRED);
        }
    }
    let email = draft.field("email");
    if !email.is_empty() && !forms::is_valid_email(&email) {
        errors.add("email", forms::INVALID_EMAIL);
    }
    let phone = match forms::normalize_phone(&draft.field("phone")) {
        Ok(phone) => phone,
        Err(msg) => {
            errors.add("phone", msg);
            String::new()
        }
    };
    let total_size = count(draft, "total_size", true, &mut errors);
    let donations_count = count(draft, "donations_count", true, &mut errors);
    let donations_count_prev = count(draft, "donations_count_prev", false, &mut errors);
    for field in [YerFileField::Photo1, YerFileField::PhotoRelease] {
        if draft.file(field).is_empty() {
            errors.add(field.as_str(), forms::REQUIRED);
        }
    }
    errors.into_result()?;

    let stay_informed = match draft.contents.get("stay_informed") {
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Object(Map::new()),
    };
    Ok(YearEndReportData {
        email,
        phone,
        website: draft.field("website"),
        contact_person: draft.field("contact_person"),
        summarize_last_year: draft.field("summarize_last_year"),
        goal_progress: draft.field("goal_progress"),
        quantitative_measures: draft.field("quantitative_measures"),
        evaluation: draft.field("evaluation"),
        achieved: draft.field("achieved"),
        collaboration: draft.field("collaboration"),
        new_funding: draft.field("new_funding"),
        major_changes: draft.field("major_changes"),
        total_size: total_size.unwrap_or_default(),
        donations_count: donations_count.unwrap_or_default(),
        donations_count_prev,
        photo1: draft.photo1.clone(),
        photo2: draft.photo2.clone(),
        photo_release: draft.photo_release.clone(),
        stay_informed,
    })
}

/// Submits the report draft: stores the report, deletes the draft and
/// queues a confirmation, all in one transaction.
#[instrument(skip_all)]
pub async fn submit(
    pool: &Pool,
    cfg: &Config,
    org: &Organization,
    award_id: i64,
    now: DateTime<Utc>,
) -> Result<i64, WorkflowError> {
    let ctx = owned_award(pool, org.id, award_id).await?;
    if repo::report_for_award(pool, award_id).await?.is_some() {
        return Err(field_error(super::FORM_ERROR, "A report was already submitted for this grant."));
    }
    let draft = draft_for(pool, award_id).await?;
    let data = validate(&draft)?;

    let mut tx = pool.begin().await?;
    let report_id = repo::insert_report_tx(&mut tx, award_id, &data, now).await?;
    repo::delete_yer_draft_tx(&mut tx, draft.id).await?;
    outbox::queue_email_tx(
        &mut tx,
        &mail::yer_submitted(cfg, &org.email, &org.name, &ctx.giving_project),
    )
    .await?;
    tx.commit().await?;
    info!(report_id, award_id, "year-end report submitted");
    Ok(report_id)
}

fn report_file_ref(data: &YearEndReportData, field: YerFileField) -> &str {
    match field {
        YerFileField::Photo1 => &data.photo1,
        YerFileField::Photo2 => &data.photo2,
        YerFileField::PhotoRelease => &data.photo_release,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub report: YearEndReport,
    pub award: AwardContext,
    pub files: Vec<FileLink>,
    pub perm: ViewPermission,
}

/// A submitted report. Project members see it only once staff make it
/// visible.
pub async fn view(
    pool: &Pool,
    account: Option<&Account>,
    report_id: i64,
) -> Result<ReportView, WorkflowError> {
    let report = repo::get_report(pool, report_id)
        .await?
        .ok_or(WorkflowError::NotFound("year-end report"))?;
    let award = repo::award_context(pool, report.award_id)
        .await?
        .ok_or(WorkflowError::NotFound("award"))?;
    let app = grants_repo::get_application(pool, award.application_id)
        .await?
        .ok_or(WorkflowError::NotFound("application"))?;
    let perm = super::view::view_permission(pool, account, &app).await?;
    let allowed = match perm {
        ViewPermission::Staff | ViewPermission::Creator => true,
        ViewPermission::ProjectMember => report.visible,
        ViewPermission::Anonymous => false,
    };
    if !allowed {
        return Err(WorkflowError::NotFound("year-end report"));
    }
    let files = YerFileField::ALL
        .into_iter()
        .filter_map(|field| {
            let reference = report_file_ref(&report.data, field);
            (!reference.is_empty()).then(|| FileLink {
                field: field.as_str(),
                label: field.as_str(),
                name: storage::display_name(reference).to_string(),
            })
        })
        .collect();
    Ok(ReportView {
        report,
        award,
        files,
        perm,
    })
}

/// A photo or release attached to a report the caller may view.
pub async fn file(
    pool: &Pool,
    store: &FileStore,
    account: Option<&Account>,
    report_id: i64,
    field: YerFileField,
) -> Result<StoredFile, WorkflowError> {
    let view = view(pool, account, report_id).await?;
    let reference = report_file_ref(&view.report.data, field);
    if reference.is_empty() {
        return Err(WorkflowError::NotFound("file"));
    }
    Ok(store.read(reference).await?)
}
