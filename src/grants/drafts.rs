//! Draft applications: the apply page, autosave, uploads, copying to a new
//! cycle, discarding, and the closing-soon reminder.
use super::application::draft_contents;
use super::{field_error, WorkflowError};
use crate::config::Config;
use crate::db::grants as repo;
use crate::db::model::{Draft, FileRefs, GrantCycle, Organization};
use crate::db::Pool;
use crate::forms::{self, FieldErrors, FormData};
use crate::model::{CycleStatus, FileField};
use crate::storage::{self, FileStore, StoredFile};
use crate::{mail, outbox};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

pub const CYCLE_CLOSED: &str = "That cycle has closed. Select a different one.";
pub const SELECT_ONE: &str = "Select one.";
pub const SELECT_ONLY_ONE: &str = "Select only one.";
pub const CYCLE_TAKEN: &str =
    "This organization already has an application or draft for that grant cycle.";

/// Form keys that steer autosave rather than being saved.
const CONTROL_KEYS: [&str; 2] = ["user_id", "override"];

#[derive(Debug, Clone, Serialize)]
pub struct FileLink {
    pub field: &'static str,
    pub label: &'static str,
    pub name: String,
}

pub fn file_links(files: &FileRefs) -> Vec<FileLink> {
    files
        .iter()
        .map(|(field, reference)| FileLink {
            field: field.as_str(),
            label: field.label(),
            name: storage::display_name(reference).to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftPage {
    pub draft: Draft,
    pub cycle: GrantCycle,
    /// Someone saved within the edit window; warns of multiple editors.
    pub flag: bool,
    pub overdue: bool,
    pub files: Vec<FileLink>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyView {
    AlreadyApplied { cycle: String },
    Closed { cycle: String },
    Draft(Box<DraftPage>),
}

/// Contents a fresh draft starts from.
pub fn profile_contents(org: &Organization) -> Map<String, Value> {
    let mut contents = Map::new();
    for column in Organization::PROFILE_TEXT {
        if column == "fiscal_letter" {
            continue;
        }
        if let Some(value) = org.profile_text(column) {
            contents.insert(column.to_string(), Value::String(value.to_string()));
        }
    }
    if let Some(founded) = org.founded {
        contents.insert("founded".into(), Value::from(founded));
    }
    contents
}

/// Copies every stored file so the new owner never shares a reference.
/// Files missing from the store are left out.
pub(crate) async fn copy_files(store: &FileStore, files: &FileRefs, skip: &[FileField]) -> FileRefs {
    let mut copied = FileRefs::default();
    for (field, reference) in files.iter() {
        if skip.contains(&field) {
            continue;
        }
        match store.copy(reference).await {
            Ok(new_ref) => copied.set(field, new_ref),
            Err(err) => warn!(?err, field = field.as_str(), "could not copy stored file"),
        }
    }
    copied
}

pub(crate) async fn delete_files(store: &FileStore, files: &FileRefs) {
    for (field, reference) in files.iter() {
        if let Err(err) = store.delete(reference).await {
            warn!(?err, field = field.as_str(), "could not delete stored file");
        }
    }
}

async fn cycle(pool: &Pool, cycle_id: i64) -> Result<GrantCycle, WorkflowError> {
    repo::get_cycle(pool, cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("grant cycle"))
}

/// A draft of the organization; anyone else's draft reads as missing.
pub(crate) async fn owned_draft(pool: &Pool, org_id: i64, draft_id: i64) -> Result<Draft, WorkflowError> {
    match repo::get_draft(pool, draft_id).await? {
        Some(draft) if draft.organization_id == org_id => Ok(draft),
        _ => Err(WorkflowError::NotFound("draft")),
    }
}

/// Loads or creates the organization's draft for a cycle.
#[instrument(skip_all)]
pub async fn open_draft(
    pool: &Pool,
    store: &FileStore,
    org: &Organization,
    cycle_id: i64,
    now: DateTime<Utc>,
) -> Result<ApplyView, WorkflowError> {
    let cycle = cycle(pool, cycle_id).await?;
    if repo::application_exists(pool, org.id, cycle.id).await? {
        return Ok(ApplyView::AlreadyApplied { cycle: cycle.title });
    }

    let (draft, fresh) = match repo::find_draft(pool, org.id, cycle.id).await? {
        Some(draft) if draft.contents.is_empty() => {
            repo::save_draft_contents(pool, draft.id, &profile_contents(org), "", draft.modified)
                .await?;
            let seeded = repo::get_draft(pool, draft.id)
                .await?
                .ok_or(WorkflowError::NotFound("draft"))?;
            (seeded, true)
        }
        Some(draft) => (draft, false),
        None => {
            if cycle.status(now) != CycleStatus::Open {
                return Ok(ApplyView::Closed { cycle: cycle.title });
            }
            let mut files = FileRefs::default();
            if !org.fiscal_letter.is_empty() {
                let mut letter = FileRefs::default();
                letter.set(FileField::FiscalLetter, org.fiscal_letter.clone());
                files = copy_files(store, &letter, &[]).await;
            }
            let created =
                repo::insert_draft(pool, org.id, cycle.id, &profile_contents(org), &files).await?;
            if created.is_none() {
                delete_files(store, &files).await;
            }
            info!(org_id = org.id, cycle_id = cycle.id, created = created.is_some(), "draft opened");
            let draft = repo::find_draft(pool, org.id, cycle.id)
                .await?
                .ok_or(WorkflowError::NotFound("draft"))?;
            (draft, created.is_some())
        }
    };

    if !draft.editable(cycle.close, now) {
        return Ok(ApplyView::Closed { cycle: cycle.title });
    }
    let files = file_links(&draft.files);
    Ok(ApplyView::Draft(Box::new(DraftPage {
        flag: !fresh && draft.recently_edited(now),
        overdue: draft.overdue(cycle.close, now),
        files,
        draft,
        cycle,
    })))
}

/// Posted fields as draft contents, minus the autosave control keys and
/// file columns.
pub fn contents_from_form(form: &FormData) -> Map<String, Value> {
    form.raw()
        .iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()) && FileField::parse(k).is_none())
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Replaces the draft contents with the posted fields. A different editor
/// saving inside the edit window is a conflict unless `override` is set.
#[instrument(skip_all)]
pub async fn autosave(
    pool: &Pool,
    org_id: i64,
    cycle_id: i64,
    form: &FormData,
    now: DateTime<Utc>,
) -> Result<(), WorkflowError> {
    let cycle = cycle(pool, cycle_id).await?;
    let draft = repo::find_draft(pool, org_id, cycle.id)
        .await?
        .ok_or(WorkflowError::NotFound("draft"))?;
    if !draft.editable(cycle.close, now) {
        return Err(WorkflowError::Closed);
    }
    let user_id = form.text("user_id");
    let force = form.flag("override");
    if !force
        && draft.recently_edited(now)
        && !draft.modified_by.is_empty()
        && draft.modified_by != user_id
    {
        info!(draft_id = draft.id, "autosave conflict with another editor");
        return Err(WorkflowError::EditConflict);
    }
    repo::save_draft_contents(pool, draft.id, &contents_from_form(form), &user_id, now).await?;
    Ok(())
}

/// Stores an upload in one of the draft's file fields and returns its
/// reference. The replaced file, if any, is deleted.
#[instrument(skip_all)]
pub async fn add_file(
    pool: &Pool,
    store: &FileStore,
    org_id: i64,
    draft_id: i64,
    field: FileField,
    filename: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> Result<String, WorkflowError> {
    let draft = owned_draft(pool, org_id, draft_id).await?;
    let cycle = cycle(pool, draft.grant_cycle_id).await?;
    if !draft.editable(cycle.close, now) {
        return Err(WorkflowError::Closed);
    }
    if !forms::allowed_file(filename) {
        return Err(field_error(field.as_str(), forms::UNSUPPORTED_FILE));
    }
    let reference = store.save(filename, bytes).await?;
    repo::set_draft_file(pool, draft.id, field, &reference).await?;
    let old = draft.files.get(field);
    if !old.is_empty() {
        if let Err(err) = store.delete(old).await {
            warn!(?err, draft_id, "could not delete replaced upload");
        }
    }
    info!(draft_id, field = field.as_str(), "draft file uploaded");
    Ok(reference)
}

#[instrument(skip_all)]
pub async fn remove_file(
    pool: &Pool,
    store: &FileStore,
    org_id: i64,
    draft_id: i64,
    field: FileField,
) -> Result<(), WorkflowError> {
    let draft = owned_draft(pool, org_id, draft_id).await?;
    let old = draft.files.get(field);
    if old.is_empty() {
        return Ok(());
    }
    repo::set_draft_file(pool, draft.id, field, "").await?;
    if let Err(err) = store.delete(old).await {
        warn!(?err, draft_id, "could not delete removed upload");
    }
    Ok(())
}

/// Bytes of a draft upload, for the owning organization or staff.
pub async fn read_file(
    pool: &Pool,
    store: &FileStore,
    draft_id: i64,
    field: FileField,
    org_id: Option<i64>,
    staff: bool,
) -> Result<StoredFile, WorkflowError> {
    let draft = repo::get_draft(pool, draft_id)
        .await?
        .ok_or(WorkflowError::NotFound("draft"))?;
    if !staff && org_id != Some(draft.organization_id) {
        return Err(WorkflowError::NotFound("draft"));
    }
    let reference = draft.files.get(field);
    if reference.is_empty() {
        return Err(WorkflowError::NotFound("file"));
    }
    Ok(store.read(reference).await?)
}

/// The organization's pick on the copy form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySource {
    Application(i64),
    Draft(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyForm {
    pub cycle: i64,
    pub source: CopySource,
}

pub fn parse_copy(form: &FormData) -> Result<CopyForm, FieldErrors> {
    let mut errors = FieldErrors::new();
    let cycle = match forms::parse_int(&form.text("cycle")) {
        Ok(Some(id)) => Some(id),
        _ => {
            errors.add("cycle", forms::REQUIRED);
            None
        }
    };
    let app = forms::parse_int(&form.text("application")).ok().flatten();
    let draft = forms::parse_int(&form.text("draft")).ok().flatten();
    let source = match (app, draft) {
        (Some(id), None) => Some(CopySource::Application(id)),
        (None, Some(id)) => Some(CopySource::Draft(id)),
        (None, None) => {
            errors.add("draft", SELECT_ONE);
            None
        }
        (Some(_), Some(_)) => {
            errors.add("draft", SELECT_ONLY_ONE);
            None
        }
    };
    errors.into_result()?;
    match (cycle, source) {
        (Some(cycle), Some(source)) => Ok(CopyForm { cycle, source }),
        _ => Err(FieldErrors::new()),
    }
}

/// Starts a draft for another cycle from one of the organization's
/// applications or drafts. Returns the new draft id.
#[instrument(skip_all)]
pub async fn copy(
    pool: &Pool,
    store: &FileStore,
    org_id: i64,
    form: &CopyForm,
    now: DateTime<Utc>,
) -> Result<i64, WorkflowError> {
    let target = cycle(pool, form.cycle).await?;
    if target.status(now) != CycleStatus::Open {
        return Err(field_error("cycle", CYCLE_CLOSED));
    }
    if repo::application_exists(pool, org_id, target.id).await?
        || repo::find_draft(pool, org_id, target.id).await?.is_some()
    {
        return Err(field_error("cycle", CYCLE_TAKEN));
    }

    let (mut contents, files) = match form.source {
        CopySource::Application(id) => {
            let app = match repo::get_application(pool, id).await? {
                Some(app) if app.organization_id == org_id => app,
                _ => return Err(WorkflowError::NotFound("application")),
            };
            let mut contents = draft_contents(&app);
            contents.remove("cycle_question");
            let files = copy_files(store, &app.data.files, &[FileField::Budget]).await;
            (contents, files)
        }
        CopySource::Draft(id) => {
            let draft = owned_draft(pool, org_id, id).await?;
            let files = copy_files(store, &draft.files, &[]).await;
            (draft.contents, files)
        }
    };
    contents.insert("cycle_question".into(), Value::String(String::new()));

    let mut tx = pool.begin().await?;
    let Some(id) = repo::insert_draft_tx(&mut tx, org_id, target.id, &contents, &files, now).await?
    else {
        drop(tx);
        delete_files(store, &files).await;
        return Err(field_error("cycle", CYCLE_TAKEN));
    };
    tx.commit().await?;
    info!(org_id, draft_id = id, cycle_id = target.id, "draft copied");
    Ok(id)
}

/// Deletes the organization's own draft along with its uploads.
#[instrument(skip_all)]
pub async fn discard(pool: &Pool, store: &FileStore, org_id: i64, draft_id: i64) -> Result<(), WorkflowError> {
    let draft = owned_draft(pool, org_id, draft_id).await?;
    repo::delete_draft(pool, draft.id).await?;
    delete_files(store, &draft.files).await;
    info!(org_id, draft_id, "draft discarded");
    Ok(())
}

/// Whether a draft gets the closing-soon email at `now`. Drafts started
/// well ahead hear a week out; late starters hear three days out.
pub fn needs_warning(created: DateTime<Utc>, close: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let created_offset = close - created;
    let time_left = close - now;
    let (week, eight_days) = (Duration::days(7), Duration::days(8));
    (created_offset > eight_days && time_left > week && time_left < eight_days)
        || (created_offset < eight_days
            && time_left > Duration::days(2)
            && time_left <= Duration::days(3))
}

/// Emails organizations whose drafts are about to close.
#[instrument(skip_all)]
pub async fn draft_warnings(pool: &Pool, cfg: &Config, now: DateTime<Utc>) -> Result<usize> {
    let mut sent = 0;
    for (draft, cycle, org_email) in repo::drafts_with_cycles(pool).await? {
        if !needs_warning(draft.created, cycle.close, now) {
            continue;
        }
        let org = repo::get_organization(pool, draft.organization_id)
            .await?
            .map(|o| o.name)
            .unwrap_or_default();
        let close = cycle.close.format("%B %-d, %Y at %-I:%M %p UTC").to_string();
        outbox::queue_email(
            pool,
            &mail::draft_closing_soon(cfg, &org_email, &org, &cycle.title, &close),
        )
        .await?;
        info!(draft_id = draft.id, cycle = %cycle.title, "closing soon email queued");
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn warning_windows() {
        let close = Utc.with_ymd_and_hms(2014, 3, 15, 17, 0, 0).unwrap();
        let early = close - Duration::days(30);
        let late = close - Duration::days(5);

        assert!(needs_warning(early, close, close - Duration::hours(180)));
        assert!(!needs_warning(early, close, close - Duration::days(3)));
        assert!(!needs_warning(early, close, close - Duration::days(8)));

        assert!(needs_warning(late, close, close - Duration::hours(60)));
        assert!(needs_warning(late, close, close - Duration::days(3)));
        assert!(!needs_warning(late, close, close - Duration::days(2)));
        assert!(!needs_warning(late, close, close - Duration::hours(180)));
    }

    #[test]
    fn copy_form_needs_exactly_one_source() {
        let errors = parse_copy(&FormData::from_pairs([("cycle", "2")])).unwrap_err();
        assert_eq!(errors.get("draft").unwrap(), [SELECT_ONE]);

        let errors = parse_copy(&FormData::from_pairs([
            ("application", "1"),
            ("draft", "3"),
        ]))
        .unwrap_err();
        assert_eq!(errors.get("draft").unwrap(), [SELECT_ONLY_ONE]);
        assert_eq!(errors.get("cycle").unwrap(), [forms::REQUIRED]);

        let parsed = parse_copy(&FormData::from_pairs([("cycle", "2"), ("draft", "3")])).unwrap();
        assert_eq!(parsed.source, CopySource::Draft(3));
    }

    #[test]
    fn autosave_contents_drop_control_keys() {
        let form = FormData::from_pairs([
            ("mission", "Justice"),
            ("user_id", "abc"),
            ("override", "true"),
            ("budget", "x/y.pdf"),
        ]);
        let contents = contents_from_form(&form);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents["mission"], "Justice");
    }

    #[test]
    fn profile_seed_skips_fiscal_letter() {
        let org = Organization {
            name: "Org".into(),
            mission: "Help".into(),
            fiscal_letter: "k/letter.pdf".into(),
            founded: Some(1990),
            ..Default::default()
        };
        let contents = profile_contents(&org);
        assert_eq!(contents["mission"], "Help");
        assert_eq!(contents["founded"], 1990);
        assert!(!contents.contains_key("fiscal_letter"));
    }
}
