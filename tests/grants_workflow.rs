use chrono::{Duration, Months, Utc};
use giving_central::auth;
use giving_central::config::{self, Config};
use giving_central::db::model::{ApplicationText, Organization, TIMELINE_CELLS};
use giving_central::db::{self, accounts, awards as awards_repo, fund as fund_repo, grants as repo, Pool};
use giving_central::forms::{self, FormData};
use giving_central::grants::drafts::{self, ApplyView, CopyForm, CopySource};
use giving_central::grants::registration::{self, OrgRegistration};
use giving_central::grants::{admin, application, awards, submit, yer, WorkflowError};
use giving_central::model::{FileField, YerFileField};
use giving_central::storage::FileStore;
use std::collections::HashMap;
use tempfile::TempDir;

struct Harness {
    pool: Pool,
    cfg: Config,
    store: FileStore,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    Harness {
        pool,
        cfg: serde_yaml::from_str(config::example()).unwrap(),
        store: FileStore::new(dir.path().join("files")),
        _dir: dir,
    }
}

async fn open_cycle(pool: &Pool, title: &str) -> i64 {
    repo::create_cycle(
        pool,
        &repo::NewCycle {
            title: title.into(),
            open: Utc::now() - Duration::days(1),
            close: Utc::now() + Duration::days(30),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

async fn register_org(pool: &Pool, name: &str, email: &str) -> Organization {
    let form = FormData::from_pairs([
        ("organization", name),
        ("email", email),
        ("password", "pw"),
        ("passwordtwo", "pw"),
    ]);
    let parsed = registration::parse_register(&form).unwrap();
    match registration::register(pool, &parsed).await.unwrap() {
        OrgRegistration::LoggedIn { organization_id, .. } => {
            repo::get_organization(pool, organization_id).await.unwrap().unwrap()
        }
        other => panic!("expected login, got {other:?}"),
    }
}

/// Autosave fields that pass validation for general support.
fn valid_form(user: &str) -> FormData {
    let mut m: HashMap<String, String> = ApplicationText::COLUMNS
        .iter()
        .map(|c| (c.to_string(), "x".to_string()))
        .collect();
    let mut put = |k: &str, v: &str| {
        m.insert(k.to_string(), v.to_string());
    };
    put("user_id", user);
    put("state", "WA");
    put("status", "501c3");
    put("support_type", "General support");
    put("telephone_number", "(206) 555-1234");
    put("email_address", "org@example.org");
    put("fax_number", "");
    put("project_title", "");
    put("cycle_question", "");
    for f in ["fiscal_org", "fiscal_person", "fiscal_telephone", "fiscal_email", "fiscal_address"] {
        put(f, "");
    }
    for n in 1..=2 {
        put(&format!("collab_ref{n}_phone"), "206-555-0000");
        put(&format!("collab_ref{n}_email"), "");
        for part in ["name", "org", "phone", "email"] {
            put(&format!("racial_justice_ref{n}_{part}"), "");
        }
    }
    put("founded", "1999");
    put("budget_last", "100,000");
    put("budget_current", "120000");
    put("amount_requested", "10000");
    put("project_budget", "");
    for i in 0..TIMELINE_CELLS {
        put(&application::timeline_key(i), if i < 3 { "q1" } else { "" });
    }
    FormData::new(m)
}

async fn draft_id(h: &Harness, org: &Organization, cycle_id: i64) -> i64 {
    match drafts::open_draft(&h.pool, &h.store, org, cycle_id, Utc::now()).await.unwrap() {
        ApplyView::Draft(page) => page.draft.id,
        other => panic!("expected draft, got {other:?}"),
    }
}

async fn upload_required_files(h: &Harness, org: &Organization, draft: i64) {
    for (field, name) in [
        (FileField::Budget, "budget.pdf"),
        (FileField::Demographics, "demo.xls"),
        (FileField::FundingSources, "funding.doc"),
    ] {
        drafts::add_file(&h.pool, &h.store, org.id, draft, field, name, b"data", Utc::now())
            .await
            .unwrap();
    }
}

async fn submitted_application(h: &Harness, org: &Organization, cycle_id: i64) -> i64 {
    let draft = draft_id(h, org, cycle_id).await;
    drafts::autosave(&h.pool, org.id, cycle_id, &valid_form("a"), Utc::now()).await.unwrap();
    upload_required_files(h, org, draft).await;
    submit::submit(&h.pool, &h.cfg, org, cycle_id, Utc::now()).await.unwrap()
}

#[tokio::test]
async fn draft_autosave_upload_and_submit() {
    let h = harness().await;
    let cycle_id = open_cycle(&h.pool, "Spring").await;
    let org = register_org(&h.pool, "Rainier Youth", "rainier@example.org").await;
    let draft = draft_id(&h, &org, cycle_id).await;

    drafts::autosave(&h.pool, org.id, cycle_id, &valid_form("a"), Utc::now()).await.unwrap();
    assert!(matches!(
        drafts::autosave(&h.pool, org.id, cycle_id, &valid_form("b"), Utc::now()).await,
        Err(WorkflowError::EditConflict)
    ));
    let mut forced = valid_form("b").raw().clone();
    forced.insert("override".into(), "true".into());
    drafts::autosave(&h.pool, org.id, cycle_id, &FormData::new(forced), Utc::now()).await.unwrap();
    let saved = repo::get_draft(&h.pool, draft).await.unwrap().unwrap();
    assert_eq!(saved.modified_by, "b");
    assert!(!saved.contents.contains_key("override"));

    match submit::submit(&h.pool, &h.cfg, &org, cycle_id, Utc::now()).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get("budget").unwrap(), [application::BUDGET_REQUIRED]);
            assert_eq!(errors.get("demographics").unwrap(), [forms::REQUIRED]);
        }
        other => panic!("expected invalid, got {other:?}"),
    }

    match drafts::add_file(&h.pool, &h.store, org.id, draft, FileField::Budget, "run.exe", b"x", Utc::now()).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get("budget").unwrap(), [forms::UNSUPPORTED_FILE]);
        }
        other => panic!("expected unsupported file, got {other:?}"),
    }
    upload_required_files(&h, &org, draft).await;
    let stored = drafts::read_file(&h.pool, &h.store, draft, FileField::Budget, Some(org.id), false)
        .await
        .unwrap();
    assert_eq!(stored.filename, "budget.pdf");
    assert!(matches!(
        drafts::read_file(&h.pool, &h.store, draft, FileField::Budget, Some(org.id + 1), false).await,
        Err(WorkflowError::NotFound(_))
    ));

    let app_id = submit::submit(&h.pool, &h.cfg, &org, cycle_id, Utc::now()).await.unwrap();
    assert!(repo::find_draft(&h.pool, org.id, cycle_id).await.unwrap().is_none());
    assert!(matches!(
        submit::submit(&h.pool, &h.cfg, &org, cycle_id, Utc::now()).await,
        Err(WorkflowError::AlreadyApplied)
    ));
    assert!(matches!(
        drafts::open_draft(&h.pool, &h.store, &org, cycle_id, Utc::now()).await.unwrap(),
        ApplyView::AlreadyApplied { .. }
    ));

    let app = repo::get_application(&h.pool, app_id).await.unwrap().unwrap();
    assert_eq!(app.data.budget_last, 100_000);
    assert_eq!(app.data.text.telephone_number, "206-555-1234");
    let org = repo::get_organization(&h.pool, org.id).await.unwrap().unwrap();
    assert_eq!(org.state, "WA");
    assert_eq!(org.telephone_number, "206-555-1234");
    assert_eq!(db::outbox::count_pending(&h.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn copy_and_revert_keep_files_separate() {
    let h = harness().await;
    let spring = open_cycle(&h.pool, "Spring").await;
    let fall = open_cycle(&h.pool, "Fall").await;
    let org = register_org(&h.pool, "Duwamish Voices", "duwamish@example.org").await;
    let app_id = submitted_application(&h, &org, spring).await;
    let app = repo::get_application(&h.pool, app_id).await.unwrap().unwrap();

    let copy = CopyForm {
        cycle: fall,
        source: CopySource::Application(app_id),
    };
    let copied = drafts::copy(&h.pool, &h.store, org.id, &copy, Utc::now()).await.unwrap();
    let draft = repo::get_draft(&h.pool, copied).await.unwrap().unwrap();
    assert_eq!(draft.field("state"), "WA");
    assert_eq!(draft.field("cycle_question"), "");
    assert!(!draft.files.has(FileField::Budget));
    let demo = draft.files.get(FileField::Demographics);
    assert!(!demo.is_empty());
    assert_ne!(demo, app.data.files.get(FileField::Demographics));

    match drafts::copy(&h.pool, &h.store, org.id, &copy, Utc::now()).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get("cycle").unwrap(), [drafts::CYCLE_TAKEN]);
        }
        other => panic!("expected cycle taken, got {other:?}"),
    }

    let reverted = admin::revert(&h.pool, app_id, "staff@example.org").await.unwrap();
    assert!(repo::get_application(&h.pool, app_id).await.unwrap().is_none());
    let draft = repo::get_draft(&h.pool, reverted).await.unwrap().unwrap();
    assert_eq!(draft.grant_cycle_id, spring);
    assert_eq!(draft.files, app.data.files);
    assert_eq!(draft.field("budget_last"), "100000");

    // The reverted draft submits again unchanged.
    let again = submit::submit(&h.pool, &h.cfg, &org, spring, Utc::now()).await.unwrap();
    assert_ne!(again, app_id);
}

#[tokio::test]
async fn award_reminder_and_year_end_report() {
    let h = harness().await;
    let cycle_id = open_cycle(&h.pool, "Spring").await;
    let org = register_org(&h.pool, "Tacoma Tenants", "tenants@example.org").await;
    let app_id = submitted_application(&h, &org, cycle_id).await;
    // Submission copied the profile onto the organization.
    let org = repo::get_organization(&h.pool, org.id).await.unwrap().unwrap();

    let project_id = fund_repo::create_project(
        &h.pool,
        &fund_repo::NewProject {
            title: "Housing GP".into(),
            public: true,
            pre_approved: String::new(),
            fundraising_training: Utc::now(),
            fundraising_deadline: Utc::now().date_naive(),
            fund_goal: 0,
            suggested_steps: String::new(),
        },
    )
    .await
    .unwrap();
    let link = admin::assign(&h.pool, app_id, project_id).await.unwrap();

    let today = Utc::now().date_naive();
    let mailed = today + Duration::days(30) - Months::new(12);
    let form = FormData::from_pairs([
        ("amount", "5,000".to_string()),
        ("agreement_mailed", mailed.format("%Y-%m-%d").to_string()),
    ]);
    let award_id = awards::create_award(&h.pool, link, &form).await.unwrap();
    let award = awards_repo::get_award(&h.pool, award_id).await.unwrap().unwrap();
    assert_eq!(award.amount, 5000);
    if award.yearend_due() == Some(today + Duration::days(30)) {
        assert_eq!(awards::yer_reminders(&h.pool, &h.cfg, today).await.unwrap(), 1);
    }
    assert_eq!(
        awards::yer_reminders(&h.pool, &h.cfg, today + Duration::days(1)).await.unwrap(),
        0
    );

    match yer::open(&h.pool, &org, award_id).await.unwrap() {
        yer::YerView::Draft { draft, .. } => {
            assert_eq!(draft.field("phone"), "206-555-1234");
            assert_eq!(draft.field("email"), "org@example.org");
        }
        other => panic!("expected draft, got {other:?}"),
    }
    let other_org = register_org(&h.pool, "Someone Else", "else@example.org").await;
    assert!(matches!(
        yer::open(&h.pool, &other_org, award_id).await,
        Err(WorkflowError::NotFound("award"))
    ));

    let mut fields: Vec<(String, String)> = yer::NARRATIVES
        .iter()
        .map(|n| (n.to_string(), "It went well.".to_string()))
        .collect();
    for (k, v) in [
        ("email", "org@example.org"),
        ("phone", "206-555-1234"),
        ("total_size", "40"),
        ("donations_count", "12"),
    ] {
        fields.push((k.into(), v.into()));
    }
    yer::autosave(&h.pool, org.id, award_id, &FormData::from_pairs(fields)).await.unwrap();
    match yer::submit(&h.pool, &h.cfg, &org, award_id, Utc::now()).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert!(errors.has("photo1"));
            assert!(errors.has("photo_release"));
        }
        other => panic!("expected missing photos, got {other:?}"),
    }
    for (field, name) in [(YerFileField::Photo1, "team.jpg"), (YerFileField::PhotoRelease, "release.pdf")] {
        yer::add_file(&h.pool, &h.store, org.id, award_id, field, name, b"img").await.unwrap();
    }
    let report_id = yer::submit(&h.pool, &h.cfg, &org, award_id, Utc::now()).await.unwrap();
    assert!(matches!(
        yer::open(&h.pool, &org, award_id).await.unwrap(),
        yer::YerView::Submitted { report_id: id } if id == report_id
    ));

    // Creator sees the report; project members only once it is visible.
    let org_account = accounts::find_account_by_email(&h.pool, "tenants@example.org").await.unwrap().unwrap();
    let view = yer::view(&h.pool, Some(&org_account), report_id).await.unwrap();
    assert_eq!(view.report.data.total_size, 40);
    assert_eq!(view.files.len(), 2);

    auth::create_account(&h.pool, "gp@example.org", "pw", "Gia", "P", true).await.unwrap();
    let member_id = fund_repo::create_member(&h.pool, "gp@example.org", "Gia", "P").await.unwrap();
    fund_repo::create_membership(&h.pool, member_id, project_id, true, "").await.unwrap();
    let member_account = accounts::find_account_by_email(&h.pool, "gp@example.org").await.unwrap().unwrap();
    assert!(matches!(
        yer::view(&h.pool, Some(&member_account), report_id).await,
        Err(WorkflowError::NotFound(_))
    ));
    awards::set_report_visible(&h.pool, report_id, true).await.unwrap();
    let photo = yer::file(&h.pool, &h.store, Some(&member_account), report_id, YerFileField::Photo1)
        .await
        .unwrap();
    assert_eq!(photo.filename, "team.jpg");
    assert!(matches!(
        yer::view(&h.pool, None, report_id).await,
        Err(WorkflowError::NotFound(_))
    ));
}
