use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use giving_central::config::{self, Config};
use giving_central::db::{self, fund as repo, Pool};
use giving_central::forms::FormData;
use giving_central::fund::registration::{self, RegisteredOutcome};
use giving_central::fund::{cron, donors, membership, steps, WorkflowError, FORM_ERROR};
use giving_central::mail::{Email, Mailer};
use giving_central::model::MembershipStatus;
use giving_central::outbox::process_next_task;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn test_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

#[derive(Clone, Default)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<Email>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

async fn drain(pool: &Pool, mailer: &RecordingMailer) {
    while process_next_task(pool, mailer).await.unwrap() {}
}

async fn project(pool: &Pool, pre_approved: &str) -> i64 {
    repo::create_project(
        pool,
        &repo::NewProject {
            title: "Economic Justice".into(),
            public: true,
            pre_approved: pre_approved.into(),
            fundraising_training: Utc::now() - Duration::days(3),
            fundraising_deadline: (Utc::now() + Duration::days(60)).date_naive(),
            fund_goal: 50_000,
            suggested_steps: "Talk to them\nAsk them".into(),
        },
    )
    .await
    .unwrap()
}

fn register_form(email: &str, project_id: i64) -> FormData {
    FormData::from_pairs([
        ("email", email.to_string()),
        ("password", "pw".to_string()),
        ("passwordtwo", "pw".to_string()),
        ("first_name", "Ana".to_string()),
        ("last_name", "Ruiz".to_string()),
        ("giving_project", project_id.to_string()),
    ])
}

#[tokio::test]
async fn pre_approved_member_fundraises_end_to_end() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let mailer = RecordingMailer::default();
    let project_id = project(&pool, "someone@else.org, ana@example.org").await;

    let parsed = registration::parse_register(&register_form("Ana@Example.org", project_id)).unwrap();
    let reg = registration::register(&pool, &parsed).await.unwrap();
    assert!(reg.membership_id.is_some());
    assert!(!reg.token.is_empty());

    let member = repo::find_member_by_email(&pool, "ana@example.org").await.unwrap().unwrap();
    let outcome = registration::registered(&pool, &member, None).await.unwrap();
    assert_eq!(outcome, RegisteredOutcome::Approved);

    let resolution = membership::resolve(&pool, "ana@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::Approved);
    let (_, ship) = resolution.approved().unwrap();
    let ship = ship.clone();
    let gp = repo::get_project(&pool, project_id).await.unwrap().unwrap();
    let now = Utc::now();

    // Training is over, so estimates are required on every row.
    let missing_estimate = FormData::from_pairs([
        ("form-TOTAL_FORMS", "2"),
        ("form-0-firstname", "Bo"),
        ("form-0-amount", "100"),
        ("form-1-firstname", ""),
    ]);
    match donors::add_contacts(&pool, &ship, &gp, &missing_estimate, now).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert!(errors.has("form-0-likelihood"));
            assert!(!errors.has("form-1-firstname"));
        }
        other => panic!("expected invalid, got {other:?}"),
    }

    let too_large = FormData::from_pairs([
        ("form-TOTAL_FORMS", "1"),
        ("form-0-firstname", "Bo"),
        ("form-0-amount", "9,000,000,000,000,000,000"),
        ("form-0-likelihood", "50"),
    ]);
    match donors::add_contacts(&pool, &ship, &gp, &too_large, now).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(
                errors.get("form-0-amount").unwrap(),
                [giving_central::forms::WHOLE_NUMBER_TOO_LARGE]
            );
        }
        other => panic!("expected invalid, got {other:?}"),
    }

    let contacts = FormData::from_pairs([
        ("form-TOTAL_FORMS", "2"),
        ("form-0-firstname", "Bo"),
        ("form-0-amount", "1,000"),
        ("form-0-likelihood", "50"),
        ("form-1-firstname", "Cy"),
        ("form-1-amount", "200"),
        ("form-1-likelihood", "10"),
    ]);
    assert_eq!(donors::add_contacts(&pool, &ship, &gp, &contacts, now).await.unwrap(), 2);
    let all = repo::donors_for_membership(&pool, ship.id).await.unwrap();
    let bo = all.iter().find(|d| d.firstname == "Bo").unwrap().clone();
    assert_eq!(bo.estimated(), 500);

    let step_form = FormData::from_pairs([("date", "2030-01-15"), ("description", "Coffee")]);
    let step_id = steps::add_step(&pool, ship.id, bo.id, &step_form).await.unwrap();
    match steps::add_step(&pool, ship.id, bo.id, &step_form).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get(FORM_ERROR).unwrap(), [steps::HAS_UPCOMING_STEP]);
        }
        other => panic!("expected upcoming step error, got {other:?}"),
    }

    let flood = FormData::from_pairs([("form-TOTAL_FORMS", "4000000000")]);
    match steps::mass_step(&pool, ship.id, &flood).await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get(FORM_ERROR).unwrap(), ["Please submit at most 10 forms."]);
        }
        other => panic!("expected too many forms, got {other:?}"),
    }

    let done = FormData::from_pairs([
        ("asked", "on"),
        ("response", "1"),
        ("promised_amount", "500"),
        ("last_name", "Baker"),
        ("phone", "206-555-1234"),
        ("next_step", "Thank you note"),
        ("next_step_date", "2030-01-20"),
    ]);
    steps::complete_step(&pool, ship.id, bo.id, step_id, &done, now).await.unwrap();

    let bo = repo::get_donor(&pool, bo.id, ship.id).await.unwrap().unwrap();
    assert!(bo.asked && bo.talked);
    assert_eq!(bo.promised, Some(500));
    assert_eq!(bo.lastname, "Baker");
    assert!(bo.next_step_id.is_some());
    assert!(matches!(
        steps::completion_defaults(&pool, ship.id, bo.id, step_id).await,
        Err(WorkflowError::NotFound("step"))
    ));

    // A finished step cannot be completed again, so the follow-up stays the
    // donor's only outstanding step.
    assert!(matches!(
        steps::complete_step(&pool, ship.id, bo.id, step_id, &done, now).await,
        Err(WorkflowError::NotFound("step"))
    ));
    assert!(matches!(
        steps::add_step(&pool, ship.id, bo.id, &step_form).await,
        Err(WorkflowError::Invalid(_))
    ));
    let open_steps: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM steps WHERE donor_id = ? AND completed IS NULL")
            .bind(bo.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(open_steps, 1);
    let first: (Option<i64>, bool) = sqlx::query_as("SELECT promised, asked FROM steps WHERE id = ?")
        .bind(step_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(first, (Some(500), true));

    // The completion queued a story recomputation.
    drain(&pool, &mailer).await;
    let news = repo::news_for_project(&pool, project_id).await.unwrap();
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].summary, "Ana asked 1 person and got $500 in promises.");

    repo::set_donor_gifts(&pool, bo.id, 500, 0, 0).await.unwrap();
    assert_eq!(cron::gift_notify(&pool, &cfg).await.unwrap(), 1);
    assert_eq!(cron::gift_notify(&pool, &cfg).await.unwrap(), 0);
    let ship = repo::get_membership(&pool, ship.id).await.unwrap().unwrap();
    assert!(ship.notifications.contains("Bo Baker"));

    drain(&pool, &mailer).await;
    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ana@example.org".to_string()]);
    assert_eq!(sent[0].subject, "Gift received");
}

#[tokio::test]
async fn unlisted_member_waits_for_approval() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let mailer = RecordingMailer::default();
    let project_id = project(&pool, "").await;

    let parsed = registration::parse_register(&register_form("bea@example.org", project_id)).unwrap();
    let reg = registration::register(&pool, &parsed).await.unwrap();
    let member = repo::find_member_by_email(&pool, "bea@example.org").await.unwrap().unwrap();
    assert_eq!(
        registration::registered(&pool, &member, None).await.unwrap(),
        RegisteredOutcome::Pending {
            project: "Economic Justice".into()
        }
    );
    let resolution = membership::resolve(&pool, "bea@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::Unapproved);

    // Registering twice is refused.
    assert!(matches!(
        registration::register(&pool, &parsed).await,
        Err(WorkflowError::Invalid(_))
    ));

    let ship_id = reg.membership_id.unwrap();
    registration::update_membership(&pool, &cfg, ship_id, true, false).await.unwrap();
    // Re-saving an approved membership does not email again.
    registration::update_membership(&pool, &cfg, ship_id, true, true).await.unwrap();
    drain(&pool, &mailer).await;
    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Membership Approved");

    let resolution = membership::resolve(&pool, "bea@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::Approved);
}

#[tokio::test]
async fn stale_current_falls_back_to_an_approved_membership() {
    let pool = setup_pool().await;
    let first_project = project(&pool, "").await;
    let second_project = project(&pool, "").await;
    let member_id = repo::create_member(&pool, "dee@example.org", "Dee", "Park").await.unwrap();
    let pending = repo::create_membership(&pool, member_id, first_project, false, "").await.unwrap();
    let approved = repo::create_membership(&pool, member_id, second_project, true, "").await.unwrap();
    repo::set_member_current(&pool, member_id, 9999).await.unwrap();

    let resolution = membership::resolve(&pool, "dee@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::Approved);
    assert_eq!(resolution.membership.as_ref().map(|s| s.id), Some(approved));
    let member = repo::get_member(&pool, member_id).await.unwrap().unwrap();
    assert_eq!(member.current, approved);

    // With nothing approved the first membership is kept and reported.
    repo::set_membership_flags(&pool, approved, false, false).await.unwrap();
    repo::set_member_current(&pool, member_id, 9999).await.unwrap();
    let resolution = membership::resolve(&pool, "dee@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::Unapproved);
    assert_eq!(resolution.membership.as_ref().map(|s| s.id), Some(pending));
    assert!(resolution.approved().is_none());
    let member = repo::get_member(&pool, member_id).await.unwrap().unwrap();
    assert_eq!(member.current, pending);

    // No memberships at all resets the pointer.
    sqlx::query("DELETE FROM memberships WHERE member_id = ?")
        .bind(member_id)
        .execute(&pool)
        .await
        .unwrap();
    let resolution = membership::resolve(&pool, "dee@example.org").await.unwrap();
    assert_eq!(resolution.status, MembershipStatus::NoMembership);
    assert_eq!(repo::get_member(&pool, member_id).await.unwrap().unwrap().current, 0);
    assert_eq!(
        membership::resolve(&pool, "nobody@example.org").await.unwrap().status,
        MembershipStatus::NoMember
    );
}

#[tokio::test]
async fn login_reports_mismatch_under_form_key() {
    let pool = setup_pool().await;
    let project_id = project(&pool, "").await;
    let parsed = registration::parse_register(&register_form("cal@example.org", project_id)).unwrap();
    registration::register(&pool, &parsed).await.unwrap();

    let (account, token) = registration::login(&pool, " CAL@example.org ", "pw").await.unwrap();
    assert_eq!(account.email, "cal@example.org");
    assert!(!token.is_empty());

    match registration::login(&pool, "cal@example.org", "nope").await {
        Err(WorkflowError::Invalid(errors)) => {
            assert_eq!(errors.get(FORM_ERROR).unwrap(), [registration::LOGIN_MISMATCH]);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}
