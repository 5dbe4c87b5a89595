use chrono::{Duration, Utc};
use giving_central::auth;
use giving_central::config::{self, Config};
use giving_central::db::{self, fund as fund_repo, grants as grants_repo, Pool};
use giving_central::http::{build_router, AppState};
use giving_central::mail::LogMailer;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use reqwest::{redirect, Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct TestApp {
    base: String,
    pool: Pool,
    client: Client,
    _dir: TempDir,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn spawn_app(cron_secret: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.data_dir = dir.path().display().to_string();
    cfg.cron.secret = cron_secret.to_string();
    cfg.ensure_dirs().unwrap();

    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let state = AppState::new(pool.clone(), cfg, Arc::new(LogMailer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    TestApp {
        base: format!("http://{addr}"),
        pool,
        client: Client::builder().redirect(redirect::Policy::none()).build().unwrap(),
        _dir: dir,
    }
}

fn session_cookie(res: &reqwest::Response) -> String {
    res.headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .expect("session cookie")
}

async fn create_project(pool: &Pool, pre_approved: &str) -> i64 {
    fund_repo::create_project(
        pool,
        &fund_repo::NewProject {
            title: "Climate Justice".into(),
            public: true,
            pre_approved: pre_approved.into(),
            fundraising_training: Utc::now() + Duration::days(10),
            fundraising_deadline: (Utc::now() + Duration::days(90)).date_naive(),
            fund_goal: 20_000,
            suggested_steps: String::new(),
        },
    )
    .await
    .unwrap()
}

async fn register_member(app: &TestApp, email: &str, project_id: i64) -> String {
    let res = app
        .client
        .post(app.url("/fund/register"))
        .form(&[
            ("email", email),
            ("password", "pw"),
            ("passwordtwo", "pw"),
            ("first_name", "Ana"),
            ("last_name", "Ruiz"),
            ("giving_project", &project_id.to_string()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = session_cookie(&res);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["redirect"], "/fund/registered");
    cookie
}

async fn staff_cookie(app: &TestApp) -> String {
    auth::create_staff_account(&app.pool, "staff@example.org", "pw").await.unwrap();
    let res = app
        .client
        .post(app.url("/fund/login"))
        .form(&[("email", "staff@example.org"), ("password", "pw")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    session_cookie(&res)
}

#[tokio::test]
async fn guards_redirect_by_login_state() {
    let app = spawn_app("").await;
    let res = app.client.get(app.url("/fund/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/fund/login");

    let res = app.client.get(app.url("/apply/")).send().await.unwrap();
    assert_eq!(res.headers()[LOCATION], "/apply/login");

    let project_id = create_project(&app.pool, "").await;
    let cookie = register_member(&app, "pending@example.org", project_id).await;
    let res = app
        .client
        .get(app.url("/fund/"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/fund/pending");

    let res = app
        .client
        .get(app.url("/fund/registered"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "status": "pending", "project": "Climate Justice" }));

    // A member is not an organization.
    let res = app
        .client
        .get(app.url("/apply/"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()[LOCATION], "/apply/login");
}

#[tokio::test]
async fn pre_approved_member_adds_contacts() {
    let app = spawn_app("").await;
    let project_id = create_project(&app.pool, "ana@example.org").await;
    let cookie = register_member(&app, "ana@example.org", project_id).await;

    let res = app
        .client
        .get(app.url("/fund/registered"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()[LOCATION], "/fund/");

    let res = app
        .client
        .post(app.url("/fund/add-contacts"))
        .header("cookie", &cookie)
        .form(&[("firstname", ""), ("email", "not-an-email")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"]["firstname"][0], "This field is required.");
    assert_eq!(body["errors"]["email"][0], "Enter a valid email address.");

    let res = app
        .client
        .post(app.url("/fund/add-contacts"))
        .header("cookie", &cookie)
        .form(&[("firstname", "Bo"), ("lastname", "Baker")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "success");

    let res = app
        .client
        .get(app.url("/fund/"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let home: Value = res.json().await.unwrap();
    assert_eq!(home["header"], "Climate Justice");
    assert_eq!(home["donors"].as_array().unwrap().len(), 1);
    assert_eq!(home["require_estimates"], false);

    let res = app
        .client
        .post(app.url("/fund/999/delete"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app
        .client
        .post(app.url("/logout"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = app
        .client
        .get(app.url("/fund/"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn staff_reports_download_as_csv() {
    let app = spawn_app("").await;
    let project_id = create_project(&app.pool, "").await;
    let member = register_member(&app, "member@example.org", project_id).await;
    let staff = staff_cookie(&app).await;

    let request = json!({ "kind": "organization", "format": "csv" });
    let res = app
        .client
        .post(app.url("/admin/grants/report"))
        .header("cookie", &member)
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = app
        .client
        .post(app.url("/admin/grants/report"))
        .header("cookie", &staff)
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert_eq!(
        res.headers()[CONTENT_DISPOSITION],
        "attachment; filename=organization.csv"
    );
    let body = res.text().await.unwrap();
    assert!(body.starts_with("Name"), "{body}");

    let res = app
        .client
        .post(app.url("/admin/grants/report"))
        .header("cookie", &staff)
        .json(&json!({ "kind": "application", "fields": ["nonsense"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Staff act as another login with ?user=.
    let res = app
        .client
        .get(app.url("/fund/registered?user=member@example.org"))
        .header("cookie", &staff)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn cron_routes_check_the_shared_secret() {
    let app = spawn_app("s3cret").await;
    let res = app.client.get(app.url("/cron/fund/gifts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    for path in [
        "/cron/fund/overdue",
        "/cron/fund/new-accounts",
        "/cron/fund/gifts",
        "/cron/grants/draft-warning",
        "/cron/grants/yer-reminder",
    ] {
        let res = app
            .client
            .get(app.url(path))
            .header("x-cron-secret", "s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn organization_registers_and_sees_open_cycles() {
    let app = spawn_app("").await;
    let res = app
        .client
        .post(app.url("/apply/register"))
        .form(&[
            ("organization", "Rainier Youth"),
            ("email", "rainier@example.org"),
            ("password", "pw"),
            ("passwordtwo", "other"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = app
        .client
        .post(app.url("/apply/register"))
        .form(&[
            ("organization", "Rainier Youth"),
            ("email", "rainier@example.org"),
            ("password", "pw"),
            ("passwordtwo", "pw"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = session_cookie(&res);

    let res = app
        .client
        .get(app.url("/apply/"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .client
        .post(app.url("/apply/login"))
        .form(&[("email", "rainier@example.org"), ("password", "wrong")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["errors"]["__all__"][0],
        "Your password didn't match the one on file. Please try again."
    );
}

#[tokio::test]
async fn autosave_after_the_cycle_closes_answers_closed() {
    let app = spawn_app("").await;
    let res = app
        .client
        .post(app.url("/apply/register"))
        .form(&[
            ("organization", "Tacoma Tenants"),
            ("email", "tenants@example.org"),
            ("password", "pw"),
            ("passwordtwo", "pw"),
        ])
        .send()
        .await
        .unwrap();
    let cookie = session_cookie(&res);
    let cycle_id = grants_repo::create_cycle(
        &app.pool,
        &grants_repo::NewCycle {
            title: "Fall".into(),
            open: Utc::now() - Duration::days(1),
            close: Utc::now() + Duration::days(30),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let res = app
        .client
        .get(app.url(&format!("/apply/{cycle_id}")))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let autosave = app.url(&format!("/apply/{cycle_id}/autosave"));
    let res = app
        .client
        .post(&autosave)
        .header("cookie", &cookie)
        .form(&[("mission", "Housing"), ("user_id", "a1")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "success");

    sqlx::query("UPDATE grant_cycles SET close = ? WHERE id = ?")
        .bind(Utc::now() - Duration::hours(1))
        .bind(cycle_id)
        .execute(&app.pool)
        .await
        .unwrap();
    let res = app
        .client
        .post(&autosave)
        .header("cookie", &cookie)
        .form(&[("mission", "Housing"), ("user_id", "a1")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "closed");
}
