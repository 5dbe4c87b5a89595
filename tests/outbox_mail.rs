use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use giving_central::config;
use giving_central::db::{self, Pool};
use giving_central::mail::{self, Email, Mailer, RelayMailer};
use giving_central::outbox::{self, process_next_task};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn email(subject: &str) -> Email {
    Email {
        from: "grants@example.org".into(),
        to: vec!["org@example.org".into()],
        cc: vec![],
        subject: subject.into(),
        body: "Hello".into(),
    }
}

#[derive(Clone, Default)]
struct Relay {
    received: Arc<Mutex<Vec<(Option<String>, Email)>>>,
}

async fn relay_handler(State(relay): State<Relay>, headers: HeaderMap, Json(email): Json<Email>) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    relay.received.lock().await.push((auth, email));
    StatusCode::ACCEPTED
}

async fn failing_handler() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "relay down")
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/send")
}

#[tokio::test]
async fn relay_delivers_queued_email() {
    let pool = setup_pool().await;
    let relay = Relay::default();
    let url = spawn(Router::new().route("/send", post(relay_handler)).with_state(relay.clone())).await;
    let mailer = RelayMailer::new(&url, "secret".into()).unwrap();

    outbox::queue_email(&pool, &email("Application received")).await.unwrap();
    assert!(process_next_task(&pool, &mailer).await.unwrap());
    assert!(!process_next_task(&pool, &mailer).await.unwrap());

    let received = relay.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.as_deref(), Some("Bearer secret"));
    assert_eq!(received[0].1.subject, "Application received");
    assert_eq!(db::outbox::count_pending(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn relay_failure_parks_the_task() {
    let pool = setup_pool().await;
    let url = spawn(Router::new().route("/send", post(failing_handler))).await;
    let mailer = RelayMailer::new(&url, String::new()).unwrap();

    outbox::queue_email(&pool, &email("Gift received")).await.unwrap();
    assert!(process_next_task(&pool, &mailer).await.unwrap());
    // Failed emails are not retried.
    assert!(!process_next_task(&pool, &mailer).await.unwrap());
    assert_eq!(db::outbox::count_pending(&pool).await.unwrap(), 0);

    let (attempt, error): (i64, String) =
        sqlx::query_as("SELECT attempt, last_error FROM outbox WHERE failed_at IS NOT NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(attempt, 1);
    assert!(error.contains("503"), "{error}");
}

struct BrokenMailer;

#[async_trait]
impl Mailer for BrokenMailer {
    async fn send(&self, _email: &Email) -> Result<()> {
        Err(anyhow!("should not be called"))
    }
}

#[tokio::test]
async fn bad_payloads_and_unknown_kinds_are_parked() {
    let pool = setup_pool().await;
    db::outbox::enqueue(&pool, giving_central::model::OutboxKind::SendEmail, 0, &json!({"nope": 1}), chrono::Utc::now())
        .await
        .unwrap();
    sqlx::query("INSERT INTO outbox (kind, ref_id, payload, due_at) VALUES ('mystery', 0, '{}', ?)")
        .bind(chrono::Utc::now())
        .execute(&pool)
        .await
        .unwrap();

    assert!(process_next_task(&pool, &BrokenMailer).await.unwrap());
    assert!(process_next_task(&pool, &BrokenMailer).await.unwrap());
    assert!(!process_next_task(&pool, &BrokenMailer).await.unwrap());

    let failed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE failed_at IS NOT NULL")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn log_mailer_is_used_without_a_relay() {
    let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    let mailer = mail::from_config(&cfg).unwrap();
    let pool = setup_pool().await;
    outbox::queue_email(&pool, &mail::gift_received(&cfg, "ana@example.org")).await.unwrap();
    assert!(process_next_task(&pool, mailer.as_ref()).await.unwrap());
    assert_eq!(db::outbox::count_pending(&pool).await.unwrap(), 0);
}
