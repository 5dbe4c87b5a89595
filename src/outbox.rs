use crate::db;
use crate::fund::news;
use crate::mail::{Email, Mailer};
use crate::model::OutboxKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Payload of an `UpdateStory` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPayload {
    pub timestamp: DateTime<Utc>,
}

/// Queues an email for the worker.
pub async fn queue_email(pool: &db::Pool, email: &Email) -> Result<i64> {
    let payload = serde_json::to_value(email)?;
    db::outbox::enqueue(pool, OutboxKind::SendEmail, 0, &payload, Utc::now()).await
}

pub async fn queue_email_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    email: &Email,
) -> Result<i64> {
    let payload = serde_json::to_value(email)?;
    db::outbox::enqueue_tx(tx, OutboxKind::SendEmail, 0, &payload, Utc::now()).await
}

/// Runs one due task. Returns `false` when nothing was due.
#[instrument(skip_all)]
pub async fn process_next_task(pool: &db::Pool, mailer: &dyn Mailer) -> Result<bool> {
    let Some(task) = db::outbox::next_due(pool, Utc::now()).await? else {
        return Ok(false);
    };
    let (id, kind, ref_id, attempt) = (task.id, task.kind.clone(), task.ref_id, task.attempt);

    match OutboxKind::parse_kind(&kind) {
        Some(OutboxKind::SendEmail) => {
            let res = match serde_json::from_str::<Email>(&task.payload) {
                Ok(email) => mailer.send(&email).await,
                Err(err) => Err(err).context("invalid email payload"),
            };
            match res {
                Ok(()) => {
                    db::outbox::delete(pool, id).await?;
                    info!(id, kind, ref_id, "outbox task succeeded");
                }
                Err(err) => {
                    warn!(?err, id, kind, ref_id, attempt, "email failed; not retrying");
                    db::outbox::mark_failed(pool, id, &format!("{err:#}")).await?;
                }
            }
        }
        Some(OutboxKind::UpdateStory) => {
            let res = match serde_json::from_str::<StoryPayload>(&task.payload) {
                Ok(p) => news::update_story(pool, ref_id, p.timestamp).await,
                Err(err) => Err(err).context("invalid story payload"),
            };
            if let Err(err) = res {
                warn!(?err, id, kind, ref_id, attempt, "story update failed; dropping");
            } else {
                info!(id, kind, ref_id, "outbox task succeeded");
            }
            db::outbox::delete(pool, id).await?;
        }
        None => {
            warn!(id, kind, ref_id, "unknown outbox kind");
            db::outbox::mark_failed(pool, id, "unknown kind").await?;
        }
    }
    Ok(true)
}
