use super::model::OutboxTask;
use super::Pool;
use crate::model::OutboxKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

#[instrument(skip_all)]
pub async fn enqueue(
    pool: &Pool,
    kind: OutboxKind,
    ref_id: i64,
    payload: &serde_json::Value,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_tx(&mut tx, kind, ref_id, payload, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn enqueue_tx(
    tx: &mut Transaction<'_, Sqlite>,
    kind: OutboxKind,
    ref_id: i64,
    payload: &serde_json::Value,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO outbox (kind, ref_id, payload, attempt, due_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(ref_id)
    .bind(payload.to_string())
    .bind(due_at)
    .fetch_one(&mut **tx)
    .await
    .context("failed to enqueue outbox task")?
    .get("id");
    Ok(id)
}

/// Oldest due task that has not been marked failed.
#[instrument(skip_all)]
pub async fn next_due(pool: &Pool, now: DateTime<Utc>) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, kind, ref_id, payload, attempt FROM outbox \
         WHERE failed_at IS NULL AND datetime(due_at) <= datetime(?) \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| OutboxTask {
        id: r.get("id"),
        kind: r.get("kind"),
        ref_id: r.get("ref_id"),
        payload: r.get("payload"),
        attempt: r.get("attempt"),
    }))
}

#[instrument(skip_all)]
pub async fn delete(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Parks a task for good; failed tasks are never picked up again.
#[instrument(skip_all)]
pub async fn mark_failed(pool: &Pool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE outbox SET attempt = attempt + 1, failed_at = ?, last_error = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE failed_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations};
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn due_order_and_failed_tasks_are_skipped() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let now = Utc::now();

        let later = enqueue(&pool, OutboxKind::SendEmail, 0, &json!({}), now + Duration::hours(1))
            .await
            .unwrap();
        let first = enqueue(&pool, OutboxKind::UpdateStory, 7, &json!({"timestamp": "x"}), now - Duration::seconds(5))
            .await
            .unwrap();
        let second = enqueue(&pool, OutboxKind::SendEmail, 0, &json!({}), now - Duration::seconds(1))
            .await
            .unwrap();

        let task = next_due(&pool, now).await.unwrap().unwrap();
        assert_eq!(task.id, first);
        assert_eq!(task.kind, "update_story");
        assert_eq!(task.ref_id, 7);

        mark_failed(&pool, first, "boom").await.unwrap();
        let task = next_due(&pool, now).await.unwrap().unwrap();
        assert_eq!(task.id, second);

        delete(&pool, second).await.unwrap();
        assert!(next_due(&pool, now).await.unwrap().is_none());
        assert_eq!(count_pending(&pool).await.unwrap(), 1);
        assert_eq!(next_due(&pool, now + Duration::hours(2)).await.unwrap().unwrap().id, later);
    }
}
