//! Scheduled fund emails. Each job queues its messages on the outbox.
use crate::config::Config;
use crate::db::fund as repo;
use crate::db::model::{Donor, Step};
use crate::db::Pool;
use crate::{mail, outbox};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Members are reminded about overdue steps at most this often.
pub const REMINDER_INTERVAL_DAYS: i64 = 7;

/// Incomplete steps dated before yesterday, newest first.
pub fn overdue_steps(steps: &[Step], today: NaiveDate) -> Vec<&Step> {
    let cutoff = today - Duration::days(1);
    let mut overdue: Vec<&Step> = steps
        .iter()
        .filter(|s| s.completed.is_none() && s.date < cutoff)
        .collect();
    overdue.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    overdue
}

/// Emails members of active projects about overdue steps. Returns the
/// number of emails queued.
#[instrument(skip_all)]
pub async fn email_overdue(pool: &Pool, cfg: &Config, today: NaiveDate) -> Result<usize> {
    let limit = today - Duration::days(REMINDER_INTERVAL_DAYS);
    let mut sent = 0;
    for contact in repo::memberships_due_reminder(pool, today, limit).await? {
        let ship = &contact.membership;
        let steps = repo::steps_for_membership(pool, ship.id).await?;
        let overdue = overdue_steps(&steps, today);
        let Some(latest) = overdue.first() else {
            continue;
        };
        let project = repo::get_project(pool, ship.giving_project_id)
            .await?
            .map(|p| p.title)
            .unwrap_or_default();
        info!(membership_id = ship.id, count = overdue.len(), "overdue steps, emailing");
        let email = mail::overdue_steps(
            cfg,
            &contact.email,
            &project,
            overdue.len(),
            &latest.description,
            latest.date,
        );
        outbox::queue_email(pool, &email).await?;
        repo::set_emailed(pool, ship.id, today).await?;
        sent += 1;
    }
    Ok(sent)
}

/// Tells project leaders how many memberships await approval.
#[instrument(skip_all)]
pub async fn new_accounts(pool: &Pool, cfg: &Config) -> Result<usize> {
    let mut sent = 0;
    for (project_id, count) in repo::pending_membership_counts(pool).await? {
        for leader in repo::project_leaders(pool, project_id).await? {
            outbox::queue_email(pool, &mail::accounts_pending(cfg, &leader.email, count)).await?;
            sent += 1;
        }
    }
    info!(sent, "pending account emails queued");
    Ok(sent)
}

/// Notification text listing each donor's gift on its own line.
pub fn gift_notification(donors: &[Donor]) -> String {
    donors
        .iter()
        .map(|d| mail::gift_line(d.received(), &d.full_name()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sets gift notifications, queues one email per membership and marks the
/// donors notified, all in one transaction.
#[instrument(skip_all)]
pub async fn gift_notify(pool: &Pool, cfg: &Config) -> Result<usize> {
    let mut by_ship: BTreeMap<i64, Vec<Donor>> = BTreeMap::new();
    for donor in repo::unnotified_gift_donors(pool).await? {
        by_ship.entry(donor.membership_id).or_default().push(donor);
    }
    if by_ship.is_empty() {
        return Ok(0);
    }

    let mut recipients = BTreeMap::new();
    for ship_id in by_ship.keys() {
        if let Some(contact) = repo::membership_contact(pool, *ship_id).await? {
            recipients.insert(*ship_id, contact.email);
        }
    }

    let mut tx = pool.begin().await?;
    for (ship_id, donors) in &by_ship {
        repo::set_notifications_tx(&mut tx, *ship_id, &gift_notification(donors)).await?;
        if let Some(to) = recipients.get(ship_id) {
            outbox::queue_email_tx(&mut tx, &mail::gift_received(cfg, to)).await?;
        }
        for donor in donors {
            repo::mark_gift_notified_tx(&mut tx, donor.id).await?;
        }
        info!(membership_id = ship_id, gifts = donors.len(), "gift notification set");
    }
    tx.commit().await?;
    Ok(by_ship.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn step(id: i64, date: NaiveDate, done: bool) -> Step {
        Step {
            id,
            donor_id: 1,
            created: Utc::now(),
            date,
            description: format!("step {id}"),
            completed: done.then(Utc::now),
            asked: false,
            promised: None,
        }
    }

    #[test]
    fn overdue_means_before_yesterday_and_incomplete() {
        let today = NaiveDate::from_ymd_opt(2014, 5, 10).unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2014, 5, day).unwrap();
        let steps = vec![
            step(1, d(1), false),
            step(2, d(8), false),
            step(3, d(9), false),
            step(4, d(5), true),
            step(5, d(7), false),
        ];
        let ids: Vec<i64> = overdue_steps(&steps, today).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 5, 1]);
    }
}
