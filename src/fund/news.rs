//! Daily activity stories shown on the project page.
use crate::db::fund as repo;
use crate::db::model::Step;
use crate::db::Pool;
use crate::forms::intcomma;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// Counts for one member's completed steps on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayTally {
    pub talked: usize,
    pub asked: usize,
    pub promised: i64,
}

/// A donor counts once: an ask moves them out of the talked set.
pub fn tally(steps: &[Step]) -> DayTally {
    let mut talked: HashSet<i64> = HashSet::new();
    let mut asked: HashSet<i64> = HashSet::new();
    let mut out = DayTally::default();
    for step in steps {
        if step.asked {
            out.asked += 1;
            asked.insert(step.donor_id);
            talked.remove(&step.donor_id);
        } else if !talked.contains(&step.donor_id) && !asked.contains(&step.donor_id) {
            talked.insert(step.donor_id);
        }
        if let Some(p) = step.promised.filter(|p| *p > 0) {
            out.promised = out.promised.saturating_add(p);
        }
    }
    out.talked = talked.len();
    out
}

fn people(n: usize) -> &'static str {
    if n > 1 {
        "people"
    } else {
        "person"
    }
}

/// `None` when nothing happened worth a story.
pub fn summary(first_name: &str, t: &DayTally) -> Option<String> {
    let mut s = first_name.to_string();
    if t.talked > 0 {
        s.push_str(&format!(" talked to {} {}", t.talked, people(t.talked)));
        if t.asked > 0 {
            if t.promised > 0 {
                s.push_str(&format!(", asked {}", t.asked));
            } else {
                s.push_str(&format!(" and asked {}", t.asked));
            }
        }
    } else if t.asked > 0 {
        s.push_str(&format!(" asked {} {}", t.asked, people(t.asked)));
    } else {
        return None;
    }
    if t.promised > 0 {
        s.push_str(&format!(" and got ${} in promises", intcomma(t.promised)));
    }
    s.push('.');
    Some(s)
}

/// Recomputes the membership's story for the day of `time`.
#[instrument(skip_all)]
pub async fn update_story(pool: &Pool, membership_id: i64, time: DateTime<Utc>) -> Result<()> {
    let contact = repo::membership_contact(pool, membership_id)
        .await?
        .ok_or_else(|| anyhow!("membership {membership_id} does not exist"))?;
    let day = time.date_naive();
    let steps: Vec<Step> = repo::completed_steps_for_membership(pool, membership_id)
        .await?
        .into_iter()
        .filter(|s| s.completed.is_some_and(|c| c.date_naive() == day))
        .collect();

    let t = tally(&steps);
    let Some(text) = summary(&contact.first_name, &t) else {
        warn!(membership_id, "story update with nothing talked or asked");
        return Ok(());
    };
    repo::upsert_news(pool, membership_id, time, &text).await?;
    info!(membership_id, summary = %text, "story saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(donor_id: i64, asked: bool, promised: Option<i64>) -> Step {
        Step {
            id: 0,
            donor_id,
            created: Utc::now(),
            date: Utc::now().date_naive(),
            description: "call".into(),
            completed: Some(Utc::now()),
            asked,
            promised,
        }
    }

    #[test]
    fn asked_donor_is_not_double_counted() {
        let t = tally(&[step(1, false, None), step(1, true, None), step(2, false, None)]);
        assert_eq!(t, DayTally { talked: 1, asked: 1, promised: 0 });
        assert_eq!(
            summary("Ann", &t).unwrap(),
            "Ann talked to 1 person and asked 1."
        );
    }

    #[test]
    fn promises_change_the_joiner() {
        let t = tally(&[
            step(1, false, None),
            step(2, false, None),
            step(3, true, Some(1500)),
        ]);
        assert_eq!(
            summary("Ann", &t).unwrap(),
            "Ann talked to 2 people, asked 1 and got $1,500 in promises."
        );
    }

    #[test]
    fn asks_only() {
        let t = tally(&[step(1, true, None), step(2, true, Some(0))]);
        assert_eq!(summary("Bo", &t).unwrap(), "Bo asked 2 people.");
        assert_eq!(summary("Bo", &DayTally::default()), None);
    }
}
