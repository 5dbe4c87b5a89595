//! Grant cycle pages: the fetched info page and the organization home.
use super::WorkflowError;
use crate::db::awards as awards_repo;
use crate::db::grants as repo;
use crate::db::model::{
    AwardContext, DraftSummary, GrantCycle, Organization, SponsoredProgramGrant, SubmittedSummary,
};
use crate::db::Pool;
use crate::model::CycleStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tracing::{error, info, instrument};

/// Cycles that closed longer ago than this drop off the home page.
pub const RECENT_CYCLE_DAYS: i64 = 180;

const CONTENT_START: &str = "<div id=\"content\"";
const CONTENT_END: &str = "<!-- /#content";

/// The content block of a fetched info page, with icon paths rewritten.
pub fn extract_content(html: &str) -> Option<String> {
    let start = html.find(CONTENT_START)?;
    let end = html.find(CONTENT_END)?;
    if end <= start {
        return None;
    }
    Some(html[start..end].replace("modules/file/icons", "static/images"))
}

pub fn fallback_content(url: &str) -> String {
    format!(
        "<h4 class=\"center\">Sorry, the cycle information page could not be loaded.<br>Try visiting it directly: <a href=\"{url}\" target=\"_blank\">grant cycle information</a>"
    )
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .timeout(StdDuration::from_secs(10))
        .send()
        .await
        .context("info page request failed")?
        .error_for_status()
        .context("info page returned an error status")?;
    resp.text().await.context("info page body unreadable")
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoPage {
    pub cycle: GrantCycle,
    pub content: String,
}

/// Fetches the cycle's external information page. Failures fall back to a
/// link to the page itself.
#[instrument(skip_all)]
pub async fn info_page(
    pool: &Pool,
    client: &reqwest::Client,
    cycle_id: i64,
) -> Result<InfoPage, WorkflowError> {
    let cycle = repo::get_cycle(pool, cycle_id)
        .await?
        .ok_or(WorkflowError::NotFound("grant cycle"))?;
    if cycle.info_page.is_empty() {
        return Err(WorkflowError::NotFound("info page"));
    }
    let content = match fetch(client, &cycle.info_page).await {
        Ok(html) => match extract_content(&html) {
            Some(content) if !content.is_empty() => {
                info!(url = %cycle.info_page, "received info page content");
                content
            }
            _ => {
                error!(url = %cycle.info_page, "info page content could not be split");
                fallback_content(&cycle.info_page)
            }
        },
        Err(err) => {
            error!(?err, url = %cycle.info_page, "error fetching cycle info page");
            fallback_content(&cycle.info_page)
        }
    };
    Ok(InfoPage { cycle, content })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleBuckets {
    pub open: Vec<GrantCycle>,
    pub applied: Vec<GrantCycle>,
    pub closed: Vec<GrantCycle>,
    pub upcoming: Vec<GrantCycle>,
}

/// Sorts recent cycles by status; open cycles the org already applied to
/// go to `applied`. Private cycles are never listed.
pub fn bucket_cycles(
    mut cycles: Vec<GrantCycle>,
    applied_to: &HashSet<i64>,
    now: DateTime<Utc>,
) -> CycleBuckets {
    let since = now - Duration::days(RECENT_CYCLE_DAYS);
    cycles.retain(|c| c.close > since && !c.private);
    cycles.sort_by(|a, b| a.open.cmp(&b.open).then(a.id.cmp(&b.id)));
    let mut buckets = CycleBuckets::default();
    for cycle in cycles {
        match cycle.status(now) {
            CycleStatus::Open if applied_to.contains(&cycle.id) => buckets.applied.push(cycle),
            CycleStatus::Open => buckets.open.push(cycle),
            CycleStatus::Closed => buckets.closed.push(cycle),
            CycleStatus::Upcoming => buckets.upcoming.push(cycle),
        }
    }
    buckets
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgHome {
    pub organization: Organization,
    pub saved: Vec<DraftSummary>,
    pub submitted: Vec<SubmittedSummary>,
    pub cycles: CycleBuckets,
    pub awards: Vec<AwardContext>,
    pub sponsored: Vec<SponsoredProgramGrant>,
}

#[instrument(skip_all)]
pub async fn org_home(pool: &Pool, org: &Organization, now: DateTime<Utc>) -> Result<OrgHome> {
    let submitted = repo::applications_for_org(pool, org.id).await?;
    let applied_to: HashSet<i64> = submitted.iter().map(|s| s.grant_cycle_id).collect();
    Ok(OrgHome {
        organization: org.clone(),
        saved: repo::drafts_for_org(pool, org.id).await?,
        cycles: bucket_cycles(repo::list_cycles(pool).await?, &applied_to, now),
        submitted,
        awards: awards_repo::awards_for_org(pool, org.id).await?,
        sponsored: awards_repo::sponsored_grants_for_org(pool, org.id).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(id: i64, open_days: i64, close_days: i64, now: DateTime<Utc>) -> GrantCycle {
        GrantCycle {
            id,
            title: format!("cycle {id}"),
            open: now + Duration::days(open_days),
            close: now + Duration::days(close_days),
            extra_question: String::new(),
            info_page: String::new(),
            email_signature: String::new(),
            conflicts: String::new(),
            private: false,
        }
    }

    #[test]
    fn info_page_slice() {
        let html = r#"<html><div id="header"></div><div id="content" class="x"><img src="/modules/file/icons/pdf.png"></div><!-- /#content --></html>"#;
        let content = extract_content(html).unwrap();
        assert!(content.starts_with("<div id=\"content\""));
        assert!(content.contains("/static/images/pdf.png"));
        assert!(!content.contains("/#content"));
        assert_eq!(extract_content("<html>nothing here</html>"), None);
        assert!(fallback_content("http://x.org/info").contains("http://x.org/info"));
    }

    #[test]
    fn cycles_are_bucketed() {
        let now = Utc::now();
        let mut private = cycle(6, -10, 10, now);
        private.private = true;
        let cycles = vec![
            cycle(1, -10, 10, now),
            cycle(2, -20, 5, now),
            cycle(3, -100, -30, now),
            cycle(4, -400, -200, now),
            cycle(5, 10, 40, now),
            private,
        ];
        let applied: HashSet<i64> = [2].into_iter().collect();
        let b = bucket_cycles(cycles, &applied, now);
        let ids = |v: &[GrantCycle]| v.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(&b.open), vec![1]);
        assert_eq!(ids(&b.applied), vec![2]);
        assert_eq!(ids(&b.closed), vec![3]);
        assert_eq!(ids(&b.upcoming), vec![5]);
    }
}
