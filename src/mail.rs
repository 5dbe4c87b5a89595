//! Outgoing email: the `Mailer` seam, an HTTP relay implementation, and the
//! builders for every message the site sends.
use crate::config::Config;
use crate::forms::intcomma;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Posts messages as JSON to a mail relay.
#[derive(Clone)]
pub struct RelayMailer {
    http: Client,
    url: Url,
    token: String,
}

impl fmt::Debug for RelayMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayMailer")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RelayMailer {
    pub fn new(url: &str, token: String) -> Result<Self> {
        let url = Url::parse(url).context("invalid mail relay URL")?;
        let http = Client::builder()
            .user_agent("giving-central/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, url, token })
    }

    pub fn build_request(&self, email: &Email) -> Result<reqwest::Request> {
        let mut req = self.http.post(self.url.clone()).json(email);
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }
        req.build().context("failed to build relay request")
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let request = self.build_request(email)?;
        debug!(url = %request.url(), subject = %email.subject, "sending email");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach mail relay")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("mail relay error {}: {}", status, body));
        }
        Ok(())
    }
}

/// Logs messages instead of delivering them; used when no relay is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        info!(to = ?email.to, subject = %email.subject, "email not delivered (no relay configured)");
        Ok(())
    }
}

pub fn from_config(cfg: &Config) -> Result<std::sync::Arc<dyn Mailer>> {
    if cfg.mail.relay_url.trim().is_empty() {
        Ok(std::sync::Arc::new(LogMailer))
    } else {
        Ok(std::sync::Arc::new(RelayMailer::new(
            &cfg.mail.relay_url,
            cfg.mail.relay_token.clone(),
        )?))
    }
}

fn fund_email(cfg: &Config, to: &str, subject: &str, body: String) -> Email {
    Email {
        from: cfg.mail.fund_from.clone(),
        to: vec![to.to_string()],
        cc: vec![cfg.site.support_email.clone()],
        subject: subject.to_string(),
        body,
    }
}

fn grants_email(cfg: &Config, to: &str, subject: &str, body: String) -> Email {
    Email {
        from: cfg.mail.grants_from.clone(),
        to: vec![to.to_string()],
        cc: vec![cfg.site.support_email.clone()],
        subject: subject.to_string(),
        body,
    }
}

// ---- fund ----

pub fn membership_approved(cfg: &Config, to: &str, project: &str) -> Email {
    let body = format!(
        "Your membership in {project} has been approved.\n\nLog in to Project Central to start tracking your fundraising: {}\n",
        cfg.site_url("/fund/login")
    );
    fund_email(cfg, to, "Membership Approved", body)
}

pub fn overdue_steps(
    cfg: &Config,
    to: &str,
    project: &str,
    count: usize,
    step_description: &str,
    step_date: NaiveDate,
) -> Email {
    let noun = if count == 1 { "step" } else { "steps" };
    let body = format!(
        "You have {count} overdue fundraising {noun} for {project}.\n\nMost recent: {step_description} (scheduled for {}).\n\nLog in to update your steps: {}\n",
        step_date.format("%m/%d/%Y"),
        cfg.site_url("/fund/login")
    );
    fund_email(cfg, to, "Fundraising Steps", body)
}

pub fn accounts_pending(cfg: &Config, to: &str, count: i64) -> Email {
    let body = format!(
        "There are {count} membership(s) awaiting approval in your giving project.\n\nApprove them here: {}\n\nQuestions? Contact {}.\n",
        cfg.site_url("/admin/memberships"),
        cfg.site.support_email
    );
    fund_email(cfg, to, "Accounts pending approval", body)
}

pub fn gift_received(cfg: &Config, to: &str) -> Email {
    let body = format!(
        "A gift from one of your contacts has been received!\n\nLog in to see the details: {}\n",
        cfg.site_url("/fund/")
    );
    fund_email(cfg, to, "Gift received", body)
}

/// Notification line shown on the member's home page.
pub fn gift_line(amount: i64, donor_name: &str) -> String {
    format!("Gift of ${} received from {donor_name}!", intcomma(amount))
}

// ---- grants ----

pub fn application_submitted(cfg: &Config, to: &str, org: &str, cycle: &str) -> Email {
    let body = format!(
        "Thank you, {org}. Your application to {cycle} has been received.\n\nYou can view it from your home page: {}\n",
        cfg.site_url("/apply/")
    );
    grants_email(cfg, to, "Grant application submitted", body)
}

pub fn draft_closing_soon(cfg: &Config, to: &str, org: &str, cycle: &str, close: &str) -> Email {
    let body = format!(
        "Hello {org},\n\nYour draft application to {cycle} has not been submitted. The cycle closes {close}.\n\nFinish your application: {}\n",
        cfg.site_url("/apply/")
    );
    grants_email(cfg, to, "Grant cycle closing soon", body)
}

pub fn yer_reminder(cfg: &Config, to: &str, org: &str, due: NaiveDate, award_id: i64) -> Email {
    let body = format!(
        "Hello {org},\n\nYour year-end report is due {}.\n\nStart or continue it here: {}\n",
        due.format("%m/%d/%Y"),
        cfg.site_url(&format!("/report/{award_id}"))
    );
    grants_email(cfg, to, "Year end report reminder", body)
}

pub fn yer_submitted(cfg: &Config, to: &str, org: &str, project: &str) -> Email {
    let body = format!(
        "Thank you, {org}. Your year-end report for your {project} grant has been received.\n"
    );
    grants_email(cfg, to, "Year end report submitted", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        serde_yaml::from_str(crate::config::example()).unwrap()
    }

    #[test]
    fn relay_request_carries_token_and_json() {
        let mailer = RelayMailer::new("http://relay.local/send", "tok".into()).unwrap();
        let email = membership_approved(&cfg(), "ann@example.org", "Seattle GP");
        let request = mailer.build_request(&email).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer tok"
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let decoded: Email = serde_json::from_slice(body).unwrap();
        assert_eq!(decoded, email);
    }

    #[test]
    fn messages_use_area_senders_and_cc_support() {
        let cfg = cfg();
        let fund = gift_received(&cfg, "m@example.org");
        assert_eq!(fund.from, cfg.mail.fund_from);
        assert_eq!(fund.cc, vec![cfg.site.support_email.clone()]);
        let grants = application_submitted(&cfg, "org@example.org", "Org", "Spring 2014");
        assert_eq!(grants.from, cfg.mail.grants_from);
        assert_eq!(grants.subject, "Grant application submitted");
        assert!(grants.body.contains("https://sjf-nw.appspot.com/apply/"));
    }

    #[test]
    fn gift_lines_use_thousands_separators() {
        assert_eq!(gift_line(1500, "Ann Lee"), "Gift of $1,500 received from Ann Lee!");
    }
}
