//! Staff reports over applications, awards and organizations, rendered as an
//! HTML table for browsing or as CSV for download.
//!
//! Every filter and column group is a closed enum; requests naming anything
//! else fail to deserialize.
use crate::db::grants as grants_repo;
use crate::db::model::{GrantApplication, Organization};
use crate::db::reports::{self as repo, ApplicationRow, ProjectLink};
use crate::db::Pool;
use crate::forms;
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Application,
    Award,
    Organization,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Application => "application",
            ReportKind::Award => "award",
            ReportKind::Organization => "organization",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Browse,
    Csv,
}

/// Filters shared by every report, matched against an organization profile
/// or the profile copy on an application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrgFilters {
    /// Case-insensitive substring of the organization name.
    pub organization_name: String,
    pub city: String,
    pub states: Vec<String>,
    pub has_fiscal_sponsor: bool,
}

impl OrgFilters {
    fn matches(&self, name: &str, city: &str, state: &str, fiscal_org: &str) -> bool {
        let wanted = self.organization_name.trim().to_lowercase();
        if !wanted.is_empty() && !name.to_lowercase().contains(&wanted) {
            return false;
        }
        let city_wanted = self.city.trim();
        if !city_wanted.is_empty() && !city.eq_ignore_ascii_case(city_wanted) {
            return false;
        }
        if !self.states.is_empty() && !self.states.iter().any(|s| s == state) {
            return false;
        }
        !self.has_fiscal_sponsor || !fiscal_org.is_empty()
    }

    fn matches_org(&self, org: &Organization) -> bool {
        self.matches(&org.name, &org.city, &org.state, &org.fiscal_org)
    }
}

fn year_in(year: i32, min: Option<i32>, max: Option<i32>) -> bool {
    min.map_or(true, |m| year >= m) && max.map_or(true, |m| year <= m)
}

// ---- column groups ----

const CONTACT: [&str; 10] = [
    "contact_person",
    "contact_person_title",
    "address",
    "city",
    "state",
    "zip",
    "telephone_number",
    "fax_number",
    "email_address",
    "website",
];
const ORG: [&str; 5] = ["status", "ein", "founded", "mission", "previous_grants"];
const PROPOSAL: [&str; 9] = [
    "start_year",
    "budget_last",
    "budget_current",
    "grant_request",
    "grant_period",
    "amount_requested",
    "support_type",
    "project_title",
    "project_budget",
];
const FISCAL: [&str; 5] = [
    "fiscal_org",
    "fiscal_person",
    "fiscal_telephone",
    "fiscal_email",
    "fiscal_address",
];
const COLLAB: [&str; 8] = [
    "collab_ref1_name",
    "collab_ref1_org",
    "collab_ref1_phone",
    "collab_ref1_email",
    "collab_ref2_name",
    "collab_ref2_org",
    "collab_ref2_phone",
    "collab_ref2_email",
];
const RACIAL_JUSTICE: [&str; 8] = [
    "racial_justice_ref1_name",
    "racial_justice_ref1_org",
    "racial_justice_ref1_phone",
    "racial_justice_ref1_email",
    "racial_justice_ref2_name",
    "racial_justice_ref2_org",
    "racial_justice_ref2_phone",
    "racial_justice_ref2_email",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppFieldGroup {
    Basics,
    Contact,
    Org,
    Proposal,
    Fiscal,
    Collab,
    RacialJustice,
    Bonuses,
}

impl AppFieldGroup {
    pub const ALL: [AppFieldGroup; 8] = [
        AppFieldGroup::Basics,
        AppFieldGroup::Contact,
        AppFieldGroup::Org,
        AppFieldGroup::Proposal,
        AppFieldGroup::Fiscal,
        AppFieldGroup::Collab,
        AppFieldGroup::RacialJustice,
        AppFieldGroup::Bonuses,
    ];

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            AppFieldGroup::Basics => &["id", "pre_screening_status"],
            AppFieldGroup::Contact => &CONTACT,
            AppFieldGroup::Org => &ORG,
            AppFieldGroup::Proposal => &PROPOSAL,
            AppFieldGroup::Fiscal => &FISCAL,
            AppFieldGroup::Collab => &COLLAB,
            AppFieldGroup::RacialJustice => &RACIAL_JUSTICE,
            AppFieldGroup::Bonuses => &["scoring_bonus_poc", "scoring_bonus_geo"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppExtra {
    AssignedProjects,
    ProjectScreening,
    Awarded,
}

impl AppExtra {
    pub fn header(&self) -> &'static str {
        match self {
            AppExtra::AssignedProjects => "Assigned GPs",
            AppExtra::ProjectScreening => "GP screening status",
            AppExtra::Awarded => "Awarded",
        }
    }
}

/// Organization profile groups used by the award and organization reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgFieldGroup {
    Contact,
    Org,
    Fiscal,
}

impl OrgFieldGroup {
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            // organizations carry no contact person
            OrgFieldGroup::Contact => &CONTACT[2..],
            OrgFieldGroup::Org => &ORG[..4],
            OrgFieldGroup::Fiscal => &FISCAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardField {
    Id,
    CheckNumber,
    Approved,
    AgreementMailed,
    AgreementReturned,
    YearEndReportDue,
}

impl AwardField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AwardField::Id => "id",
            AwardField::CheckNumber => "check_number",
            AwardField::Approved => "approved",
            AwardField::AgreementMailed => "agreement_mailed",
            AwardField::AgreementReturned => "agreement_returned",
            AwardField::YearEndReportDue => "year_end_report_due",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgExtra {
    LoginEmail,
    GrantApplications,
    GrantsAwarded,
}

// ---- requests ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplicationFilters {
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub organization: OrgFilters,
    /// Pre-screening status codes.
    pub pre_screening_status: Vec<i64>,
    /// Project screening status codes; any assignment may match.
    pub screening_status: Vec<i64>,
    pub poc_bonus: bool,
    pub geo_bonus: bool,
    pub grant_cycles: Vec<String>,
    pub giving_projects: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplicationReport {
    pub format: OutputFormat,
    pub filters: ApplicationFilters,
    pub fields: Vec<AppFieldGroup>,
    pub extras: Vec<AppExtra>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwardFilters {
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub organization: OrgFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwardReport {
    pub format: OutputFormat,
    pub filters: AwardFilters,
    pub fields: Vec<AwardField>,
    pub org_fields: Vec<OrgFieldGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrganizationFilters {
    /// `Some(true)` keeps organizations with a login, `Some(false)` those without.
    pub registered: Option<bool>,
    pub organization: OrgFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrganizationReport {
    pub format: OutputFormat,
    pub filters: OrganizationFilters,
    pub fields: Vec<OrgFieldGroup>,
    pub extras: Vec<OrgExtra>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportRequest {
    Application(ApplicationReport),
    Award(AwardReport),
    Organization(OrganizationReport),
}

impl ReportRequest {
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportRequest::Application(_) => ReportKind::Application,
            ReportRequest::Award(_) => ReportKind::Award,
            ReportRequest::Organization(_) => ReportKind::Organization,
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            ReportRequest::Application(r) => r.format,
            ReportRequest::Award(r) => r.format,
            ReportRequest::Organization(r) => r.format,
        }
    }
}

// ---- tables ----

/// `field.capitalize().replace('_', ' ')`.
pub fn header_label(field: &str) -> String {
    let mut chars = field.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    capitalized.replace('_', " ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn csv_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

impl Table {
    /// Header row then one line per row, CRLF-terminated.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for line in std::iter::once(&self.headers).chain(&self.rows) {
            let cells: Vec<String> = line.iter().map(|c| csv_cell(c)).collect();
            out.push_str(&cells.join(","));
            out.push_str("\r\n");
        }
        out
    }

    /// Escaped cells; newlines inside a cell become `<br>`.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<table>\n<thead><tr>");
        for h in &self.headers {
            out.push_str(&format!("<th>{}</th>", escape_html(h)));
        }
        out.push_str("</tr></thead>\n<tbody>\n");
        for row in &self.rows {
            out.push_str("<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", escape_html(cell).replace('\n', "<br>")));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n");
        out
    }
}

fn date_cell(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn bool_cell(b: bool) -> String {
    if b { "True" } else { "False" }.to_string()
}

// ---- applications ----

fn app_value(app: &GrantApplication, field: &str) -> String {
    match field {
        "id" => app.id.to_string(),
        "pre_screening_status" => app.pre_screening_status.label().to_string(),
        "scoring_bonus_poc" => bool_cell(app.scoring_bonus_poc),
        "scoring_bonus_geo" => bool_cell(app.scoring_bonus_geo),
        _ => match app.data.text.get(field) {
            Some(text) => text.to_string(),
            None => app.data.money(field).map(|v| v.to_string()).unwrap_or_default(),
        },
    }
}

fn extra_value(extra: AppExtra, links: &[&ProjectLink]) -> String {
    let parts: Vec<String> = match extra {
        AppExtra::AssignedProjects => links.iter().map(|l| l.project.clone()).collect(),
        AppExtra::ProjectScreening => links
            .iter()
            .map(|l| match l.screening_status {
                Some(s) => format!("{} ({})", s.label(), l.project),
                None => format!("{} (none)", l.project),
            })
            .collect(),
        AppExtra::Awarded => links
            .iter()
            .filter_map(|l| l.award_amount.map(|a| format!("{} {}", a, l.project)))
            .collect(),
    };
    parts.join(", ")
}

fn app_matches(f: &ApplicationFilters, row: &ApplicationRow, links: &[&ProjectLink]) -> bool {
    let app = &row.application;
    let text = &app.data.text;
    if !year_in(app.submission_time.year(), f.year_min, f.year_max) {
        return false;
    }
    if !f
        .organization
        .matches(&row.organization, &text.city, &text.state, &text.fiscal_org)
    {
        return false;
    }
    if !f.pre_screening_status.is_empty()
        && !f.pre_screening_status.contains(&app.pre_screening_status.code())
    {
        return false;
    }
    if !f.screening_status.is_empty()
        && !links.iter().any(|l| {
            l.screening_status
                .is_some_and(|s| f.screening_status.contains(&s.code()))
        })
    {
        return false;
    }
    if (f.poc_bonus && !app.scoring_bonus_poc) || (f.geo_bonus && !app.scoring_bonus_geo) {
        return false;
    }
    if !f.grant_cycles.is_empty() && !f.grant_cycles.contains(&row.cycle) {
        return false;
    }
    f.giving_projects.is_empty() || links.iter().any(|l| f.giving_projects.contains(&l.project))
}

pub fn application_table(req: &ApplicationReport, rows: &[ApplicationRow], links: &[ProjectLink]) -> Table {
    let mut by_app: HashMap<i64, Vec<&ProjectLink>> = HashMap::new();
    for link in links {
        by_app.entry(link.application_id).or_default().push(link);
    }
    let fields: Vec<&str> = AppFieldGroup::ALL
        .into_iter()
        .filter(|g| req.fields.contains(g))
        .flat_map(|g| g.fields().iter().copied())
        .collect();

    let mut headers: Vec<String> = ["submission_time", "organization", "grant_cycle"]
        .into_iter()
        .chain(fields.iter().copied())
        .map(header_label)
        .collect();
    headers.extend(req.extras.iter().map(|e| e.header().to_string()));

    let none = Vec::new();
    let rows = rows
        .iter()
        .filter_map(|row| {
            let app_links = by_app.get(&row.application.id).unwrap_or(&none);
            if !app_matches(&req.filters, row, app_links) {
                return None;
            }
            let mut cells = vec![
                row.application.submission_time.format("%Y-%m-%d %H:%M").to_string(),
                row.organization.clone(),
                row.cycle.clone(),
            ];
            cells.extend(fields.iter().map(|f| app_value(&row.application, f)));
            cells.extend(req.extras.iter().map(|e| extra_value(*e, app_links)));
            Some(cells)
        })
        .collect();
    Table { headers, rows }
}

// ---- awards and organizations ----

fn org_value(org: &Organization, field: &str) -> String {
    match field {
        "founded" => org.founded.map(|y| y.to_string()).unwrap_or_default(),
        _ => org.profile_text(field).unwrap_or_default().to_string(),
    }
}

fn org_fields(groups: &[OrgFieldGroup]) -> Vec<&'static str> {
    [OrgFieldGroup::Contact, OrgFieldGroup::Org, OrgFieldGroup::Fiscal]
        .into_iter()
        .filter(|g| groups.contains(g))
        .flat_map(|g| g.fields().iter().copied())
        .collect()
}

/// One award row before formatting; sponsored grants have no agreement.
struct AwardLine<'a> {
    id: i64,
    org: &'a Organization,
    grant_type: &'static str,
    year: i32,
    amount: i64,
    check_number: Option<i64>,
    check_mailed: Option<NaiveDate>,
    approved: Option<NaiveDate>,
    agreement_mailed: Option<NaiveDate>,
    agreement_returned: Option<NaiveDate>,
    yearend_due: Option<NaiveDate>,
}

impl AwardLine<'_> {
    fn value(&self, field: AwardField) -> String {
        match field {
            AwardField::Id => self.id.to_string(),
            AwardField::CheckNumber => self.check_number.map(|n| n.to_string()).unwrap_or_default(),
            AwardField::Approved => date_cell(self.approved),
            AwardField::AgreementMailed => date_cell(self.agreement_mailed),
            AwardField::AgreementReturned => date_cell(self.agreement_returned),
            AwardField::YearEndReportDue => date_cell(self.yearend_due),
        }
    }
}

#[instrument(skip_all)]
async fn award_table(pool: &Pool, req: &AwardReport) -> Result<Table> {
    let orgs: HashMap<i64, Organization> = grants_repo::list_organizations(pool)
        .await?
        .into_iter()
        .map(|o| (o.id, o))
        .collect();
    let awards = repo::all_awards(pool).await?;
    let sponsored = repo::all_sponsored_grants(pool).await?;

    let mut lines = Vec::new();
    for ctx in &awards {
        let Some(org) = orgs.get(&ctx.organization_id) else {
            continue;
        };
        let a = &ctx.award;
        lines.push(AwardLine {
            id: a.id,
            org,
            grant_type: "Giving project",
            year: a.created.year(),
            amount: a.amount,
            check_number: a.check_number,
            check_mailed: a.check_mailed,
            approved: a.approved,
            agreement_mailed: a.agreement_mailed,
            agreement_returned: a.agreement_returned,
            yearend_due: a.yearend_due(),
        });
    }
    for s in &sponsored {
        let Some(org) = orgs.get(&s.organization_id) else {
            continue;
        };
        lines.push(AwardLine {
            id: s.id,
            org,
            grant_type: "Sponsored program",
            year: s.entered.year(),
            amount: s.amount,
            check_number: s.check_number,
            check_mailed: s.check_mailed,
            approved: s.approved,
            agreement_mailed: None,
            agreement_returned: None,
            yearend_due: None,
        });
    }

    let f = &req.filters;
    let org_cols = org_fields(&req.org_fields);
    let mut headers: Vec<String> = ["check_mailed", "amount", "organization", "grant_type"]
        .into_iter()
        .chain(req.fields.iter().map(|f| f.as_str()))
        .map(header_label)
        .collect();
    headers.extend(org_cols.iter().map(|c| format!("Org. {}", header_label(c))));

    let rows = lines
        .iter()
        .filter(|l| year_in(l.year, f.year_min, f.year_max) && f.organization.matches_org(l.org))
        .map(|l| {
            let mut cells = vec![
                date_cell(l.check_mailed),
                l.amount.to_string(),
                l.org.name.clone(),
                l.grant_type.to_string(),
            ];
            cells.extend(req.fields.iter().map(|field| l.value(*field)));
            cells.extend(org_cols.iter().map(|c| org_value(l.org, c)));
            cells
        })
        .collect();
    Ok(Table { headers, rows })
}

#[instrument(skip_all)]
async fn organization_table(pool: &Pool, req: &OrganizationReport) -> Result<Table> {
    let f = &req.filters;
    let orgs: Vec<Organization> = grants_repo::list_organizations(pool)
        .await?
        .into_iter()
        .filter(|o| f.registered.map_or(true, |r| r == !o.email.is_empty()))
        .filter(|o| f.organization.matches_org(o))
        .collect();

    let mut applications: HashMap<i64, Vec<String>> = HashMap::new();
    if req.extras.contains(&OrgExtra::GrantApplications) {
        for (org_id, s) in repo::submitted_by_org(pool).await? {
            applications
                .entry(org_id)
                .or_default()
                .push(format!("{} {}", s.cycle_title, s.submission_time.format("%m/%d/%Y")));
        }
    }
    let mut awarded: HashMap<i64, Vec<String>> = HashMap::new();
    if req.extras.contains(&OrgExtra::GrantsAwarded) {
        for ctx in repo::all_awards(pool).await? {
            let date = ctx
                .award
                .check_mailed
                .unwrap_or_else(|| ctx.award.created.date_naive());
            awarded.entry(ctx.organization_id).or_default().push(format!(
                "${} {} {}",
                forms::intcomma(ctx.award.amount),
                ctx.giving_project,
                date.format("%m/%d/%Y")
            ));
        }
        for s in repo::all_sponsored_grants(pool).await? {
            let date = s.check_mailed.unwrap_or_else(|| s.entered.date_naive());
            awarded.entry(s.organization_id).or_default().push(format!(
                "${} sponsored program grant {}",
                forms::intcomma(s.amount),
                date.format("%m/%d/%Y")
            ));
        }
    }

    let cols = org_fields(&req.fields);
    let login = req.extras.contains(&OrgExtra::LoginEmail);
    let mut headers = vec![header_label("name")];
    if login {
        headers.push("Login email".to_string());
    }
    headers.extend(cols.iter().map(|c| header_label(c)));
    if req.extras.contains(&OrgExtra::GrantApplications) {
        headers.push("Grant applications".to_string());
    }
    if req.extras.contains(&OrgExtra::GrantsAwarded) {
        headers.push("Grants awarded".to_string());
    }

    let rows = orgs
        .iter()
        .map(|org| {
            let mut cells = vec![org.name.clone()];
            if login {
                cells.push(org.email.clone());
            }
            cells.extend(cols.iter().map(|c| org_value(org, c)));
            if req.extras.contains(&OrgExtra::GrantApplications) {
                cells.push(applications.get(&org.id).map(|v| v.join("\n")).unwrap_or_default());
            }
            if req.extras.contains(&OrgExtra::GrantsAwarded) {
                cells.push(awarded.get(&org.id).map(|v| v.join("\n")).unwrap_or_default());
            }
            cells
        })
        .collect();
    Ok(Table { headers, rows })
}

/// A finished report ready to send.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub content_type: &'static str,
    /// Set for CSV downloads.
    pub filename: Option<String>,
    pub body: String,
}

#[instrument(skip_all)]
pub async fn build_table(pool: &Pool, req: &ReportRequest) -> Result<Table> {
    match req {
        ReportRequest::Application(r) => {
            let rows = repo::application_rows(pool).await?;
            let links = repo::project_links(pool).await?;
            Ok(application_table(r, &rows, &links))
        }
        ReportRequest::Award(r) => award_table(pool, r).await,
        ReportRequest::Organization(r) => organization_table(pool, r).await,
    }
}

#[instrument(skip_all)]
pub async fn run(pool: &Pool, req: &ReportRequest) -> Result<RenderedReport> {
    let table = build_table(pool, req).await?;
    info!(kind = req.kind().as_str(), rows = table.rows.len(), "report built");
    Ok(match req.format() {
        OutputFormat::Browse => RenderedReport {
            content_type: "text/html; charset=utf-8",
            filename: None,
            body: table.to_html(),
        },
        OutputFormat::Csv => RenderedReport {
            content_type: "text/csv; charset=utf-8",
            filename: Some(format!("{}.csv", req.kind().as_str())),
            body: table.to_csv(),
        },
    })
}
