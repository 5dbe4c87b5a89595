//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers; the few helpers here are pure derivations.

use crate::model::{CycleStatus, FileField, ScreeningStatus, YerFileField};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seconds during which a draft save by someone else triggers a warning.
pub const EDIT_WINDOW_SECS: i64 = 35;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub password_salt: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GivingProject {
    pub id: i64,
    pub title: String,
    pub public: bool,
    pub pre_approved: String,
    pub fundraising_training: DateTime<Utc>,
    pub fundraising_deadline: NaiveDate,
    pub fund_goal: i64,
    pub suggested_steps: String,
    pub site_visits: bool,
    pub calendar: String,
}

impl GivingProject {
    pub fn require_estimates(&self, now: DateTime<Utc>) -> bool {
        self.fundraising_training <= now
    }

    /// Lowercased, trimmed entries of the comma separated pre-approval list.
    pub fn pre_approved_emails(&self) -> Vec<String> {
        self.pre_approved
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn suggested_steps(&self) -> Vec<&str> {
        self.suggested_steps
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Soft pointer to a membership id; 0 when unset.
    pub current: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Membership {
    pub id: i64,
    pub giving_project_id: i64,
    pub member_id: i64,
    pub approved: bool,
    pub leader: bool,
    pub copied_contacts: bool,
    pub emailed: Option<NaiveDate>,
    pub last_activity: Option<NaiveDate>,
    pub notifications: String,
}

/// Membership joined with its project title, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipSummary {
    pub id: i64,
    pub giving_project_id: i64,
    pub project_title: String,
    pub approved: bool,
    pub leader: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Donor {
    pub id: i64,
    pub membership_id: i64,
    pub added: DateTime<Utc>,
    pub firstname: String,
    pub lastname: String,
    pub amount: Option<i64>,
    pub likelihood: Option<i64>,
    pub talked: bool,
    pub asked: bool,
    pub promised: Option<i64>,
    pub received_this: i64,
    pub received_next: i64,
    pub received_afternext: i64,
    pub gift_notified: bool,
    pub phone: String,
    pub email: String,
    pub notes: String,
    pub next_step_id: Option<i64>,
}

impl Donor {
    pub fn estimated(&self) -> i64 {
        match (self.amount, self.likelihood) {
            (Some(a), Some(l)) => a.saturating_mul(l) / 100,
            _ => 0,
        }
    }

    pub fn received(&self) -> i64 {
        self.received_this
            .saturating_add(self.received_next)
            .saturating_add(self.received_afternext)
    }

    pub fn full_name(&self) -> String {
        if self.lastname.is_empty() {
            self.firstname.clone()
        } else {
            format!("{} {}", self.firstname, self.lastname)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: i64,
    pub donor_id: i64,
    pub created: DateTime<Utc>,
    pub date: NaiveDate,
    pub description: String,
    pub completed: Option<DateTime<Utc>>,
    pub asked: bool,
    pub promised: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsItem {
    pub id: i64,
    pub membership_id: i64,
    pub date: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResource {
    pub session: String,
    pub title: String,
    pub summary: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    /// Login email; empty for organizations entered by staff.
    pub email: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub telephone_number: String,
    pub fax_number: String,
    pub email_address: String,
    pub website: String,
    pub status: String,
    pub ein: String,
    pub founded: Option<i64>,
    pub mission: String,
    pub fiscal_org: String,
    pub fiscal_person: String,
    pub fiscal_telephone: String,
    pub fiscal_email: String,
    pub fiscal_address: String,
    pub fiscal_letter: String,
}

impl Organization {
    /// Text profile columns copied between organizations and applications.
    pub const PROFILE_TEXT: [&'static str; 17] = [
        "address",
        "city",
        "state",
        "zip",
        "telephone_number",
        "fax_number",
        "email_address",
        "website",
        "status",
        "ein",
        "mission",
        "fiscal_org",
        "fiscal_person",
        "fiscal_telephone",
        "fiscal_email",
        "fiscal_address",
        "fiscal_letter",
    ];

    pub fn profile_text(&self, column: &str) -> Option<&str> {
        let v = match column {
            "address" => &self.address,
            "city" => &self.city,
            "state" => &self.state,
            "zip" => &self.zip,
            "telephone_number" => &self.telephone_number,
            "fax_number" => &self.fax_number,
            "email_address" => &self.email_address,
            "website" => &self.website,
            "status" => &self.status,
            "ein" => &self.ein,
            "mission" => &self.mission,
            "fiscal_org" => &self.fiscal_org,
            "fiscal_person" => &self.fiscal_person,
            "fiscal_telephone" => &self.fiscal_telephone,
            "fiscal_email" => &self.fiscal_email,
            "fiscal_address" => &self.fiscal_address,
            "fiscal_letter" => &self.fiscal_letter,
            _ => return None,
        };
        Some(v.as_str())
    }

    pub fn has_fiscal_sponsor(&self) -> bool {
        !self.fiscal_org.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantCycle {
    pub id: i64,
    pub title: String,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
    pub extra_question: String,
    pub info_page: String,
    pub email_signature: String,
    pub conflicts: String,
    pub private: bool,
}

impl GrantCycle {
    pub fn status(&self, now: DateTime<Utc>) -> CycleStatus {
        if self.open > now {
            CycleStatus::Upcoming
        } else if self.close > now {
            CycleStatus::Open
        } else {
            CycleStatus::Closed
        }
    }
}

/// File references keyed by the closed set of attachment columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRefs(BTreeMap<FileField, String>);

impl FileRefs {
    pub fn get(&self, field: FileField) -> &str {
        self.0.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: FileField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value);
        }
    }

    pub fn has(&self, field: FileField) -> bool {
        !self.get(field).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileField, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub id: i64,
    pub organization_id: i64,
    pub grant_cycle_id: i64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub modified_by: String,
    pub contents: serde_json::Map<String, serde_json::Value>,
    pub files: FileRefs,
    pub extended_deadline: Option<DateTime<Utc>>,
}

impl Draft {
    /// Open for edits: before the cycle closes or before a staff extension.
    pub fn editable(&self, cycle_close: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        cycle_close > now || self.extended_deadline.is_some_and(|d| d > now)
    }

    pub fn overdue(&self, cycle_close: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        cycle_close <= now
    }

    pub fn recently_edited(&self, now: DateTime<Utc>) -> bool {
        self.modified + Duration::seconds(EDIT_WINDOW_SECS) > now
    }

    /// String value of a contents key; numbers are rendered, other types ignored.
    pub fn field(&self, key: &str) -> String {
        match self.contents.get(key) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }
}

macro_rules! application_text {
    ($($name:ident),* $(,)?) => {
        /// Free-text answers of a grant application, one per column.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct ApplicationText {
            $(pub $name: String,)*
        }

        impl ApplicationText {
            pub const COLUMNS: &'static [&'static str] = &[$(stringify!($name)),*];

            pub fn get(&self, column: &str) -> Option<&str> {
                match column {
                    $(stringify!($name) => Some(self.$name.as_str()),)*
                    _ => None,
                }
            }

            pub fn set(&mut self, column: &str, value: String) -> bool {
                match column {
                    $(stringify!($name) => {
                        self.$name = value;
                        true
                    })*
                    _ => false,
                }
            }
        }
    };
}

application_text!(
    address,
    city,
    state,
    zip,
    telephone_number,
    fax_number,
    email_address,
    website,
    status,
    ein,
    mission,
    previous_grants,
    start_year,
    grant_request,
    contact_person,
    contact_person_title,
    grant_period,
    support_type,
    project_title,
    fiscal_org,
    fiscal_person,
    fiscal_telephone,
    fiscal_email,
    fiscal_address,
    narrative1,
    narrative2,
    narrative3,
    narrative4,
    narrative5,
    narrative6,
    cycle_question,
    collab_ref1_name,
    collab_ref1_org,
    collab_ref1_phone,
    collab_ref1_email,
    collab_ref2_name,
    collab_ref2_org,
    collab_ref2_phone,
    collab_ref2_email,
    racial_justice_ref1_name,
    racial_justice_ref1_org,
    racial_justice_ref1_phone,
    racial_justice_ref1_email,
    racial_justice_ref2_name,
    racial_justice_ref2_org,
    racial_justice_ref2_phone,
    racial_justice_ref2_email,
);

/// Number of timeline cells: five quarters of date, activities and goals.
pub const TIMELINE_CELLS: usize = 15;

/// Validated application contents, ready to be stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationData {
    pub text: ApplicationText,
    pub founded: i64,
    pub budget_last: i64,
    pub budget_current: i64,
    pub amount_requested: i64,
    pub project_budget: Option<i64>,
    pub timeline: Vec<String>,
    pub files: FileRefs,
}

impl ApplicationData {
    pub const MONEY_COLUMNS: [&'static str; 4] =
        ["founded", "budget_last", "budget_current", "amount_requested"];

    pub fn money(&self, column: &str) -> Option<i64> {
        match column {
            "founded" => Some(self.founded),
            "budget_last" => Some(self.budget_last),
            "budget_current" => Some(self.budget_current),
            "amount_requested" => Some(self.amount_requested),
            "project_budget" => self.project_budget,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantApplication {
    pub id: i64,
    pub organization_id: i64,
    pub grant_cycle_id: i64,
    pub submission_time: DateTime<Utc>,
    pub pre_screening_status: ScreeningStatus,
    pub scoring_bonus_poc: bool,
    pub scoring_bonus_geo: bool,
    pub data: ApplicationData,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectApp {
    pub id: i64,
    pub application_id: i64,
    pub giving_project_id: i64,
    pub screening_status: Option<ScreeningStatus>,
}

/// Row for a giving project's grant list.
#[derive(Debug, Clone, Serialize)]
pub struct GrantListItem {
    pub application_id: i64,
    pub organization: String,
    pub cycle: String,
    pub amount_requested: i64,
    pub support_type: String,
    pub pre_screening_status: ScreeningStatus,
    pub screening_status: Option<ScreeningStatus>,
}

/// Row for an organization's home page.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedSummary {
    pub id: i64,
    pub grant_cycle_id: i64,
    pub cycle_title: String,
    pub submission_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftSummary {
    pub id: i64,
    pub grant_cycle_id: i64,
    pub cycle_title: String,
    pub modified: DateTime<Utc>,
    pub close: DateTime<Utc>,
    pub extended_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GivingProjectGrant {
    pub id: i64,
    pub projectapp_id: i64,
    pub amount: i64,
    pub check_number: Option<i64>,
    pub check_mailed: Option<NaiveDate>,
    pub agreement_mailed: Option<NaiveDate>,
    pub agreement_returned: Option<NaiveDate>,
    pub approved: Option<NaiveDate>,
    pub created: DateTime<Utc>,
}

impl GivingProjectGrant {
    /// One year after the agreement went out; Feb 29 falls back to Feb 28.
    pub fn yearend_due(&self) -> Option<NaiveDate> {
        self.agreement_mailed.map(|d| {
            d.with_year(d.year() + 1)
                .or_else(|| NaiveDate::from_ymd_opt(d.year() + 1, 2, 28))
                .unwrap_or(d)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SponsoredProgramGrant {
    pub id: i64,
    pub organization_id: i64,
    pub amount: i64,
    pub check_number: Option<i64>,
    pub check_mailed: Option<NaiveDate>,
    pub approved: Option<NaiveDate>,
    pub entered: DateTime<Utc>,
    pub description: String,
}

/// Award joined with what its reminders and report pages need.
#[derive(Debug, Clone, Serialize)]
pub struct AwardContext {
    pub award: GivingProjectGrant,
    pub application_id: i64,
    pub organization_id: i64,
    pub organization: String,
    pub org_email: String,
    pub giving_project: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearEndReportData {
    pub email: String,
    pub phone: String,
    pub website: String,
    pub contact_person: String,
    pub summarize_last_year: String,
    pub goal_progress: String,
    pub quantitative_measures: String,
    pub evaluation: String,
    pub achieved: String,
    pub collaboration: String,
    pub new_funding: String,
    pub major_changes: String,
    pub total_size: i64,
    pub donations_count: i64,
    pub donations_count_prev: Option<i64>,
    pub photo1: String,
    pub photo2: String,
    pub photo_release: String,
    pub stay_informed: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearEndReport {
    pub id: i64,
    pub award_id: i64,
    pub submitted: DateTime<Utc>,
    pub visible: bool,
    pub data: YearEndReportData,
}

#[derive(Debug, Clone, Serialize)]
pub struct YerDraft {
    pub id: i64,
    pub award_id: i64,
    pub modified: DateTime<Utc>,
    pub contents: serde_json::Map<String, serde_json::Value>,
    pub photo1: String,
    pub photo2: String,
    pub photo_release: String,
}

impl YerDraft {
    pub fn file(&self, field: YerFileField) -> &str {
        match field {
            YerFileField::Photo1 => &self.photo1,
            YerFileField::Photo2 => &self.photo2,
            YerFileField::PhotoRelease => &self.photo_release,
        }
    }

    pub fn field(&self, key: &str) -> String {
        match self.contents.get(key) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationLog {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub organization_id: i64,
    pub application_id: Option<i64>,
    pub staff_id: i64,
    pub contacted: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingScores {
    pub program: Option<i64>,
    pub diversity: Option<i64>,
    pub soundness: Option<i64>,
    pub lack_of_access: Option<i64>,
    pub collaboration: Option<i64>,
    pub comments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationRating {
    pub id: i64,
    pub application_id: i64,
    pub membership_id: i64,
    pub scores: RatingScores,
    pub submitted: bool,
    pub submission_time: Option<DateTime<Utc>>,
}

/// Pending background task as read by the worker.
#[derive(Debug, Clone)]
pub struct OutboxTask {
    pub id: i64,
    pub kind: String,
    pub ref_id: i64,
    pub payload: String,
    pub attempt: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn award(mailed: Option<NaiveDate>) -> GivingProjectGrant {
        GivingProjectGrant {
            id: 1,
            projectapp_id: 1,
            amount: 5000,
            check_number: None,
            check_mailed: None,
            agreement_mailed: mailed,
            agreement_returned: None,
            approved: None,
            created: Utc::now(),
        }
    }

    #[test]
    fn yearend_due_is_one_year_after_agreement() {
        let d = NaiveDate::from_ymd_opt(2013, 3, 1).unwrap();
        assert_eq!(
            award(Some(d)).yearend_due(),
            NaiveDate::from_ymd_opt(2014, 3, 1)
        );
        let leap = NaiveDate::from_ymd_opt(2016, 2, 29).unwrap();
        assert_eq!(
            award(Some(leap)).yearend_due(),
            NaiveDate::from_ymd_opt(2017, 2, 28)
        );
        assert_eq!(award(None).yearend_due(), None);
    }

    #[test]
    fn application_text_lookup_by_column() {
        let mut text = ApplicationText::default();
        assert!(text.set("narrative3", "hello".into()));
        assert!(!text.set("organization", "x".into()));
        assert_eq!(text.get("narrative3"), Some("hello"));
        assert_eq!(ApplicationText::COLUMNS.len(), 47);
    }

    #[test]
    fn cycle_status_by_time() {
        let open = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        let close = Utc.with_ymd_and_hms(2013, 2, 1, 0, 0, 0).unwrap();
        let cycle = GrantCycle {
            id: 1,
            title: "Spring".into(),
            open,
            close,
            extra_question: String::new(),
            info_page: String::new(),
            email_signature: String::new(),
            conflicts: String::new(),
            private: false,
        };
        assert_eq!(cycle.status(open - Duration::days(1)), CycleStatus::Upcoming);
        assert_eq!(cycle.status(open), CycleStatus::Open);
        assert_eq!(cycle.status(close), CycleStatus::Closed);
    }

    #[test]
    fn donor_estimate_and_received() {
        let mut donor = Donor {
            id: 1,
            membership_id: 1,
            added: Utc::now(),
            firstname: "Ann".into(),
            lastname: String::new(),
            amount: Some(500),
            likelihood: Some(30),
            talked: false,
            asked: false,
            promised: None,
            received_this: 20,
            received_next: 5,
            received_afternext: 0,
            gift_notified: false,
            phone: String::new(),
            email: String::new(),
            notes: String::new(),
            next_step_id: None,
        };
        assert_eq!(donor.estimated(), 150);
        assert_eq!(donor.received(), 25);
        donor.likelihood = None;
        assert_eq!(donor.estimated(), 0);
        assert_eq!(donor.full_name(), "Ann");
    }
}
