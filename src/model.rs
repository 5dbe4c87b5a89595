use serde::{Deserialize, Serialize};

/// Outcome of a step's ask, as posted by the completion form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StepResponse {
    Promised,
    #[default]
    Unsure,
    Declined,
}

impl StepResponse {
    pub fn as_code(&self) -> i64 {
        match self {
            StepResponse::Promised => 1,
            StepResponse::Unsure => 2,
            StepResponse::Declined => 3,
        }
    }

    pub fn parse_code(s: &str) -> Option<Self> {
        match s.trim() {
            "1" => Some(StepResponse::Promised),
            "2" | "" => Some(StepResponse::Unsure),
            "3" => Some(StepResponse::Declined),
            _ => None,
        }
    }
}

/// Result of resolving a logged-in account to its fund membership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MembershipStatus {
    NoMember,
    NoMembership,
    Unapproved,
    Approved,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::NoMember => "no_member",
            MembershipStatus::NoMembership => "no_membership",
            MembershipStatus::Unapproved => "unapproved",
            MembershipStatus::Approved => "approved",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Upcoming,
    Open,
    Closed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Upcoming => "upcoming",
            CycleStatus::Open => "open",
            CycleStatus::Closed => "closed",
        }
    }
}

/// Ordered staff-assigned stage of a submitted application.
///
/// Codes up to 50 are used for pre-screening on the application itself,
/// the rest for per-project screening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScreeningStatus {
    Received,
    Incomplete,
    Complete,
    PreScreenedOut,
    PreScreenedIn,
    ScreenedOut,
    SiteVisitAwarded,
    GrantDenied,
    GrantIssued,
    GrantPaid,
    YearEndReportOverdue,
    YearEndReportReceived,
    Closed,
}

impl ScreeningStatus {
    pub const ALL: [ScreeningStatus; 13] = [
        ScreeningStatus::Received,
        ScreeningStatus::Incomplete,
        ScreeningStatus::Complete,
        ScreeningStatus::PreScreenedOut,
        ScreeningStatus::PreScreenedIn,
        ScreeningStatus::ScreenedOut,
        ScreeningStatus::SiteVisitAwarded,
        ScreeningStatus::GrantDenied,
        ScreeningStatus::GrantIssued,
        ScreeningStatus::GrantPaid,
        ScreeningStatus::YearEndReportOverdue,
        ScreeningStatus::YearEndReportReceived,
        ScreeningStatus::Closed,
    ];

    pub fn code(&self) -> i64 {
        match self {
            ScreeningStatus::Received => 10,
            ScreeningStatus::Incomplete => 20,
            ScreeningStatus::Complete => 30,
            ScreeningStatus::PreScreenedOut => 40,
            ScreeningStatus::PreScreenedIn => 50,
            ScreeningStatus::ScreenedOut => 60,
            ScreeningStatus::SiteVisitAwarded => 70,
            ScreeningStatus::GrantDenied => 80,
            ScreeningStatus::GrantIssued => 90,
            ScreeningStatus::GrantPaid => 100,
            ScreeningStatus::YearEndReportOverdue => 110,
            ScreeningStatus::YearEndReportReceived => 120,
            ScreeningStatus::Closed => 130,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScreeningStatus::Received => "Received",
            ScreeningStatus::Incomplete => "Incomplete",
            ScreeningStatus::Complete => "Complete",
            ScreeningStatus::PreScreenedOut => "Pre-screened out",
            ScreeningStatus::PreScreenedIn => "Pre-screened in",
            ScreeningStatus::ScreenedOut => "Screened out",
            ScreeningStatus::SiteVisitAwarded => "Site visit awarded",
            ScreeningStatus::GrantDenied => "Grant denied",
            ScreeningStatus::GrantIssued => "Grant issued",
            ScreeningStatus::GrantPaid => "Grant paid",
            ScreeningStatus::YearEndReportOverdue => "Year-end report overdue",
            ScreeningStatus::YearEndReportReceived => "Year-end report received",
            ScreeningStatus::Closed => "Closed",
        }
    }

    pub fn is_pre_screening(&self) -> bool {
        self.code() <= 50
    }
}

/// File attachments carried by drafts and applications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FileField {
    Budget,
    Demographics,
    FundingSources,
    FiscalLetter,
    Budget1,
    Budget2,
    Budget3,
    ProjectBudgetFile,
}

impl FileField {
    pub const ALL: [FileField; 8] = [
        FileField::Budget,
        FileField::Demographics,
        FileField::FundingSources,
        FileField::FiscalLetter,
        FileField::Budget1,
        FileField::Budget2,
        FileField::Budget3,
        FileField::ProjectBudgetFile,
    ];

    /// Column name, also the form field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileField::Budget => "budget",
            FileField::Demographics => "demographics",
            FileField::FundingSources => "funding_sources",
            FileField::FiscalLetter => "fiscal_letter",
            FileField::Budget1 => "budget1",
            FileField::Budget2 => "budget2",
            FileField::Budget3 => "budget3",
            FileField::ProjectBudgetFile => "project_budget_file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileField::Budget => "Budget",
            FileField::Demographics => "Diversity chart",
            FileField::FundingSources => "Funding sources",
            FileField::FiscalLetter => "Fiscal sponsor letter",
            FileField::Budget1 => "Annual statement",
            FileField::Budget2 => "Annual operating budget",
            FileField::Budget3 => "Balance sheet",
            FileField::ProjectBudgetFile => "Project budget",
        }
    }
}

/// File attachments carried by year-end reports and their drafts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum YerFileField {
    Photo1,
    Photo2,
    PhotoRelease,
}

impl YerFileField {
    pub const ALL: [YerFileField; 3] = [
        YerFileField::Photo1,
        YerFileField::Photo2,
        YerFileField::PhotoRelease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            YerFileField::Photo1 => "photo1",
            YerFileField::Photo2 => "photo2",
            YerFileField::PhotoRelease => "photo_release",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SupportType {
    General,
    Project,
}

impl SupportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportType::General => "General support",
            SupportType::Project => "Project support",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "General support" => Some(SupportType::General),
            "Project support" => Some(SupportType::Project),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrgStatus {
    TribalGovernment,
    Nonprofit501c3,
    Nonprofit501c4,
    Sponsored,
}

impl OrgStatus {
    pub const ALL: [OrgStatus; 4] = [
        OrgStatus::TribalGovernment,
        OrgStatus::Nonprofit501c3,
        OrgStatus::Nonprofit501c4,
        OrgStatus::Sponsored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgStatus::TribalGovernment => "Tribal government",
            OrgStatus::Nonprofit501c3 => "501c3",
            OrgStatus::Nonprofit501c4 => "501c4",
            OrgStatus::Sponsored => "Sponsored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.as_str() == s)
    }
}

/// States served by the foundation.
pub const STATES: [&str; 5] = ["OR", "WA", "ID", "WY", "MT"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxKind {
    SendEmail,
    UpdateStory,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::SendEmail => "send_email",
            OutboxKind::UpdateStory => "update_story",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "send_email" => Some(OutboxKind::SendEmail),
            "update_story" => Some(OutboxKind::UpdateStory),
            _ => None,
        }
    }
}

/// Viewing rights on a submitted application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ViewPermission {
    Anonymous = 0,
    ProjectMember = 1,
    Staff = 2,
    Creator = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screening_codes_round_trip_and_order() {
        for s in ScreeningStatus::ALL {
            assert_eq!(ScreeningStatus::from_code(s.code()), Some(s));
        }
        assert!(ScreeningStatus::PreScreenedIn < ScreeningStatus::ScreenedOut);
        assert!(ScreeningStatus::PreScreenedIn.is_pre_screening());
        assert!(!ScreeningStatus::GrantIssued.is_pre_screening());
        assert_eq!(ScreeningStatus::from_code(55), None);
    }

    #[test]
    fn file_field_lookup_is_closed() {
        assert_eq!(FileField::parse("budget2"), Some(FileField::Budget2));
        assert_eq!(FileField::parse("project_budget_file"), Some(FileField::ProjectBudgetFile));
        assert_eq!(FileField::parse("passwords"), None);
        assert_eq!(YerFileField::parse("photo_release"), Some(YerFileField::PhotoRelease));
    }

    #[test]
    fn step_response_codes() {
        assert_eq!(StepResponse::parse_code("1"), Some(StepResponse::Promised));
        assert_eq!(StepResponse::parse_code(""), Some(StepResponse::Unsure));
        assert_eq!(StepResponse::parse_code("3"), Some(StepResponse::Declined));
        assert_eq!(StepResponse::parse_code("4"), None);
        assert_eq!(StepResponse::default().as_code(), 2);
    }
}
