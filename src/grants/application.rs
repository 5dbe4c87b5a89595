//! Typed validation of a draft's free-form contents into a submittable
//! application, and the reverse mapping used when an application goes back
//! to being a draft.
use crate::db::model::{
    ApplicationData, ApplicationText, FileRefs, GrantApplication, GrantCycle, TIMELINE_CELLS,
};
use crate::forms::{self, FieldErrors};
use crate::model::{FileField, OrgStatus, SupportType, STATES};
use serde_json::{Map, Value};

pub const PROJECT_REQUIRED: &str = "This field is required when applying for project support.";
pub const TIMELINE_INCOMPLETE: &str =
    "All three columns are required for each quarter that you include in your timeline.";
pub const BUDGET_REQUIRED: &str =
    "Budget documents are required. You may upload them as one file or as multiple files.";
pub const BUDGET_MIXED: &str =
    "Budget documents should be uploaded all in one file OR in the individual fields below.";
pub const REF_CONTACT: &str = "Enter a contact person.";
pub const REF_ORG: &str = "Enter the organization name.";

/// Word limits for the long answers.
pub const WORD_LIMITS: [(&str, usize); 9] = [
    ("mission", 150),
    ("grant_request", 100),
    ("narrative1", 300),
    ("narrative2", 150),
    ("narrative3", 450),
    ("narrative4", 300),
    ("narrative5", 300),
    ("narrative6", 450),
    ("cycle_question", 300),
];

const OPTIONAL: [&str; 23] = [
    "fax_number",
    "website",
    "previous_grants",
    "grant_period",
    "project_title",
    "fiscal_org",
    "fiscal_person",
    "fiscal_telephone",
    "fiscal_email",
    "fiscal_address",
    "cycle_question",
    "collab_ref1_phone",
    "collab_ref1_email",
    "collab_ref2_phone",
    "collab_ref2_email",
    "racial_justice_ref1_name",
    "racial_justice_ref1_org",
    "racial_justice_ref1_phone",
    "racial_justice_ref1_email",
    "racial_justice_ref2_name",
    "racial_justice_ref2_org",
    "racial_justice_ref2_phone",
    "racial_justice_ref2_email",
];

const PHONE_FIELDS: [&str; 7] = [
    "telephone_number",
    "fax_number",
    "fiscal_telephone",
    "collab_ref1_phone",
    "collab_ref2_phone",
    "racial_justice_ref1_phone",
    "racial_justice_ref2_phone",
];

const EMAIL_FIELDS: [&str; 5] = [
    "email_address",
    "collab_ref1_email",
    "collab_ref2_email",
    "racial_justice_ref1_email",
    "racial_justice_ref2_email",
];

const FISCAL_FIELDS: [&str; 5] = [
    "fiscal_org",
    "fiscal_person",
    "fiscal_telephone",
    "fiscal_email",
    "fiscal_address",
];

/// Trimmed string form of a contents value; numbers are rendered.
pub fn content_text(contents: &Map<String, Value>, key: &str) -> String {
    match contents.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub fn timeline_key(i: usize) -> String {
    format!("timeline_{i}")
}

pub fn timeline_from_contents(contents: &Map<String, Value>) -> Vec<String> {
    (0..TIMELINE_CELLS)
        .map(|i| content_text(contents, &timeline_key(i)))
        .collect()
}

fn is_optional(column: &str, cycle: &GrantCycle) -> bool {
    if column == "cycle_question" {
        return cycle.extra_question.trim().is_empty();
    }
    OPTIONAL.contains(&column)
}

fn invalid_choice(value: &str) -> String {
    format!("Select a valid choice. {value} is not one of the available choices.")
}

/// Checks the quarters of the timeline; `None` when it is acceptable.
pub fn timeline_error(cells: &[String]) -> Option<&'static str> {
    let mut empty = false;
    let mut incomplete = false;
    for (q, quarter) in cells.chunks(3).enumerate() {
        let filled = quarter.iter().filter(|c| !c.is_empty()).count();
        if q == 0 && filled == 0 {
            empty = true;
        }
        if filled > 0 && filled < quarter.len() {
            incomplete = true;
        }
    }
    if incomplete {
        Some(TIMELINE_INCOMPLETE)
    } else if empty {
        Some(forms::REQUIRED)
    } else {
        None
    }
}

/// Validates draft contents plus file references against the cycle.
pub fn validate(
    contents: &Map<String, Value>,
    files: &FileRefs,
    cycle: &GrantCycle,
) -> Result<ApplicationData, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut text = ApplicationText::default();

    for column in ApplicationText::COLUMNS {
        let value = content_text(contents, column);
        if value.is_empty() && !is_optional(column, cycle) {
            errors.add(*column, forms::REQUIRED);
        }
        text.set(column, value);
    }

    if !text.state.is_empty() && !STATES.contains(&text.state.as_str()) {
        errors.add("state", invalid_choice(&text.state));
    }
    if !text.status.is_empty() && OrgStatus::parse(&text.status).is_none() {
        errors.add("status", invalid_choice(&text.status));
    }
    let support = SupportType::parse(&text.support_type);
    if !text.support_type.is_empty() && support.is_none() {
        errors.add("support_type", invalid_choice(&text.support_type));
    }

    for (field, limit) in WORD_LIMITS {
        if forms::word_count(text.get(field).unwrap_or_default()) > limit {
            errors.add(field, forms::word_limit_message(limit));
        }
    }

    // cleaned phones and emails; invalid ones count as missing below
    let mut phone_ok = std::collections::HashMap::new();
    for field in PHONE_FIELDS {
        let raw = text.get(field).unwrap_or_default().to_string();
        match forms::normalize_phone(&raw) {
            Ok(phone) => {
                phone_ok.insert(field, !phone.is_empty());
                text.set(field, phone);
            }
            Err(msg) => {
                phone_ok.insert(field, false);
                errors.add(field, msg);
            }
        }
    }
    let mut email_ok = std::collections::HashMap::new();
    for field in EMAIL_FIELDS {
        let value = text.get(field).unwrap_or_default();
        let valid = forms::is_valid_email(value);
        if !value.is_empty() && !valid {
            errors.add(field, forms::INVALID_EMAIL);
        }
        email_ok.insert(field, valid);
    }
    let has_phone = |f: &str| phone_ok.get(f).copied().unwrap_or(false);
    let has_email = |f: &str| email_ok.get(f).copied().unwrap_or(false);

    let money = |field: &str, required: bool, errors: &mut FieldErrors| -> Option<i64> {
        match forms::parse_whole_number(&content_text(contents, field)) {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                if required {
                    errors.add(field, forms::REQUIRED);
                }
                None
            }
            Err(msg) => {
                errors.add(field, msg);
                None
            }
        }
    };
    let founded = money("founded", true, &mut errors);
    let budget_last = money("budget_last", true, &mut errors);
    let budget_current = money("budget_current", true, &mut errors);
    let amount_requested = money("amount_requested", true, &mut errors);
    let project_budget = money("project_budget", false, &mut errors);

    let timeline = timeline_from_contents(contents);
    if let Some(msg) = timeline_error(&timeline) {
        errors.set("timeline", msg);
    }

    for n in 1..=2 {
        if !has_phone(&format!("collab_ref{n}_phone")) && !has_email(&format!("collab_ref{n}_email")) {
            errors.set(format!("collab_ref{n}_phone"), forms::PHONE_OR_EMAIL);
        }
    }

    for n in 1..=2 {
        let name = text.get(&format!("racial_justice_ref{n}_name")).unwrap_or_default();
        let org = text.get(&format!("racial_justice_ref{n}_org")).unwrap_or_default();
        let phone = has_phone(&format!("racial_justice_ref{n}_phone"));
        let email = has_email(&format!("racial_justice_ref{n}_email"));
        if !name.is_empty() || !org.is_empty() || phone || email {
            if name.is_empty() {
                errors.set(format!("racial_justice_ref{n}_name"), REF_CONTACT);
            }
            if org.is_empty() {
                errors.set(format!("racial_justice_ref{n}_org"), REF_ORG);
            }
            if !phone && !email {
                errors.set(format!("racial_justice_ref{n}_phone"), forms::PHONE_OR_EMAIL);
            }
        }
    }

    let project_support = support == Some(SupportType::Project);
    if project_support {
        if project_budget.is_none() {
            errors.set("project_budget", PROJECT_REQUIRED);
        }
        if text.project_title.is_empty() {
            errors.set("project_title", PROJECT_REQUIRED);
        }
    }

    let budget = files.has(FileField::Budget);
    let (b1, b2, b3) = (
        files.has(FileField::Budget1),
        files.has(FileField::Budget2),
        files.has(FileField::Budget3),
    );
    if !budget {
        if !(b1 || b2) {
            errors.set("budget", BUDGET_REQUIRED);
        } else {
            if !b1 {
                errors.set("budget1", forms::REQUIRED);
            }
            if !b2 {
                errors.set("budget2", forms::REQUIRED);
            }
        }
        if project_support && !files.has(FileField::ProjectBudgetFile) {
            errors.set("project_budget_file", PROJECT_REQUIRED);
        }
    } else if b1 || b2 || b3 {
        errors.set("budget", BUDGET_MIXED);
    }

    let fiscal_present: Vec<bool> = FISCAL_FIELDS
        .iter()
        .map(|f| match *f {
            "fiscal_telephone" => has_phone(f),
            _ => !text.get(f).unwrap_or_default().is_empty(),
        })
        .collect();
    if fiscal_present.iter().any(|p| *p) {
        for (field, present) in FISCAL_FIELDS.iter().zip(&fiscal_present) {
            if !present {
                errors.set(*field, forms::REQUIRED);
            }
        }
        if !files.has(FileField::FiscalLetter) {
            errors.set("fiscal_letter", forms::REQUIRED);
        }
    }

    for field in [FileField::Demographics, FileField::FundingSources] {
        if !files.has(field) {
            errors.add(field.as_str(), forms::REQUIRED);
        }
    }

    errors.into_result()?;
    Ok(ApplicationData {
        text,
        founded: founded.unwrap_or_default(),
        budget_last: budget_last.unwrap_or_default(),
        budget_current: budget_current.unwrap_or_default(),
        amount_requested: amount_requested.unwrap_or_default(),
        project_budget,
        timeline,
        files: files.clone(),
    })
}

/// Draft contents reproducing a submitted application's answers. File
/// references travel separately.
pub fn draft_contents(app: &GrantApplication) -> Map<String, Value> {
    let data = &app.data;
    let mut contents = Map::new();
    for column in ApplicationText::COLUMNS {
        contents.insert(
            column.to_string(),
            Value::String(data.text.get(column).unwrap_or_default().to_string()),
        );
    }
    for column in ApplicationData::MONEY_COLUMNS {
        if let Some(v) = data.money(column) {
            contents.insert(column.to_string(), Value::from(v));
        }
    }
    contents.insert(
        "project_budget".into(),
        data.project_budget.map(Value::from).unwrap_or(Value::String(String::new())),
    );
    for (i, cell) in data.timeline.iter().enumerate().take(TIMELINE_CELLS) {
        contents.insert(timeline_key(i), Value::String(cell.clone()));
    }
    contents
}
