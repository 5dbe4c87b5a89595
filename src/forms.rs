//! Shared form plumbing: posted field access, per-field error maps and the
//! small value parsers reused by fund and grants forms.
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Non-field errors are reported under this key.
pub const FORM_ERROR: &str = "__all__";
/// Upper bound on rows accepted from one formset post.
pub const MAX_FORMSET_ROWS: usize = 1000;
pub const REQUIRED: &str = "This field is required.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const INVALID_PHONE: &str = "Enter a 10-digit phone number.";
pub const INVALID_WHOLE_NUMBER: &str = "Enter a whole number. (Format: 11009 or 11,009)";
/// Ceiling for money and count fields.
pub const MAX_WHOLE_NUMBER: i64 = 2_147_483_647;
pub const WHOLE_NUMBER_TOO_LARGE: &str = "Ensure this value is less than or equal to 2147483647.";
pub const PHONE_OR_EMAIL: &str = "Enter a phone number or email.";
pub const UNSUPPORTED_FILE: &str = "That file type is not supported.";

pub const ALLOWED_FILE_TYPES: [&str; 17] = [
    "jpeg", "jpg", "png", "gif", "bmp", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "pdf",
    "mpeg4", "mov", "avi", "wmv", "txt",
];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(\.\d{2})?$").expect("valid money regex"));
static PHONE_STRIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[()\-\s\u{2010}.]").expect("valid phone regex"));

/// Field name to error messages, in stable field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, msg: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(msg.into());
    }

    /// Replaces whatever errors `field` already had.
    pub fn set(&mut self, field: impl Into<String>, msg: impl Into<String>) {
        self.0.insert(field.into(), vec![msg.into()]);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Prefix every key, used for formset rows (`form-0-firstname`).
    pub fn merge_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (k, v) in other.0 {
            self.0.entry(format!("{prefix}{k}")).or_default().extend(v);
        }
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}: {}", v.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Posted form fields with trimming accessors.
#[derive(Debug, Clone, Default)]
pub struct FormData(HashMap<String, String>);

impl FormData {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Trimmed value, empty when absent.
    pub fn text(&self, key: &str) -> String {
        self.0.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
    }

    pub fn raw(&self) -> &HashMap<String, String> {
        &self.0
    }

    /// Checkbox semantics: present and not an explicit false value.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) => !matches!(v.as_str(), "" | "0" | "false" | "off" | "no"),
            None => false,
        }
    }

    /// Number of rows in a `form-N-field` formset, per the management field
    /// or else by scanning keys. More than `max` rows is a form error.
    pub fn formset_rows(&self, max: usize) -> Result<usize, FieldErrors> {
        let rows = match self.text("form-TOTAL_FORMS").parse::<usize>() {
            Ok(n) => n,
            Err(_) => self
                .0
                .keys()
                .filter_map(|k| k.strip_prefix("form-"))
                .filter_map(|rest| rest.split_once('-'))
                .filter_map(|(idx, _)| idx.parse::<usize>().ok())
                .map(|i| i.saturating_add(1))
                .max()
                .unwrap_or(0),
        };
        if rows > max {
            let mut errors = FieldErrors::new();
            errors.add(FORM_ERROR, format!("Please submit at most {max} forms."));
            return Err(errors);
        }
        Ok(rows)
    }

    /// View of one formset row with the `form-N-` prefix removed.
    pub fn formset_row(&self, index: usize) -> FormData {
        let prefix = format!("form-{index}-");
        FormData(
            self.0
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|f| (f.to_string(), v.clone())))
                .collect(),
        )
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        )
    }
}

/// Accepts `mm/dd/yyyy`, `mm/dd/yy` and ISO `yyyy-mm-dd`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    // %Y also accepts two digits, so the short year goes first.
    ["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"]
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(v, fmt).ok())
        .find(|d| d.year() >= 1000)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

/// Strips punctuation and formats as `xxx-xxx-xxxx`. Empty input stays empty.
pub fn normalize_phone(value: &str) -> Result<String, &'static str> {
    let digits = PHONE_STRIP_RE.replace_all(value.trim(), "").to_string();
    if digits.is_empty() {
        return Ok(String::new());
    }
    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(INVALID_PHONE);
    }
    Ok(format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]))
}

/// Whole-dollar amount allowing thousands commas and trailing cents.
/// `Ok(None)` for blank input.
pub fn parse_whole_number(value: &str) -> Result<Option<i64>, &'static str> {
    let v = value.trim().replace(',', "");
    if v.is_empty() {
        return Ok(None);
    }
    let digits = MONEY_RE
        .captures(&v)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(INVALID_WHOLE_NUMBER)?;
    match digits.parse::<i64>() {
        Ok(n) if n <= MAX_WHOLE_NUMBER => Ok(Some(n)),
        _ => Err(WHOLE_NUMBER_TOO_LARGE),
    }
}

/// Plain signed integer, `Ok(None)` for blank input.
pub fn parse_int(value: &str) -> Result<Option<i64>, &'static str> {
    let v = value.trim();
    if v.is_empty() {
        return Ok(None);
    }
    v.parse::<i64>().map(Some).map_err(|_| "Enter a whole number.")
}

pub fn word_count(value: &str) -> usize {
    value.split_whitespace().count()
}

pub fn word_limit_message(limit: usize) -> String {
    format!("Please limit this response to {limit} words or less.")
}

/// Lowercased extension check against the allowed upload types.
pub fn allowed_file(name: &str) -> bool {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    name.contains('.') && ALLOWED_FILE_TYPES.contains(&ext.as_str())
}

/// `12345` -> `12,345`.
pub fn intcomma(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, ch) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        format!("-{out}")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("(206) 555-1234").unwrap(), "206-555-1234");
        assert_eq!(normalize_phone("206.555.1234").unwrap(), "206-555-1234");
        assert_eq!(normalize_phone("  ").unwrap(), "");
        assert_eq!(normalize_phone("555-1234"), Err(INVALID_PHONE));
        assert_eq!(normalize_phone("206-555-12ab"), Err(INVALID_PHONE));
    }

    #[test]
    fn whole_numbers_allow_commas_and_cents() {
        assert_eq!(parse_whole_number("11,009").unwrap(), Some(11009));
        assert_eq!(parse_whole_number("11009.50").unwrap(), Some(11009));
        assert_eq!(parse_whole_number("").unwrap(), None);
        assert_eq!(parse_whole_number("12.5"), Err(INVALID_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("-4"), Err(INVALID_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("ten"), Err(INVALID_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("2,147,483,647").unwrap(), Some(MAX_WHOLE_NUMBER));
        assert_eq!(parse_whole_number("2,147,483,648"), Err(WHOLE_NUMBER_TOO_LARGE));
        assert_eq!(
            parse_whole_number("9,000,000,000,000,000,000"),
            Err(WHOLE_NUMBER_TOO_LARGE)
        );
    }

    #[test]
    fn dates_in_supported_formats() {
        let d = NaiveDate::from_ymd_opt(2013, 4, 9).unwrap();
        assert_eq!(parse_date("04/09/2013"), Some(d));
        assert_eq!(parse_date("4/9/13"), Some(d));
        assert_eq!(parse_date("2013-04-09"), Some(d));
        assert_eq!(parse_date("13/40/2013"), None);
        assert_eq!(parse_date("4/9/130"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn file_types() {
        assert!(allowed_file("budget.PDF"));
        assert!(allowed_file("chart.final.xlsx"));
        assert!(!allowed_file("script.exe"));
        assert!(!allowed_file("pdf"));
    }

    #[test]
    fn words_and_commas() {
        assert_eq!(word_count("  one two\nthree\t four "), 4);
        assert_eq!(word_count(""), 0);
        assert_eq!(intcomma(1234567), "1,234,567");
        assert_eq!(intcomma(999), "999");
        assert_eq!(intcomma(-1500), "-1,500");
    }

    #[test]
    fn oversized_formsets_are_refused() {
        let data = FormData::from_pairs([("form-TOTAL_FORMS", "4000000000")]);
        let errors = data.formset_rows(MAX_FORMSET_ROWS).unwrap_err();
        assert_eq!(errors.get(FORM_ERROR).unwrap(), ["Please submit at most 1000 forms."]);
        let data = FormData::from_pairs([("form-TOTAL_FORMS", "1000")]);
        assert_eq!(data.formset_rows(MAX_FORMSET_ROWS).unwrap(), 1000);
    }

    #[test]
    fn formset_rows_are_split_by_prefix() {
        let data = FormData::from_pairs([
            ("form-0-firstname", "Ann"),
            ("form-1-firstname", "Bo"),
            ("form-1-lastname", " Lee "),
            ("other", "x"),
        ]);
        assert_eq!(data.formset_rows(MAX_FORMSET_ROWS).unwrap(), 2);
        assert!(data.formset_rows(1).is_err());
        let row = data.formset_row(1);
        assert_eq!(row.text("firstname"), "Bo");
        assert_eq!(row.text("lastname"), "Lee");
        assert_eq!(row.text("other"), "");
    }

    #[test]
    fn field_errors_merge_with_prefix() {
        let mut row = FieldErrors::new();
        row.add("amount", REQUIRED);
        let mut all = FieldErrors::new();
        all.merge_prefixed("form-2-", row);
        assert!(all.has("form-2-amount"));
        assert_eq!(all.len(), 1);
    }
}
