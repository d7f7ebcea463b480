//! Structured header parsing for source documents
//!
//! Headers are optional `Label: value` lines at the top of a document. Parsing is pure
//! and keeps "field absent" apart from "field present but unparseable".

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Formats accepted for header dates, tried in order
const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%b %d %Y", "%B %d %Y"];

const HEADER_LABELS: [&str; 5] = ["title", "tags", "meetingdate", "validfrom", "validto"];

fn header_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r"^\s*([A-Za-z]+)\s*:\s*(.*)$").expect("valid regex"))
}

/// A calendar date that may be missing or unparseable
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateField {
    #[default]
    Missing,
    Unparseable(String),
    Date(NaiveDate),
}

impl DateField {
    /// Parse a raw header value; blank values count as missing
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => DateField::Missing,
            Some(value) => match parse_date(value) {
                Some(date) => DateField::Date(date),
                None => DateField::Unparseable(value.to_string()),
            },
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            DateField::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, DateField::Missing)
    }

    /// Storage form: ISO for parsed dates, the raw text for unparseable ones
    pub fn to_stored(&self) -> Option<String> {
        match self {
            DateField::Missing => None,
            DateField::Unparseable(raw) => Some(raw.clone()),
            DateField::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl From<Option<NaiveDate>> for DateField {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map(DateField::Date).unwrap_or_default()
    }
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_stored() {
            Some(s) => f.write_str(&s),
            None => Ok(()),
        }
    }
}

/// Parse a date in any of the accepted header formats
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim().replace(',', "");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&value, fmt).ok())
}

/// Normalise a date string to ISO `YYYY-MM-DD`
pub fn coerce_iso(value: &str) -> Option<String> {
    parse_date(value).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Optional header fields found at the top of a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentHeader {
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    pub meeting_date: DateField,
    pub valid_from: DateField,
    pub valid_to: DateField,
}

/// A document split into its header and body
#[derive(Debug, Clone)]
pub struct ParsedDocument<'a> {
    pub header: DocumentHeader,
    pub body: &'a str,
}

/// Parse the leading header block of `text`
///
/// The header ends at the first line that is neither blank nor a known `Label:` line.
/// A `Body:` label terminates the header; any text after it on the same line belongs
/// to the body.
pub fn parse_document(text: &str) -> ParsedDocument<'_> {
    let mut header = DocumentHeader::default();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += line.len();
            continue;
        }

        let Some(caps) = header_line().captures(trimmed) else {
            break;
        };
        let label = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();

        if label == "body" {
            let body_start = line.find(':').map(|i| i + 1).unwrap_or(line.len());
            offset += body_start;
            break;
        }
        if !HEADER_LABELS.contains(&label.as_str()) {
            break;
        }

        apply_field(&mut header, &label, value);
        offset += line.len();
    }

    ParsedDocument {
        header,
        body: text[offset..].trim(),
    }
}

/// Header fields only
pub fn parse_header(text: &str) -> DocumentHeader {
    parse_document(text).header
}

fn apply_field(header: &mut DocumentHeader, label: &str, value: &str) {
    match label {
        "title" => {
            if !value.is_empty() {
                header.title = Some(value.to_string());
            }
        }
        "tags" => header.tags = parse_tags(value),
        "meetingdate" => header.meeting_date = DateField::parse(Some(value)),
        "validfrom" => header.valid_from = DateField::parse(Some(value)),
        "validto" => header.valid_to = DateField::parse(Some(value)),
        _ => {}
    }
}

/// Split a delimited tag list into a normalised set
pub fn parse_tags(value: &str) -> BTreeSet<String> {
    value
        .split([',', ';', '|'])
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Join tags for tabular output
pub fn join_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Normalised topic key: lower-case words joined by single dashes
pub fn canonical_key(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !key.is_empty() {
                key.push('-');
            }
            pending_dash = false;
            key.push(ch);
        } else {
            pending_dash = true;
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_full_header() {
        let text = "Title: Quarterly Hiring Freeze\n\
                    Tags: Policy, finance , headcount\n\
                    MeetingDate:\n\
                    ValidFrom: 2025-10-01\n\
                    ValidTo: 2026/01/01\n\
                    \n\
                    Body:\n\
                    A temporary hiring freeze is in effect for Q4.\n";
        let doc = parse_document(text);

        assert_eq!(doc.header.title.as_deref(), Some("Quarterly Hiring Freeze"));
        assert_eq!(
            doc.header.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["finance", "headcount", "policy"]
        );
        assert_eq!(doc.header.meeting_date, DateField::Missing);
        assert_eq!(doc.header.valid_from, DateField::Date(date(2025, 10, 1)));
        assert_eq!(doc.header.valid_to, DateField::Date(date(2026, 1, 1)));
        assert_eq!(doc.body, "A temporary hiring freeze is in effect for Q4.");
    }

    #[test]
    fn test_labels_case_insensitive() {
        let header = parse_header("TITLE: Standup\nmeetingdate: 2025-09-02\n\nNotes here");
        assert_eq!(header.title.as_deref(), Some("Standup"));
        assert_eq!(header.meeting_date.date(), Some(date(2025, 9, 2)));
    }

    #[test]
    fn test_unparseable_distinct_from_missing() {
        let header = parse_header("Title: X\nValidFrom: next tuesday\n");
        assert_eq!(
            header.valid_from,
            DateField::Unparseable("next tuesday".to_string())
        );
        assert_eq!(header.valid_from.date(), None);
        assert!(!header.valid_from.is_missing());
        assert!(header.valid_to.is_missing());
    }

    #[test]
    fn test_no_header() {
        let doc = parse_document("Just some notes.\n\nTitle: not a header anymore");
        assert_eq!(doc.header, DocumentHeader::default());
        assert_eq!(doc.body, "Just some notes.\n\nTitle: not a header anymore");
    }

    #[test]
    fn test_inline_body_label() {
        let doc = parse_document("Title: Parking\nTags: reminder\nBody: Visitors park on level 2.\n");
        assert_eq!(doc.body, "Visitors park on level 2.");
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(parse_date("2025-09-02"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("2025/09/02"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("02-09-2025"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("02/09/2025"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("Sep 2 2025"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("September 2, 2025"), Some(date(2025, 9, 2)));
        assert_eq!(parse_date("2025-02-30"), None);
        assert_eq!(coerce_iso("2025/1/5").as_deref(), Some("2025-01-05"));
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("Quarterly Hiring Freeze"), "quarterly-hiring-freeze");
        assert_eq!(canonical_key("  Q4 -- Budget/Plan!  "), "q4-budget-plan");
        assert_eq!(canonical_key("2025-09-02_Meeting-Summary"), "2025-09-02-meeting-summary");
        assert_eq!(canonical_key("***"), "");
    }
}
