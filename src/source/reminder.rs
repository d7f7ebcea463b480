//! Writing new reminder files into the reminders directory

use super::header::coerce_iso;
use crate::error::{Result, VaultError};
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const STRUCTURED_MARKERS: [&str; 4] = ["Title:", "Tags:", "ValidFrom:", "Body:"];
const MAX_TITLE_CHARS: usize = 60;

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]+").expect("valid regex"))
}

/// A reminder to be written to disk
#[derive(Debug, Clone, Default)]
pub struct ReminderDraft {
    pub content: String,
    pub title: Option<String>,
    pub tags: Option<String>,
    pub meeting_date: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

impl ReminderDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title hint, else the first line of the content (60 chars max)
    pub fn resolved_title(&self) -> String {
        let title = match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => self
                .content
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .chars()
                .take(MAX_TITLE_CHARS)
                .collect::<String>()
                .trim()
                .to_string(),
        };
        if title.is_empty() {
            "Untitled".to_string()
        } else {
            title
        }
    }

    fn has_explicit_fields(&self) -> bool {
        self.tags.is_some()
            || self.meeting_date.is_some()
            || self.valid_from.is_some()
            || self.valid_to.is_some()
    }

    /// File content for this reminder as of `now`
    ///
    /// Content that already carries header labels is kept verbatim. Explicit fields
    /// produce a full header with dates coerced to ISO. Anything else is wrapped as a
    /// `reminder`-tagged note valid from today.
    pub fn render(&self, now: NaiveDateTime) -> String {
        let body = self.content.trim();

        if !self.has_explicit_fields() && is_structured(body) {
            return format!("{}\n", body);
        }

        let title = self.resolved_title();
        let today = now.format("%Y-%m-%d").to_string();

        if self.has_explicit_fields() {
            let iso = |v: &Option<String>| v.as_deref().and_then(coerce_iso).unwrap_or_default();
            let valid_from = match &self.valid_from {
                Some(_) => iso(&self.valid_from),
                None => today,
            };
            return format!(
                "Title: {}\nTags: {}\nMeetingDate: {}\nValidFrom: {}\nValidTo: {}\n\nBody:\n{}\n",
                title,
                self.tags.as_deref().unwrap_or("reminder").trim(),
                iso(&self.meeting_date),
                valid_from,
                iso(&self.valid_to),
                body
            );
        }

        format!(
            "Title: {}\nTags: reminder\nValidFrom: {}\nBody: {}\n",
            title, today, body
        )
    }
}

/// Whether any line starts with a header label
fn is_structured(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim_start().to_ascii_lowercase();
        STRUCTURED_MARKERS
            .iter()
            .any(|m| line.starts_with(&m.to_ascii_lowercase()))
    })
}

/// Replace runs of characters outside `[A-Za-z0-9_-]` with a single underscore
pub fn sanitize_filename(title: &str) -> String {
    let safe = unsafe_chars().replace_all(title.trim(), "_");
    let safe: String = safe.chars().take(MAX_TITLE_CHARS).collect();
    if safe.is_empty() {
        "Untitled".to_string()
    } else {
        safe
    }
}

/// Write `draft` into `dir` as `YYYY-MM-DD_HHMM_<title>.txt`
///
/// Never overwrites: a numeric suffix is added when the name is taken.
pub fn write_reminder(dir: &Path, draft: &ReminderDraft, now: NaiveDateTime) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| VaultError::Io {
        source: e,
        context: format!("Failed to create reminders directory: {:?}", dir),
    })?;

    let stem = format!(
        "{}_{}",
        now.format("%Y-%m-%d_%H%M"),
        sanitize_filename(&draft.resolved_title())
    );
    let payload = draft.render(now);

    let mut attempt = 1;
    loop {
        let name = if attempt == 1 {
            format!("{}.txt", stem)
        } else {
            format!("{}_{}.txt", stem, attempt)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(payload.as_bytes())
                    .map_err(|e| VaultError::Io {
                        source: e,
                        context: format!("Failed to write reminder: {:?}", path),
                    })?;
                info!("Saved reminder to {:?}", path);
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(VaultError::Io {
                    source: e,
                    context: format!("Failed to create reminder: {:?}", path),
                })
            }
        }
    }
}
