//! Knowledge curation: one authoritative record per topic
//!
//! The curator reads every source record independently of the index, groups them by
//! canonical topic key, and decides which version of each topic is active. The result
//! is written to the registry CSV that the indexing pipeline and operators read.

use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::source::{
    self, canonical_key, join_tags, parse_document, parse_tags, SourceDocument,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Tag that exempts an item from supersession
pub const PINNED_TAG: &str = "pinned";

/// Category reported for reminders mined from the conversation history
pub const HISTORY_SOURCE: &str = "History";

/// A source record as seen by the curator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurationItem {
    pub canonical_key: String,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub source: String,
    /// Meeting date, else valid-from, else modification date
    pub version_ts: Option<NaiveDate>,
    pub path: String,
}

impl CurationItem {
    pub fn is_pinned(&self) -> bool {
        self.tags.contains(PINNED_TAG)
    }

    /// Build an item from a document on disk
    pub fn from_document(document: &SourceDocument, base_dir: &Path) -> Self {
        let header = document.header();
        let title = header.title.clone().unwrap_or_else(|| document.stem());
        let path = source::relative_path(base_dir, &document.path);

        Self {
            canonical_key: topic_key(&title, &path),
            tags: header.tags.clone(),
            valid_from: header.valid_from.date(),
            valid_to: header.valid_to.date(),
            source: document.category.clone(),
            version_ts: header
                .meeting_date
                .date()
                .or_else(|| header.valid_from.date())
                .or(document.modified),
            path,
            title,
        }
    }
}

/// Canonical key of `title`, or of `fallback` when the title has no usable characters
pub fn topic_key(title: &str, fallback: &str) -> String {
    let key = canonical_key(title);
    if key.is_empty() {
        canonical_key(fallback)
    } else {
        key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Archived,
}

impl std::str::FromStr for Status {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "archived" => Ok(Status::Archived),
            other => Err(VaultError::Registry(format!("unknown status '{}'", other))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            Status::Archived => f.write_str("archived"),
        }
    }
}

/// One decided row of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub canonical_key: String,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub source: String,
    pub version_ts: Option<NaiveDate>,
    pub path: String,
    pub status: Status,
    /// Titles of the items this entry replaced
    pub supersedes: Vec<String>,
    pub superseded_by: Option<String>,
}

impl RegistryEntry {
    fn undecided(item: CurationItem) -> Self {
        Self {
            canonical_key: item.canonical_key,
            title: item.title,
            tags: item.tags,
            valid_from: item.valid_from,
            valid_to: item.valid_to,
            source: item.source,
            version_ts: item.version_ts,
            path: item.path,
            status: Status::Active,
            supersedes: Vec::new(),
            superseded_by: None,
        }
    }
}

impl From<&RegistryEntry> for CurationItem {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            canonical_key: entry.canonical_key.clone(),
            title: entry.title.clone(),
            tags: entry.tags.clone(),
            valid_from: entry.valid_from,
            valid_to: entry.valid_to,
            source: entry.source.clone(),
            version_ts: entry.version_ts,
            path: entry.path.clone(),
        }
    }
}

/// Gather reminders, parsed documents and history reminders
pub fn collect(config: &Config) -> Result<Vec<CurationItem>> {
    let base_dir = config.data_dir()?;
    let documents = source::scan_sources(config)?;
    let mut items: Vec<CurationItem> = documents
        .iter()
        .filter(|d| d.text.is_some())
        .map(|d| CurationItem::from_document(d, &base_dir))
        .collect();

    if let Some(history) = config.history_file()? {
        items.extend(collect_history(&history)?);
    }

    debug!("Collected {} curation items", items.len());
    Ok(items)
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// User messages starting with `REMINDER:` in a JSON chat history
///
/// A missing file yields nothing; an unparseable one is logged and skipped.
pub fn collect_history(path: &Path) -> Result<Vec<CurationItem>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|e| VaultError::Io {
        source: e,
        context: format!("Failed to read history file: {:?}", path),
    })?;
    let messages: Vec<HistoryMessage> = match serde_json::from_str(&content) {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Ignoring unreadable history file {:?}: {}", path, e);
            return Ok(Vec::new());
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role.eq_ignore_ascii_case("user"))
        .filter_map(|(idx, m)| {
            let body = strip_reminder_prefix(&m.content)?;
            Some(history_item(body, m.timestamp.as_deref(), format!("{}#{}", name, idx)))
        })
        .collect())
}

fn strip_reminder_prefix(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    let prefix = trimmed.get(..9)?;
    if !prefix.eq_ignore_ascii_case("reminder:") {
        return None;
    }
    let body = trimmed[9..].trim();
    (!body.is_empty()).then_some(body)
}

fn history_item(body: &str, timestamp: Option<&str>, path: String) -> CurationItem {
    let doc = parse_document(body);
    let title = doc.header.title.clone().unwrap_or_else(|| {
        body.lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(60)
            .collect::<String>()
            .trim()
            .to_string()
    });
    let sent = timestamp
        .and_then(|t| t.get(..10))
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    let tags = if doc.header.tags.is_empty() {
        parse_tags("reminder")
    } else {
        doc.header.tags.clone()
    };

    CurationItem {
        canonical_key: topic_key(&title, &path),
        tags,
        valid_from: doc.header.valid_from.date(),
        valid_to: doc.header.valid_to.date(),
        source: HISTORY_SOURCE.to_string(),
        version_ts: doc
            .header
            .meeting_date
            .date()
            .or_else(|| doc.header.valid_from.date())
            .or(sent),
        path,
        title,
    }
}

/// Newest first; ties broken by path, then title
fn version_order(a: &CurationItem, b: &CurationItem) -> std::cmp::Ordering {
    b.version_ts
        .cmp(&a.version_ts)
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.title.cmp(&b.title))
}

/// Decide active and archived items per topic key
///
/// Within a group the newest item is active and every older one is archived with
/// `superseded_by` set to the newest title, unless tagged `pinned`. An archived item
/// without a `valid_to` gets the day before the newest item's `valid_from` (or, when
/// that is unknown, the day before its version date). Output is ordered by key and
/// then by version, newest first.
pub fn decide(items: Vec<CurationItem>) -> Vec<RegistryEntry> {
    let mut groups: BTreeMap<String, Vec<CurationItem>> = BTreeMap::new();
    for item in items {
        groups.entry(item.canonical_key.clone()).or_default().push(item);
    }

    let mut entries = Vec::new();
    for (_, mut group) in groups {
        group.sort_by(version_order);
        let mut group = group.into_iter().map(RegistryEntry::undecided);
        let Some(mut newest) = group.next() else {
            continue;
        };

        let cutoff = newest
            .valid_from
            .or(newest.version_ts)
            .and_then(|d| d.checked_sub_signed(Duration::days(1)));

        let mut older = Vec::new();
        for mut entry in group {
            if !entry.tags.contains(PINNED_TAG) {
                entry.status = Status::Archived;
                entry.superseded_by = Some(newest.title.clone());
                if entry.valid_to.is_none() {
                    entry.valid_to = cutoff;
                }
                newest.supersedes.push(entry.title.clone());
            }
            older.push(entry);
        }

        entries.push(newest);
        entries.extend(older);
    }

    entries
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryRow {
    canonical_key: String,
    title: String,
    tags: String,
    valid_from: String,
    valid_to: String,
    source: String,
    version_ts: String,
    path: String,
    status: Status,
    supersedes: String,
    superseded_by: String,
}

fn iso(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn from_iso(value: &str, column: &str) -> Result<Option<NaiveDate>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(|_| VaultError::Registry(format!("invalid {} '{}'", column, value)))
}

/// Superseded titles are stored as a JSON array so any title survives the CSV cell
fn encode_titles(titles: &[String]) -> Result<String> {
    if titles.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(titles).map_err(|e| VaultError::Json {
        source: e,
        context: "Failed to encode superseded titles".to_string(),
    })
}

fn decode_titles(value: &str) -> Result<Vec<String>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(value).map_err(|e| VaultError::Json {
        source: e,
        context: format!("Invalid supersedes cell '{}'", value),
    })
}

/// Write the registry CSV, replacing any previous file
pub fn write_registry(path: &Path, entries: &[RegistryEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to create registry directory: {:?}", parent),
        })?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(RegistryRow {
            canonical_key: entry.canonical_key.clone(),
            title: entry.title.clone(),
            tags: join_tags(&entry.tags),
            valid_from: iso(entry.valid_from),
            valid_to: iso(entry.valid_to),
            source: entry.source.clone(),
            version_ts: iso(entry.version_ts),
            path: entry.path.clone(),
            status: entry.status,
            supersedes: encode_titles(&entry.supersedes)?,
            superseded_by: entry.superseded_by.clone().unwrap_or_default(),
        })?;
    }
    writer.flush().map_err(|e| VaultError::Io {
        source: e,
        context: format!("Failed to write registry: {:?}", path),
    })?;

    info!("Wrote {} registry rows to {:?}", entries.len(), path);
    Ok(())
}

/// Read a registry written by [`write_registry`]
pub fn read_registry(path: &Path) -> Result<Vec<RegistryEntry>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();

    for row in reader.deserialize() {
        let row: RegistryRow = row?;
        entries.push(RegistryEntry {
            valid_from: from_iso(&row.valid_from, "valid_from")?,
            valid_to: from_iso(&row.valid_to, "valid_to")?,
            version_ts: from_iso(&row.version_ts, "version_ts")?,
            canonical_key: row.canonical_key,
            title: row.title,
            tags: parse_tags(&row.tags),
            source: row.source,
            path: row.path,
            status: row.status,
            supersedes: decode_titles(&row.supersedes)?,
            superseded_by: Some(row.superseded_by).filter(|s| !s.is_empty()),
        });
    }

    Ok(entries)
}

/// Collect, decide and write in one pass
pub fn run(config: &Config) -> Result<Vec<RegistryEntry>> {
    let entries = decide(collect(config)?);
    write_registry(&config.registry_path()?, &entries)?;
    Ok(entries)
}
