//! Source documents: discovery, header parsing and reminder authoring

pub mod header;
pub mod reminder;

pub use header::{
    canonical_key, coerce_iso, join_tags, parse_date, parse_document, parse_header, parse_tags,
    DateField, DocumentHeader, ParsedDocument,
};
pub use reminder::{sanitize_filename, write_reminder, ReminderDraft};

use crate::config::Config;
use crate::error::Result;
use chrono::{DateTime, Local, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Category assigned to files in the reminders directory
pub const REMINDERS_CATEGORY: &str = "Reminders";

/// A plain-text knowledge file found on disk
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub category: String,
    /// File content, `None` when the file could not be read
    pub text: Option<String>,
    /// Local date of the last modification
    pub modified: Option<NaiveDate>,
}

impl SourceDocument {
    /// Read a document from disk; read failures are kept on the record
    pub fn read(path: &Path, category: impl Into<String>) -> Self {
        let text = match std::fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                None
            }
        };

        Self {
            path: path.to_path_buf(),
            category: category.into(),
            text,
            modified: modified_date(path),
        }
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Header fields, empty when the file is unreadable
    pub fn header(&self) -> DocumentHeader {
        self.text.as_deref().map(parse_header).unwrap_or_default()
    }

    /// Header title, falling back to the file stem
    pub fn title(&self) -> String {
        self.header().title.unwrap_or_else(|| self.stem())
    }
}

/// Every source document the configuration points at, reminders first
pub fn scan_sources(config: &Config) -> Result<Vec<SourceDocument>> {
    let mut documents = scan_reminders(&config.reminders_dir()?)?;
    documents.extend(scan_parsed(&config.parsed_dir()?)?);
    debug!("Discovered {} source documents", documents.len());
    Ok(documents)
}

/// Top-level `*.txt` files in the reminders directory
pub fn scan_reminders(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(readable)
    {
        if entry.file_type().is_file() && is_text_file(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    Ok(paths
        .iter()
        .map(|p| SourceDocument::read(p, REMINDERS_CATEGORY))
        .collect())
}

/// `*.txt` files below each sub-folder of the parsed-data directory
///
/// The category is the name of the immediate sub-folder; files directly in `dir` are
/// ignored.
pub fn scan_parsed(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut documents = Vec::new();
    for folder in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(readable)
    {
        if !folder.file_type().is_dir() {
            continue;
        }
        let category = folder.file_name().to_string_lossy().into_owned();

        for entry in WalkDir::new(folder.path())
            .sort_by_file_name()
            .into_iter()
            .filter_map(readable)
        {
            if entry.file_type().is_file() && is_text_file(entry.path()) {
                documents.push(SourceDocument::read(entry.path(), category.clone()));
            }
        }
    }

    Ok(documents)
}

/// `path` relative to `base` when it lies below it, with `/` separators
///
/// Registry rows and metadata records both identify documents this way.
pub fn relative_path(base: &Path, path: &Path) -> String {
    let Ok(rel) = path.strip_prefix(base) else {
        return path.to_string_lossy().into_owned();
    };
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

fn modified_date(path: &Path) -> Option<NaiveDate> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified).date_naive())
}

/// Entries that cannot be read are logged and skipped so one bad folder spares the rest
fn readable(entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    match entry {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Skipping unreadable source entry: {}", e);
            None
        }
    }
}
