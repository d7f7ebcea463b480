//! Typed per-chunk metadata and its SQLite persistence
//!
//! The store lives in memory as an ordered map and is written out as one SQLite file
//! next to the vector file.

use crate::curator::Status;
use crate::error::{Result, VaultError};
use crate::source::DateField;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Everything known about one indexed chunk, paired with a vector by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: i64,
    pub filename: String,
    pub path: String,
    pub category: String,
    pub chunk_index: usize,
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    pub meeting_date: DateField,
    pub valid_from: DateField,
    pub valid_to: DateField,
    pub canonical_key: String,
    pub version_ts: Option<NaiveDate>,
    /// Registry status of the source document
    #[serde(default)]
    pub status: Status,
    pub text_preview: String,
}

impl MetadataRecord {
    /// Grouping key for deduplication: canonical key, else title, else filename
    ///
    /// Each kind is prefixed so a title never collides with another record's key.
    pub fn topic_key(&self) -> String {
        if !self.canonical_key.is_empty() {
            return format!("key:{}", self.canonical_key);
        }
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => format!("title:{}", title),
            _ => format!("file:{}", self.filename),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == Status::Archived
    }

    /// Most specific known date: meeting date, then valid-from, then version
    pub fn best_date(&self) -> Option<NaiveDate> {
        self.meeting_date
            .date()
            .or_else(|| self.valid_from.date())
            .or(self.version_ts)
    }

    /// Whether the validity interval provably excludes `day`
    ///
    /// Unknown bounds never exclude.
    pub fn is_expired_on(&self, day: NaiveDate) -> bool {
        let ended = self.valid_to.date().map(|to| to < day).unwrap_or(false);
        let not_started = self.valid_from.date().map(|from| from > day).unwrap_or(false);
        ended || not_started
    }
}

/// Ordered id → record map
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: BTreeMap<i64, MetadataRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: MetadataRecord) -> Option<MetadataRecord> {
        self.records.insert(record.id, record)
    }

    pub fn get(&self, id: i64) -> Option<&MetadataRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.records.keys().copied()
    }

    pub fn records(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.records.values()
    }
}

/// Index-wide values stored alongside the records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexState {
    pub next_id: i64,
    pub dimension: usize,
    pub model: String,
}

/// Metadata store migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE records (
        id INTEGER PRIMARY KEY,
        filename TEXT NOT NULL,
        path TEXT NOT NULL,
        category TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        title TEXT,
        tags TEXT NOT NULL,
        meeting_date TEXT,
        valid_from TEXT,
        valid_to TEXT,
        canonical_key TEXT NOT NULL,
        version_ts TEXT,
        text_preview TEXT NOT NULL
    );

    CREATE INDEX idx_records_category ON records(category);
    CREATE INDEX idx_records_canonical_key ON records(canonical_key);

    CREATE TABLE index_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
    r#"
    ALTER TABLE records ADD COLUMN status TEXT NOT NULL DEFAULT 'active';
    "#,
];

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, migration) in MIGRATIONS.iter().enumerate() {
        let version = version as i32 + 1;
        if version > current_version {
            tracing::debug!("Applying metadata migration {}", version);
            conn.execute_batch(migration)?;
            conn.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                params![version],
            )?;
        }
    }

    Ok(())
}

/// Write `store` and `state` to a fresh SQLite file at `path`
pub fn save(path: &Path, store: &MetadataStore, state: &IndexState) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to replace metadata store: {:?}", path),
        })?;
    }

    let mut conn = Connection::open(path)?;
    migrate(&conn)?;

    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO records (id, filename, path, category, chunk_index, title, tags,
                meeting_date, valid_from, valid_to, canonical_key, version_ts, text_preview, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        for r in store.records() {
            let tags = serde_json::to_string(&r.tags).map_err(|e| VaultError::Json {
                source: e,
                context: format!("Failed to encode tags for record {}", r.id),
            })?;
            insert.execute(params![
                r.id,
                r.filename,
                r.path,
                r.category,
                r.chunk_index as i64,
                r.title,
                tags,
                r.meeting_date.to_stored(),
                r.valid_from.to_stored(),
                r.valid_to.to_stored(),
                r.canonical_key,
                r.version_ts.map(|d| d.format("%Y-%m-%d").to_string()),
                r.text_preview,
                r.status.to_string(),
            ])?;
        }

        let mut put = tx.prepare("INSERT INTO index_state (key, value) VALUES (?1, ?2)")?;
        put.execute(params!["next_id", state.next_id.to_string()])?;
        put.execute(params!["dimension", state.dimension.to_string()])?;
        put.execute(params!["model", state.model])?;
    }
    tx.commit()?;

    Ok(())
}

/// Read a store written by [`save`]
pub fn load(path: &Path) -> Result<(MetadataStore, IndexState)> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let state = IndexState {
        next_id: parse_state(&conn, "next_id")?,
        dimension: parse_state(&conn, "dimension")?,
        model: read_state(&conn, "model")?,
    };

    let mut stmt = conn.prepare(
        "SELECT id, filename, path, category, chunk_index, title, tags, meeting_date,
                valid_from, valid_to, canonical_key, version_ts, text_preview, status
         FROM records ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, String>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, String>(12)?,
            row.get::<_, String>(13)?,
        ))
    })?;

    let mut store = MetadataStore::new();
    for row in rows {
        let (id, filename, path, category, chunk_index, title, tags, meeting, from, to, key, version, preview, status) =
            row?;
        let tags: BTreeSet<String> = serde_json::from_str(&tags).map_err(|e| VaultError::Json {
            source: e,
            context: format!("Failed to decode tags for record {}", id),
        })?;

        store.insert(MetadataRecord {
            id,
            filename,
            path,
            category,
            chunk_index: chunk_index.max(0) as usize,
            title,
            tags,
            meeting_date: DateField::parse(meeting.as_deref()),
            valid_from: DateField::parse(from.as_deref()),
            valid_to: DateField::parse(to.as_deref()),
            canonical_key: key,
            version_ts: version
                .as_deref()
                .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok()),
            status: status.parse()?,
            text_preview: preview,
        });
    }

    Ok((store, state))
}

fn read_state(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM index_state WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| VaultError::IndexNotBuilt {
        reason: format!("metadata store has no '{}' entry", key),
    })
}

fn parse_state<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T> {
    let raw = read_state(conn, key)?;
    raw.parse().map_err(|_| VaultError::IndexNotBuilt {
        reason: format!("metadata store has an invalid '{}' entry: {}", key, raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: i64) -> MetadataRecord {
        MetadataRecord {
            id,
            filename: "freeze.txt".to_string(),
            path: "reminders/freeze.txt".to_string(),
            category: "Reminders".to_string(),
            chunk_index: 0,
            title: Some("Hiring Freeze".to_string()),
            tags: ["policy".to_string(), "finance".to_string()].into_iter().collect(),
            meeting_date: DateField::Missing,
            valid_from: DateField::Date(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()),
            valid_to: DateField::Unparseable("end of quarter".to_string()),
            canonical_key: "hiring-freeze".to_string(),
            version_ts: NaiveDate::from_ymd_opt(2025, 10, 1),
            status: Status::Active,
            text_preview: "A temporary hiring freeze".to_string(),
        }
    }

    #[test]
    fn test_save_and_load_preserves_date_states() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.sqlite");

        let mut store = MetadataStore::new();
        store.insert(record(1_000_000));
        let mut untitled = record(1_000_001);
        untitled.title = None;
        untitled.valid_to = DateField::Missing;
        untitled.status = Status::Archived;
        store.insert(untitled);

        let state = IndexState {
            next_id: 1_000_002,
            dimension: 1536,
            model: "text-embedding-3-small".to_string(),
        };
        save(&path, &store, &state).unwrap();

        let (loaded, loaded_state) = load(&path).unwrap();
        assert_eq!(loaded_state, state);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(1_000_000), store.get(1_000_000));
        assert_eq!(loaded.get(1_000_001), store.get(1_000_001));
        assert!(loaded.get(1_000_001).unwrap().is_archived());
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.sqlite");
        let state = IndexState {
            next_id: 5,
            dimension: 3,
            model: "m".to_string(),
        };

        let mut store = MetadataStore::new();
        store.insert(record(1));
        store.insert(record(2));
        save(&path, &store, &state).unwrap();

        let mut smaller = MetadataStore::new();
        smaller.insert(record(3));
        save(&path, &smaller, &state).unwrap();

        let (loaded, _) = load(&path).unwrap();
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_topic_key_fallbacks() {
        let mut r = record(1);
        assert_eq!(r.topic_key(), "key:hiring-freeze");
        r.canonical_key.clear();
        assert_eq!(r.topic_key(), "title:Hiring Freeze");
        r.title = None;
        assert_eq!(r.topic_key(), "file:freeze.txt");
    }

    #[test]
    fn test_title_never_collides_with_canonical_key() {
        let keyed = record(1);
        let mut titled = record(2);
        titled.canonical_key.clear();
        titled.title = Some("hiring-freeze".to_string());
        assert_ne!(keyed.topic_key(), titled.topic_key());
    }

    #[test]
    fn test_expiry_ignores_unknown_bounds() {
        let r = record(1);
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert!(!r.is_expired_on(day));

        let mut ended = record(2);
        ended.valid_to = DateField::Date(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert!(ended.is_expired_on(day));
        assert!(ended.is_expired_on(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()));
    }
}
