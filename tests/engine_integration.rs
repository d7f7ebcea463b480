//! Engine integration tests: refresh, curation, windowed retrieval and persistence
//!
//! Uses deterministic in-process embedding providers; no network or model download.
use brainvault::config::Config;
use brainvault::curator::Status;
use brainvault::embedding::{EmbeddingClient, EmbeddingError, EmbeddingProvider, RetryPolicy};
use brainvault::engine::{Engine, RefreshLock, RetrieveOptions};
use brainvault::error::VaultError;
use brainvault::pipeline::read_report;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 16;

/// Hashes each word into one of `DIM` buckets; shared words mean nearby vectors
fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(7u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
        v[hash as usize % DIM] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

struct KeywordProvider;

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(keyword_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "keyword-hash"
    }
}

/// Rate-limits every other call; texts mentioning "outage" never succeed
struct FlakyProvider {
    calls: AtomicU32,
}

impl EmbeddingProvider for FlakyProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains("outage") {
            return Err(EmbeddingError::Transient("503 service unavailable".into()));
        }
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(EmbeddingError::Transient("429 too many requests".into()));
        }
        Ok(keyword_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(1),
        multiplier: 1.5,
        max_delay: Duration::from_millis(5),
    }
}

fn config(dir: &Path) -> Config {
    let mut config = Config::with_data_dir(dir);
    config.embedding.dimension = DIM;
    config
}

fn engine_with(dir: &Path, provider: Arc<dyn EmbeddingProvider>) -> Engine {
    let client = EmbeddingClient::new(provider, fast_retries(), DIM);
    Engine::with_client(config(dir), client).unwrap()
}

fn engine(dir: &Path) -> Engine {
    engine_with(dir, Arc::new(KeywordProvider))
}

fn write(dir: &Path, rel: &str, text: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn options(k: usize, now: NaiveDateTime) -> RetrieveOptions {
    RetrieveOptions {
        k,
        category: None,
        prefer_recent: false,
        now,
    }
}

fn seed_parking(dir: &Path) {
    write(
        dir,
        "reminders/parking-2025-01.txt",
        "Title: Parking policy\nTags: facilities\nValidFrom: 2025-01-01\nBody: Visitors park on level 1.",
    );
    write(
        dir,
        "reminders/parking-2025-06.txt",
        "Title: Parking policy\nTags: facilities\nValidFrom: 2025-06-01\nBody: Visitors park on level 2.",
    );
}

fn seed_meetings(dir: &Path) {
    write(
        dir,
        "parsed_data/meetings/sept-sync.txt",
        "Title: Budget sync\nMeetingDate: 2025-09-02\nBody: Budget review for the platform team.",
    );
    write(
        dir,
        "parsed_data/meetings/oct-planning.txt",
        "Title: Budget planning\nMeetingDate: 2025-10-07\nBody: Budget planning for next year.",
    );
}

#[tokio::test]
async fn test_refresh_curates_and_supersedes() {
    let temp = TempDir::new().unwrap();
    seed_parking(temp.path());
    let engine = engine(temp.path());

    let summary = engine.refresh().await.unwrap();
    assert_eq!(summary.registry_entries, 2);
    assert_eq!(summary.indexed, 2);

    let registry = engine.registry().unwrap();
    let archived: Vec<_> = registry
        .iter()
        .filter(|e| e.status == Status::Archived)
        .collect();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].path, "reminders/parking-2025-01.txt");
    assert_eq!(archived[0].superseded_by.as_deref(), Some("Parking policy"));
    assert_eq!(archived[0].valid_to, NaiveDate::from_ymd_opt(2025, 5, 31));

    // The archived record carries the synthesized cutoff into the index
    let snapshot = engine.snapshot().unwrap();
    let old = snapshot
        .records()
        .find(|r| r.path == "reminders/parking-2025-01.txt")
        .unwrap();
    assert_eq!(old.valid_to.date(), NaiveDate::from_ymd_opt(2025, 5, 31));
}

#[tokio::test]
async fn test_search_returns_current_version_once() {
    let temp = TempDir::new().unwrap();
    seed_parking(temp.path());
    let engine = engine(temp.path());
    engine.refresh().await.unwrap();

    let retrieval = engine
        .retrieve("where do visitors park", &options(5, at(2025, 10, 15)))
        .unwrap();

    assert!(retrieval.window.is_none());
    assert_eq!(retrieval.results.len(), 1);
    let top = &retrieval.results[0];
    assert_eq!(top.record.path, "reminders/parking-2025-06.txt");
    assert!(top.relevance > 0.0 && top.relevance <= 1.0);
}

#[tokio::test]
async fn test_archived_version_never_wins_its_topic() {
    let temp = TempDir::new().unwrap();
    // The older version still claims to be valid for years
    write(
        temp.path(),
        "reminders/old.txt",
        "Title: Parking policy\nValidFrom: 2023-01-01\nValidTo: 2030-12-31\nBody: Visitors park in the north garage beside the loading dock.",
    );
    write(
        temp.path(),
        "reminders/new.txt",
        "Title: Parking policy\nValidFrom: 2024-01-01\nBody: Level 3 only.",
    );
    let engine = engine(temp.path());
    engine.refresh().await.unwrap();

    let registry = engine.registry().unwrap();
    let old = registry.iter().find(|e| e.path == "reminders/old.txt").unwrap();
    assert_eq!(old.status, Status::Archived);
    assert!(engine
        .snapshot()
        .unwrap()
        .records()
        .any(|r| r.path == "reminders/old.txt" && r.is_archived()));

    let retrieval = engine
        .retrieve(
            "visitors park north garage loading dock",
            &options(5, at(2025, 10, 15)),
        )
        .unwrap();
    let paths: Vec<_> = retrieval.results.iter().map(|r| r.record.path.as_str()).collect();
    assert_eq!(paths, vec!["reminders/new.txt"]);
}

#[tokio::test]
async fn test_windowed_search_keeps_meetings_in_window() {
    let temp = TempDir::new().unwrap();
    seed_meetings(temp.path());
    let engine = engine(temp.path());
    engine.refresh().await.unwrap();

    // "last month" on 2025-10-15 is September
    let september = engine
        .retrieve("budget last month", &options(5, at(2025, 10, 15)))
        .unwrap();
    assert!(september.window_applied);
    let paths: Vec<_> = september.results.iter().map(|r| r.record.path.as_str()).collect();
    assert_eq!(paths, vec!["parsed_data/meetings/sept-sync.txt"]);

    // Q4 2025 covers October only
    let october = engine
        .retrieve("budget Q4 2025", &options(5, at(2025, 10, 15)))
        .unwrap();
    let paths: Vec<_> = october.results.iter().map(|r| r.record.path.as_str()).collect();
    assert_eq!(paths, vec!["parsed_data/meetings/oct-planning.txt"]);
}

#[tokio::test]
async fn test_empty_window_falls_back_to_all_dates() {
    let temp = TempDir::new().unwrap();
    seed_meetings(temp.path());
    let engine = engine(temp.path());
    engine.refresh().await.unwrap();

    let retrieval = engine
        .retrieve("budget Q1 2024", &options(5, at(2025, 10, 15)))
        .unwrap();

    assert!(retrieval.window.is_some());
    assert!(!retrieval.window_applied);
    assert_eq!(retrieval.results.len(), 2);
}

#[tokio::test]
async fn test_category_preference_and_fallback() {
    let temp = TempDir::new().unwrap();
    seed_meetings(temp.path());
    seed_parking(temp.path());
    let engine = engine(temp.path());
    engine.refresh().await.unwrap();

    let mut opts = options(5, at(2025, 10, 15));
    opts.category = Some("Meetings".to_string());
    let meetings = engine.retrieve("budget review", &opts).unwrap();
    assert!(meetings.category_applied);
    assert!(meetings
        .results
        .iter()
        .all(|r| r.record.category == "meetings"));

    opts.category = Some("finance".to_string());
    let fallback = engine.retrieve("budget review", &opts).unwrap();
    assert!(!fallback.category_applied);
    assert!(!fallback.results.is_empty());
}

#[tokio::test]
async fn test_index_and_health_report_align() {
    let temp = TempDir::new().unwrap();
    seed_meetings(temp.path());
    seed_parking(temp.path());
    write(temp.path(), "parsed_data/notes/blank.txt", "   \n\n  ");
    let engine = engine(temp.path());

    engine.refresh().await.unwrap();
    let snapshot = engine.snapshot().unwrap();
    assert!(snapshot.check_alignment().is_ok());

    let report = read_report(&engine.config().report_path().unwrap()).unwrap();
    assert_eq!(report.len(), 5);
    assert_eq!(
        report.iter().map(|r| r.chunk_count).sum::<usize>(),
        snapshot.len()
    );
    let blank = report.iter().find(|r| r.filename == "blank.txt").unwrap();
    assert_eq!(blank.chunk_count, 0);
    assert!(blank.is_sparse());
}

#[tokio::test]
async fn test_transient_failures_retried_and_exhausted_chunks_skipped() {
    let temp = TempDir::new().unwrap();
    seed_parking(temp.path());
    write(
        temp.path(),
        "reminders/incident.txt",
        "Title: Incident\nBody: The outage lasted two hours.",
    );
    let provider = Arc::new(FlakyProvider {
        calls: AtomicU32::new(0),
    });
    let engine = engine_with(temp.path(), provider);

    let summary = engine.refresh().await.unwrap();
    assert_eq!(summary.indexed, 2);
    assert_eq!(summary.stats.skipped_chunks, 1);

    let report = engine.health().unwrap();
    let incident = report.iter().find(|r| r.filename == "incident.txt").unwrap();
    assert_eq!(incident.chunk_count, 0);
}

#[tokio::test]
async fn test_refresh_rejected_while_another_holds_lock() {
    let temp = TempDir::new().unwrap();
    let engine = engine(temp.path());
    let lock = RefreshLock::new(
        engine
            .config()
            .embeddings_dir()
            .unwrap()
            .join("refresh.lock"),
    );

    let guard = lock.try_acquire().unwrap();
    assert!(matches!(
        engine.refresh().await,
        Err(VaultError::RefreshInProgress)
    ));

    drop(guard);
    assert!(engine.refresh().await.is_ok());
}

#[tokio::test]
async fn test_reload_from_disk_and_partial_index() {
    let temp = TempDir::new().unwrap();
    seed_parking(temp.path());
    engine(temp.path()).refresh().await.unwrap();

    // A new engine serves the persisted index
    let reopened = engine(temp.path());
    assert_eq!(reopened.load().unwrap().len(), 2);

    // Without its metadata the index is refused rather than served half-built
    let live = reopened.config().embeddings_dir().unwrap().join("index");
    fs::remove_file(live.join("metadata.sqlite")).unwrap();
    let broken = engine(temp.path());
    assert!(matches!(
        broken.retrieve("parking", &options(3, at(2025, 10, 15))),
        Err(VaultError::IndexNotBuilt { .. })
    ));
}
