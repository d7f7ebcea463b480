//! Indexing pipeline: source documents to knowledge index
//!
//! Each document is parsed, chunked and embedded on a bounded worker pool. Embedding
//! calls block, so they run on tokio's blocking threads. Inserts go through the one
//! mutex that guards the index, which keeps ids and metadata in lockstep.

mod report;

pub use report::{read_report, write_report, HealthRow, SPARSE_CHAR_THRESHOLD};

use crate::chunking::chunk_text;
use crate::config::Config;
use crate::curator::{topic_key, RegistryEntry};
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::error::{Result, VaultError};
use crate::index::{KnowledgeIndex, MetadataRecord};
use crate::source::{self, join_tags, parse_document, DateField, SourceDocument};
use ahash::AHashMap;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub documents: usize,
    pub embedded_chunks: usize,
    pub skipped_chunks: usize,
    pub duration_ms: u64,
}

/// A completed build: the new index plus one health row per document
#[derive(Debug)]
pub struct IndexBuild {
    pub index: KnowledgeIndex,
    pub report: Vec<HealthRow>,
    pub stats: BuildStats,
}

/// Settings the pipeline needs from the configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chars: usize,
    pub overlap: usize,
    pub preview_chars: usize,
    pub workers: usize,
    pub meetings_category: String,
    /// Paths in records and registry rows are relative to this directory
    pub base_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_chars: config.chunking.max_chars,
            overlap: config.chunking.overlap,
            preview_chars: config.chunking.preview_chars,
            workers: config.indexing.workers.max(1),
            meetings_category: config.retrieval.meetings_category.clone(),
            base_dir: config.data_dir()?,
        })
    }
}

/// Drives chunking, embedding and insertion for a batch of documents
pub struct IndexingPipeline {
    client: EmbeddingClient,
    settings: Arc<PipelineSettings>,
}

/// A chunk ready for insertion
struct EmbeddedChunk {
    vector: Vec<f32>,
    record: MetadataRecord,
}

struct DocumentOutcome {
    row: HealthRow,
    chunks: Vec<EmbeddedChunk>,
    skipped: usize,
}

impl IndexingPipeline {
    pub fn new(client: EmbeddingClient, settings: PipelineSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }

    /// Index `documents` into `index`
    ///
    /// Per-document and per-chunk failures are logged and reflected in the health
    /// report; they never abort the run.
    pub async fn run(
        &self,
        documents: Vec<SourceDocument>,
        registry: &[RegistryEntry],
        index: KnowledgeIndex,
    ) -> Result<IndexBuild> {
        let start = std::time::Instant::now();
        let total = documents.len();
        info!(
            "Indexing {} documents with {} workers",
            total, self.settings.workers
        );

        let registry: Arc<AHashMap<String, RegistryEntry>> = Arc::new(
            registry
                .iter()
                .map(|e| (e.path.clone(), e.clone()))
                .collect(),
        );
        let index = Arc::new(Mutex::new(index));
        let semaphore = Arc::new(Semaphore::new(self.settings.workers));

        let mut handles = Vec::with_capacity(total);
        for document in documents {
            let semaphore = semaphore.clone();
            let index = index.clone();
            let registry = registry.clone();
            let client = self.client.clone();
            let settings = self.settings.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| VaultError::Other(e.into()))?;

                let outcome = tokio::task::spawn_blocking(move || {
                    process_document(&client, &settings, &registry, document)
                })
                .await
                .map_err(|e| VaultError::Other(e.into()))?;

                insert_outcome(&index, outcome).await
            }));
        }

        let mut report = Vec::with_capacity(total);
        let mut stats = BuildStats {
            documents: total,
            ..Default::default()
        };
        for handle in handles {
            let (row, embedded, skipped) =
                handle.await.map_err(|e| VaultError::Other(e.into()))??;
            stats.embedded_chunks += embedded;
            stats.skipped_chunks += skipped;
            report.push(row);
        }

        let index = Arc::try_unwrap(index)
            .map_err(|_| VaultError::Other(anyhow::anyhow!("index still shared after build")))?
            .into_inner();
        index.check_alignment()?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexing complete: {} chunks embedded, {} skipped, {}ms",
            stats.embedded_chunks, stats.skipped_chunks, stats.duration_ms
        );

        Ok(IndexBuild {
            index,
            report,
            stats,
        })
    }
}

async fn insert_outcome(
    index: &Mutex<KnowledgeIndex>,
    outcome: DocumentOutcome,
) -> Result<(HealthRow, usize, usize)> {
    let DocumentOutcome {
        mut row,
        chunks,
        mut skipped,
    } = outcome;

    let mut inserted = 0;
    let mut index = index.lock().await;
    for chunk in chunks {
        match index.insert(&chunk.vector, chunk.record) {
            Ok(id) => {
                debug!("Inserted chunk as id {}", id);
                inserted += 1;
            }
            Err(e) => {
                warn!("Failed to insert chunk from {}: {}", row.filename, e);
                skipped += 1;
            }
        }
    }

    row.chunk_count = inserted;
    Ok((row, inserted, skipped))
}

/// Parse, chunk and embed one document; runs on a blocking thread
fn process_document(
    client: &EmbeddingClient,
    settings: &PipelineSettings,
    registry: &AHashMap<String, RegistryEntry>,
    document: SourceDocument,
) -> DocumentOutcome {
    let filename = document.filename();
    let rel_path = source::relative_path(&settings.base_dir, &document.path);

    let Some(text) = document.text.as_deref() else {
        return DocumentOutcome {
            row: HealthRow {
                filename,
                category: document.category.clone(),
                ..Default::default()
            },
            chunks: Vec::new(),
            skipped: 0,
        };
    };

    let parsed = parse_document(text);
    let header = parsed.header;
    let entry = registry.get(&rel_path);

    let key = match entry {
        Some(e) => e.canonical_key.clone(),
        None => topic_key(&header.title.clone().unwrap_or_else(|| document.stem()), &rel_path),
    };
    let version_ts: Option<NaiveDate> = match entry {
        Some(e) => e.version_ts,
        None => {
            let is_meeting = document
                .category
                .eq_ignore_ascii_case(&settings.meetings_category);
            let meeting = if is_meeting { header.meeting_date.date() } else { None };
            meeting.or_else(|| header.valid_from.date())
        }
    };
    let status = entry.map(|e| e.status).unwrap_or_default();
    let valid_to = match (&header.valid_to, entry.and_then(|e| e.valid_to)) {
        (DateField::Missing, Some(synthesized)) => DateField::Date(synthesized),
        (field, _) => field.clone(),
    };

    let chunks = chunk_text(parsed.body, settings.max_chars, settings.overlap);
    let mut embedded = Vec::with_capacity(chunks.len());
    let mut skipped = 0;

    for chunk in &chunks {
        match client.embed(&chunk.text) {
            Ok(vector) => embedded.push(EmbeddedChunk {
                vector,
                record: MetadataRecord {
                    id: 0,
                    filename: filename.clone(),
                    path: rel_path.clone(),
                    category: document.category.clone(),
                    chunk_index: chunk.chunk_id,
                    title: header.title.clone(),
                    tags: header.tags.clone(),
                    meeting_date: header.meeting_date.clone(),
                    valid_from: header.valid_from.clone(),
                    valid_to: valid_to.clone(),
                    canonical_key: key.clone(),
                    version_ts,
                    status,
                    text_preview: chunk.text.chars().take(settings.preview_chars).collect(),
                },
            }),
            Err(e) => {
                skipped += 1;
                // Dimension mismatches are already logged by the client
                if !matches!(e, EmbeddingError::DimensionMismatch { .. }) {
                    warn!("Skipping chunk {} of {}: {}", chunk.chunk_id, filename, e);
                }
            }
        }
    }

    debug!(
        "{}: {} chunks, {} embedded",
        filename,
        chunks.len(),
        embedded.len()
    );

    DocumentOutcome {
        row: HealthRow {
            filename,
            category: document.category.clone(),
            meeting_date: header.meeting_date.to_string(),
            title: header.title.clone().unwrap_or_default(),
            tags: join_tags(&header.tags),
            valid_from: header.valid_from.to_string(),
            valid_to: valid_to.to_string(),
            canonical_key: key,
            version_ts: version_ts
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            chunk_count: 0,
            char_count: text.chars().count(),
        },
        chunks: embedded,
        skipped,
    }
}
