//! The engine: persisted index, in-memory snapshot and refresh orchestration
//!
//! A refresh runs curation, indexes every source document into a fresh
//! `KnowledgeIndex`, saves it with a directory swap and only then replaces the
//! snapshot that queries read. Queries never see a half-built index.

mod lock;

pub use lock::{RefreshGuard, RefreshLock};

use crate::config::Config;
use crate::curator::{self, RegistryEntry};
use crate::embedding::EmbeddingClient;
use crate::error::{Result, VaultError};
use crate::index::{IndexStore, KnowledgeIndex};
use crate::pipeline::{self, BuildStats, HealthRow, IndexingPipeline, PipelineSettings};
use crate::retrieval::{deduplicate, RerankOptions, Reranker, Retriever, ScoredRecord, SearchHit};
use crate::source::{self, ReminderDraft};
use crate::temporal::{self, DateWindow};
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{info, warn};

const LOCK_FILE: &str = "refresh.lock";

/// What a refresh or index run produced
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    /// Registry rows written, or read when curation was skipped
    pub registry_entries: usize,
    /// Records in the new index
    pub indexed: usize,
    pub stats: BuildStats,
}

/// Per-query settings for [`Engine::retrieve`]
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub k: usize,
    /// Prefer records from this category (e.g. the meetings category)
    pub category: Option<String>,
    pub prefer_recent: bool,
    /// Reference time for date windows and validity
    pub now: NaiveDateTime,
}

impl RetrieveOptions {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            category: None,
            prefer_recent: false,
            now: Local::now().naive_local(),
        }
    }
}

/// Ranked results plus how the query was narrowed
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub results: Vec<ScoredRecord>,
    /// Window resolved from the query text
    pub window: Option<DateWindow>,
    /// `false` when a resolved window matched nothing and the search ran unwindowed
    pub window_applied: bool,
    /// `false` when the category matched nothing and results are unrestricted
    pub category_applied: bool,
}

pub struct Engine {
    config: Config,
    client: OnceLock<EmbeddingClient>,
    store: IndexStore,
    snapshot: RwLock<Option<Arc<KnowledgeIndex>>>,
    lock: RefreshLock,
}

impl Engine {
    /// Engine whose provider is built from the configuration on first use
    pub fn new(config: Config) -> Result<Self> {
        let root = config.embeddings_dir()?;
        Ok(Self {
            store: IndexStore::new(root.clone()),
            lock: RefreshLock::new(root.join(LOCK_FILE)),
            snapshot: RwLock::new(None),
            client: OnceLock::new(),
            config,
        })
    }

    /// Engine with an explicit embedding client
    pub fn with_client(config: Config, client: EmbeddingClient) -> Result<Self> {
        let engine = Self::new(config)?;
        let _ = engine.client.set(client);
        Ok(engine)
    }

    /// The embedding client, built on first call
    ///
    /// The HTTP provider uses a blocking client; build it outside the async runtime.
    pub fn client(&self) -> Result<&EmbeddingClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = EmbeddingClient::from_config(&self.config)?;
        Ok(self.client.get_or_init(|| client))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock.is_held()
    }

    /// Load the persisted index into the snapshot
    pub fn load(&self) -> Result<Arc<KnowledgeIndex>> {
        let index = Arc::new(self.store.load(self.config.embedding.dimension)?);
        info!("Loaded index with {} records", index.len());
        self.swap(index.clone());
        Ok(index)
    }

    /// Current snapshot, loading it from disk on first use
    pub fn snapshot(&self) -> Result<Arc<KnowledgeIndex>> {
        let current = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match current {
            Some(index) => Ok(index),
            None => self.load(),
        }
    }

    fn swap(&self, index: Arc<KnowledgeIndex>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(index);
    }

    /// Curate, rebuild the index and swap it in
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let _guard = self.lock.try_acquire()?;
        info!("Refresh started");

        let registry = curator::run(&self.config)?;
        info!("Registry holds {} entries", registry.len());
        self.rebuild(&registry).await
    }

    /// Recompute the registry only
    pub fn curate(&self) -> Result<Vec<RegistryEntry>> {
        let _guard = self.lock.try_acquire()?;
        curator::run(&self.config)
    }

    /// Rebuild the index from the registry already on disk
    pub async fn index(&self) -> Result<RefreshSummary> {
        let _guard = self.lock.try_acquire()?;
        let registry = self.registry()?;
        self.rebuild(&registry).await
    }

    /// Registry rows, empty when no curation has run yet
    pub fn registry(&self) -> Result<Vec<RegistryEntry>> {
        let path = self.config.registry_path()?;
        if !path.exists() {
            warn!("No registry at {:?}; indexing without curation data", path);
            return Ok(Vec::new());
        }
        curator::read_registry(&path)
    }

    /// Rows of the last health report
    pub fn health(&self) -> Result<Vec<HealthRow>> {
        let path = self.config.report_path()?;
        if !path.exists() {
            return Err(VaultError::IndexNotBuilt {
                reason: format!("no health report at {:?}", path),
            });
        }
        pipeline::read_report(&path)
    }

    /// Save a new reminder; it is searchable after the next refresh
    pub fn remember(&self, draft: &ReminderDraft) -> Result<PathBuf> {
        source::write_reminder(
            &self.config.reminders_dir()?,
            draft,
            Local::now().naive_local(),
        )
    }

    async fn rebuild(&self, registry: &[RegistryEntry]) -> Result<RefreshSummary> {
        let client = self.client()?;
        let documents = source::scan_sources(&self.config)?;

        // Ids are never reused across rebuilds
        let previous_next_id = self.previous_next_id();
        let first_id = previous_next_id.max(self.config.indexing.first_id);
        let index = KnowledgeIndex::new(client.dimension(), first_id, client.model_name());

        let indexer = IndexingPipeline::new(
            client.clone(),
            PipelineSettings::from_config(&self.config)?,
        );
        let build = indexer.run(documents, registry, index).await?;

        self.store.save(&build.index)?;
        let index = Arc::new(build.index);
        let indexed = index.len();
        self.swap(index);

        pipeline::write_report(&self.config.report_path()?, &build.report)?;
        info!("Refresh complete: {} records indexed", indexed);

        Ok(RefreshSummary {
            registry_entries: registry.len(),
            indexed,
            stats: build.stats,
        })
    }

    fn previous_next_id(&self) -> i64 {
        if let Ok(Some(index)) = self.snapshot.read().map(|s| s.clone()) {
            return index.next_id();
        }
        match self.store.load(self.config.embedding.dimension) {
            Ok(index) => index.next_id(),
            Err(_) => i64::MIN,
        }
    }

    /// Answer-path retrieval: window, category preference, rerank, dedup
    ///
    /// A window resolved from the query that matches nothing falls back to an
    /// unwindowed search; a category that matches nothing falls back to all
    /// categories. Both fallbacks are reported on the result.
    pub fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<Retrieval> {
        let snapshot = self.snapshot()?;
        let retriever = Retriever::new(
            self.client()?.clone(),
            snapshot,
            self.config.retrieval.clone(),
        );
        let pool_size = options
            .k
            .saturating_mul(self.config.retrieval.category_overfetch.max(1));

        let window = temporal::resolve(query, options.now);
        let mut hits: Vec<SearchHit> = match &window {
            Some(w) => retriever.search_in_window(query, w, pool_size)?,
            None => Vec::new(),
        };
        let window_applied = !hits.is_empty();
        if let Some(w) = &window {
            if !window_applied {
                warn!(
                    "Nothing dated {} .. {}; searching without a window",
                    w.first_day(),
                    w.last_day()
                );
            }
        }

        let mut category_applied = true;
        match (&options.category, window_applied) {
            (Some(category), true) => {
                let matching: Vec<SearchHit> = hits
                    .iter()
                    .filter(|h| h.record.category.eq_ignore_ascii_case(category))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    warn!("No '{}' records in window; keeping all categories", category);
                    category_applied = false;
                } else {
                    hits = matching;
                }
            }
            (Some(category), false) => {
                let search = retriever.search_in_category(query, pool_size, category)?;
                category_applied = search.narrowed;
                hits = search.hits;
            }
            (None, true) => {}
            (None, false) => hits = retriever.search(query, pool_size)?,
        }

        let rerank_options = RerankOptions {
            prefer_category: options.category.clone(),
            prefer_recent: options.prefer_recent,
            today: options.now.date(),
        };
        let scored = Reranker::new(self.config.reranking.clone()).rerank(query, hits, &rerank_options);
        let results = deduplicate(scored, options.k);

        Ok(Retrieval {
            results,
            window,
            window_applied,
            category_applied,
        })
    }
}
