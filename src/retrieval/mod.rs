//! Query-time retrieval over an index snapshot
//!
//! The retriever embeds the query, fetches nearest neighbors, and narrows them by
//! category or date window. Reranking and per-topic deduplication run afterwards.

mod deduplication;
mod rerank;

pub use deduplication::{deduplicate, rank_order};
pub use rerank::{RerankOptions, Reranker};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::index::{KnowledgeIndex, MetadataRecord};
use crate::temporal::DateWindow;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// A nearest-neighbor hit joined with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: MetadataRecord,
    /// Squared Euclidean distance from the query, lower is closer
    pub distance: f32,
}

impl SearchHit {
    /// Similarity in `(0, 1]` derived from distance
    pub fn relevance(&self) -> f64 {
        1.0 / (1.0 + self.distance.max(0.0) as f64)
    }
}

/// A hit after reranking
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: MetadataRecord,
    pub distance: f32,
    /// Composite reranking score
    pub score: f64,
    /// `1 / (1 + distance)`
    pub relevance: f64,
}

impl ScoredRecord {
    pub fn new(hit: SearchHit, score: f64) -> Self {
        let relevance = hit.relevance();
        Self {
            record: hit.record,
            distance: hit.distance,
            score,
            relevance,
        }
    }

    /// Preview text shortened to `max_chars` characters
    pub fn preview(&self, max_chars: usize) -> String {
        let text = &self.record.text_preview;
        if text.chars().count() <= max_chars {
            text.clone()
        } else {
            format!("{}...", text.chars().take(max_chars).collect::<String>())
        }
    }
}

/// Outcome of a category-restricted search
#[derive(Debug, Clone)]
pub struct CategorySearch {
    pub hits: Vec<SearchHit>,
    /// `true` when the hits all match the category; `false` when nothing matched and
    /// the unrestricted pool was returned instead
    pub narrowed: bool,
}

/// Nearest-neighbor search with category and window narrowing
pub struct Retriever {
    client: EmbeddingClient,
    snapshot: Arc<KnowledgeIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(client: EmbeddingClient, snapshot: Arc<KnowledgeIndex>, config: RetrievalConfig) -> Self {
        Self {
            client,
            snapshot,
            config,
        }
    }

    /// The `k` nearest records
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.fetch(query, k)
    }

    /// Prefer records in `category`; falls back to the unrestricted pool when none match
    pub fn search_in_category(&self, query: &str, k: usize, category: &str) -> Result<CategorySearch> {
        let pool = self.fetch(query, k.saturating_mul(self.config.category_overfetch))?;

        let matching: Vec<SearchHit> = pool
            .iter()
            .filter(|h| h.record.category.eq_ignore_ascii_case(category))
            .take(k)
            .cloned()
            .collect();

        if matching.is_empty() && !pool.is_empty() {
            warn!(
                "No hits in category '{}'; returning unrestricted results",
                category
            );
            let mut hits = pool;
            hits.truncate(k);
            return Ok(CategorySearch {
                hits,
                narrowed: false,
            });
        }

        Ok(CategorySearch {
            hits: matching,
            narrowed: true,
        })
    }

    /// Records whose dates fall in `window`; empty when nothing survives
    pub fn search_in_window(&self, query: &str, window: &DateWindow, k: usize) -> Result<Vec<SearchHit>> {
        let pool = self.fetch(query, k.saturating_mul(self.config.window_overfetch))?;
        let pool_size = pool.len();

        let hits: Vec<SearchHit> = pool
            .into_iter()
            .filter(|h| in_window(&h.record, window))
            .take(k)
            .collect();

        debug!(
            "Window {} .. {} kept {} of {} candidates",
            window.start,
            window.end,
            hits.len(),
            pool_size
        );
        Ok(hits)
    }

    fn fetch(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || k == 0 || self.snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.client.embed(query)?;
        let hits = self
            .snapshot
            .search(&vector, k)?
            .into_iter()
            .map(|(record, distance)| SearchHit { record, distance })
            .collect();
        Ok(hits)
    }
}

/// Window membership for one record
///
/// A meeting date decides alone. Otherwise the validity interval must overlap the
/// window, with a missing bound treated as open. Undated records are always kept.
pub fn in_window(record: &MetadataRecord, window: &DateWindow) -> bool {
    if let Some(meeting) = record.meeting_date.date() {
        return window.contains(meeting);
    }

    match (record.valid_from.date(), record.valid_to.date()) {
        (Some(from), Some(to)) => window.overlaps(from, to),
        (Some(from), None) => from <= window.last_day(),
        (None, Some(to)) => to >= window.first_day(),
        (None, None) => true,
    }
}
