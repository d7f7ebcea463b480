//! The knowledge index: vectors and metadata that move together
//!
//! - `VectorIndex` holds id → vector
//! - `MetadataStore` holds id → `MetadataRecord`
//! - `KnowledgeIndex` owns both plus the id counter, so every id lands in both or neither
//! - `IndexStore` persists a `KnowledgeIndex` as one directory, swapped in whole
pub mod metadata;
mod vector;

pub use metadata::{IndexState, MetadataRecord, MetadataStore};
pub use vector::{Neighbor, VectorIndex, VectorIndexError};

use crate::error::{Result, VaultError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const VECTORS_FILE: &str = "vectors.bin.zst";
pub const METADATA_FILE: &str = "metadata.sqlite";

/// Vectors, metadata and the monotonic id counter
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    vectors: VectorIndex,
    metadata: MetadataStore,
    next_id: i64,
    model: String,
}

impl KnowledgeIndex {
    /// Empty index whose first id will be `first_id`
    pub fn new(dimension: usize, first_id: i64, model: impl Into<String>) -> Self {
        Self {
            vectors: VectorIndex::new(dimension),
            metadata: MetadataStore::new(),
            next_id: first_id,
            model: model.into(),
        }
    }

    /// Append a vector with its metadata under the next id
    ///
    /// The record's `id` is overwritten with the assigned id. A vector of the wrong
    /// dimension is rejected and consumes no id.
    pub fn insert(&mut self, vector: &[f32], mut record: MetadataRecord) -> Result<i64> {
        let id = self.next_id;
        self.vectors.add(id, vector)?;
        record.id = id;
        self.metadata.insert(record);
        self.next_id += 1;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Option<&MetadataRecord> {
        self.metadata.get(id)
    }

    /// Nearest neighbors joined with their metadata
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(MetadataRecord, f32)>> {
        let neighbors = self.vectors.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| self.metadata.get(n.id).map(|r| (r.clone(), n.distance)))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn records(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.metadata.records()
    }

    /// Confirm both stores hold exactly the same id set
    pub fn check_alignment(&self) -> Result<()> {
        let mut vector_ids: Vec<i64> = self.vectors.ids().to_vec();
        vector_ids.sort_unstable();
        let metadata_ids: Vec<i64> = self.metadata.ids().collect();

        if vector_ids != metadata_ids {
            return Err(VaultError::IndexNotBuilt {
                reason: format!(
                    "vector index has {} ids but metadata store has {}",
                    vector_ids.len(),
                    metadata_ids.len()
                ),
            });
        }
        if let Some(&max) = metadata_ids.last() {
            if max >= self.next_id {
                return Err(VaultError::IndexNotBuilt {
                    reason: format!("id {} is not below next id {}", max, self.next_id),
                });
            }
        }
        Ok(())
    }
}

/// On-disk home of the knowledge index
///
/// Layout under `root`: `index/` is live, `index.staging/` is being written,
/// `index.old/` is the previous live copy during a swap.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn live_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("index.staging")
    }

    fn old_dir(&self) -> PathBuf {
        self.root.join("index.old")
    }

    /// Persist `index`, replacing the live copy only once both files are complete
    pub fn save(&self, index: &KnowledgeIndex) -> Result<()> {
        index.check_alignment()?;

        let staging = self.staging_dir();
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to create staging directory: {:?}", staging),
        })?;

        index.vectors.save(&staging.join(VECTORS_FILE))?;
        metadata::save(
            &staging.join(METADATA_FILE),
            &index.metadata,
            &IndexState {
                next_id: index.next_id,
                dimension: index.dimension(),
                model: index.model.clone(),
            },
        )?;

        let live = self.live_dir();
        let old = self.old_dir();
        remove_dir_if_exists(&old)?;
        if live.exists() {
            rename(&live, &old)?;
        }
        rename(&staging, &live)?;
        remove_dir_if_exists(&old)?;

        info!(
            "Saved index with {} vectors to {:?}",
            index.len(),
            self.live_dir()
        );
        Ok(())
    }

    /// Load the live index
    ///
    /// A swap interrupted between its two renames leaves only `index.old/`; that copy
    /// is restored first. Missing, partial or unreadable files yield
    /// [`VaultError::IndexNotBuilt`], as does a dimension differing from `dimension`.
    pub fn load(&self, dimension: usize) -> Result<KnowledgeIndex> {
        let live = self.live_dir();
        let old = self.old_dir();
        if !live.exists() && old.exists() {
            warn!("Restoring previous index from interrupted swap");
            rename(&old, &live)?;
        }

        let vectors_path = live.join(VECTORS_FILE);
        let metadata_path = live.join(METADATA_FILE);
        match (vectors_path.exists(), metadata_path.exists()) {
            (true, true) => {}
            (false, false) => {
                return Err(VaultError::IndexNotBuilt {
                    reason: format!("no index at {:?}", live),
                })
            }
            (has_vectors, _) => {
                return Err(VaultError::IndexNotBuilt {
                    reason: format!(
                        "incomplete index at {:?}: {} is missing",
                        live,
                        if has_vectors { METADATA_FILE } else { VECTORS_FILE }
                    ),
                })
            }
        }

        let vectors = VectorIndex::load(&vectors_path).map_err(|e| VaultError::IndexNotBuilt {
            reason: format!("unreadable vector file: {}", e),
        })?;
        let (metadata, state) =
            metadata::load(&metadata_path).map_err(|e| VaultError::IndexNotBuilt {
                reason: format!("unreadable metadata store: {}", e),
            })?;

        if vectors.dimension() != dimension || state.dimension != dimension {
            return Err(VaultError::IndexNotBuilt {
                reason: format!(
                    "index was built with {} dimensions, configuration expects {}",
                    vectors.dimension(),
                    dimension
                ),
            });
        }

        let index = KnowledgeIndex {
            vectors,
            metadata,
            next_id: state.next_id,
            model: state.model,
        };
        index.check_alignment()?;
        Ok(index)
    }
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| VaultError::Io {
        source: e,
        context: format!("Failed to rename {:?} -> {:?}", from, to),
    })
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| VaultError::Io {
            source: e,
            context: format!("Failed to remove {:?}", dir),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curator::Status;
    use crate::source::DateField;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn record(title: &str) -> MetadataRecord {
        MetadataRecord {
            id: 0,
            filename: format!("{}.txt", title),
            path: format!("reminders/{}.txt", title),
            category: "Reminders".to_string(),
            chunk_index: 0,
            title: Some(title.to_string()),
            tags: BTreeSet::new(),
            meeting_date: DateField::Missing,
            valid_from: DateField::Missing,
            valid_to: DateField::Missing,
            canonical_key: title.to_lowercase(),
            version_ts: None,
            status: Status::Active,
            text_preview: String::new(),
        }
    }

    fn sample() -> KnowledgeIndex {
        let mut index = KnowledgeIndex::new(2, 1_000_000, "test-model");
        index.insert(&[0.0, 1.0], record("alpha")).unwrap();
        index.insert(&[1.0, 0.0], record("beta")).unwrap();
        index
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let index = sample();
        let ids: Vec<i64> = index.records().map(|r| r.id).collect();
        assert_eq!(ids, vec![1_000_000, 1_000_001]);
        assert_eq!(index.next_id(), 1_000_002);
        index.check_alignment().unwrap();
    }

    #[test]
    fn test_rejected_vector_consumes_no_id() {
        let mut index = sample();
        assert!(index.insert(&[1.0, 2.0, 3.0], record("gamma")).is_err());
        assert_eq!(index.len(), 2);
        assert_eq!(index.next_id(), 1_000_002);
        index.check_alignment().unwrap();
    }

    #[test]
    fn test_search_joins_metadata() {
        let index = sample();
        let hits = index.search(&[0.9, 0.1], 1).unwrap();
        assert_eq!(hits[0].0.title.as_deref(), Some("beta"));
    }

    #[test]
    fn test_store_roundtrip_and_swap() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());

        store.save(&sample()).unwrap();
        let mut loaded = store.load(2).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.next_id(), 1_000_002);
        assert_eq!(loaded.model(), "test-model");

        loaded.insert(&[0.5, 0.5], record("gamma")).unwrap();
        store.save(&loaded).unwrap();
        assert_eq!(store.load(2).unwrap().len(), 3);
        assert!(!dir.path().join("index.staging").exists());
        assert!(!dir.path().join("index.old").exists());
    }

    #[test]
    fn test_load_missing_index() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(store.load(2), Err(VaultError::IndexNotBuilt { .. })));
    }

    #[test]
    fn test_load_refuses_partial_index() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample()).unwrap();
        fs::remove_file(store.live_dir().join(METADATA_FILE)).unwrap();

        match store.load(2) {
            Err(VaultError::IndexNotBuilt { reason }) => assert!(reason.contains(METADATA_FILE)),
            other => panic!("expected IndexNotBuilt, got {:?}", other.map(|i| i.len())),
        }
    }

    #[test]
    fn test_load_rejects_dimension_change() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample()).unwrap();
        assert!(matches!(store.load(1536), Err(VaultError::IndexNotBuilt { .. })));
    }

    #[test]
    fn test_load_recovers_interrupted_swap() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample()).unwrap();
        fs::rename(store.live_dir(), dir.path().join("index.old")).unwrap();

        assert_eq!(store.load(2).unwrap().len(), 2);
    }
}
