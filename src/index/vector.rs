//! Exact (flat) vector index with squared Euclidean distance
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Id {0} is already present in the index")]
    DuplicateId(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt index file: {0}")]
    Corrupt(String),
}

/// A nearest-neighbor hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    /// Squared Euclidean distance to the query, lower is closer
    pub distance: f32,
}

/// Append-only store of fixed-length vectors keyed by id
///
/// Vectors are kept row-major in one contiguous buffer. Search is brute force, which
/// is exact and fast enough for snippet collections of this size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<i64>,
    data: Vec<f32>,
    #[serde(skip)]
    positions: AHashMap<i64, usize>,
}

impl VectorIndex {
    /// Create an empty index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
            positions: AHashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    /// Ids in insertion order
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn get(&self, id: i64) -> Option<&[f32]> {
        let row = *self.positions.get(&id)?;
        Some(&self.data[row * self.dimension..(row + 1) * self.dimension])
    }

    /// Insert a vector under `id`
    pub fn add(&mut self, id: i64, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.check_dimension(vector)?;
        if self.positions.contains_key(&id) {
            return Err(VectorIndexError::DuplicateId(id));
        }

        self.positions.insert(id, self.ids.len());
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// The `k` nearest vectors, closest first; equal distances order by id
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .ids
            .iter()
            .zip(self.data.chunks_exact(self.dimension))
            .map(|(&id, row)| Neighbor {
                id,
                distance: squared_l2(query, row),
            })
            .collect();

        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    /// Write the index as zstd-compressed bincode
    pub fn save(&self, path: &Path) -> Result<(), VectorIndexError> {
        let encoded =
            bincode::serialize(self).map_err(|e| VectorIndexError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(&encoded[..], 3)?;

        let mut file = fs::File::create(path)?;
        file.write_all(&compressed)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read an index written by [`VectorIndex::save`]
    pub fn load(path: &Path) -> Result<Self, VectorIndexError> {
        let compressed = fs::read(path)?;
        let encoded = zstd::decode_all(&compressed[..])
            .map_err(|e| VectorIndexError::Corrupt(e.to_string()))?;
        let mut index: VectorIndex = bincode::deserialize(&encoded)
            .map_err(|e| VectorIndexError::Corrupt(e.to_string()))?;

        if index.dimension == 0 || index.data.len() != index.ids.len() * index.dimension {
            return Err(VectorIndexError::Corrupt(format!(
                "{} ids but {} values for dimension {}",
                index.ids.len(),
                index.data.len(),
                index.dimension
            )));
        }

        index.positions = AHashMap::with_capacity(index.ids.len());
        for (row, &id) in index.ids.iter().enumerate() {
            if index.positions.insert(id, row).is_some() {
                return Err(VectorIndexError::Corrupt(format!("duplicate id {}", id)));
            }
        }

        Ok(index)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
