//! Flat Vector Index.
//!
//! Exact, brute-force k-nearest-neighbour search over fixed-dimension `f32`
//! vectors held in one contiguous buffer.  Positions are dense: the vector
//! at position `p` occupies `data[p * d .. (p + 1) * d]`, and removing a
//! vector shifts every later position down by one.
//!
//! # Metric
//!
//! Distances are **cosine distances**, `1 − cos(a, b)`, in `[0.0, 2.0]`.
//! Lower is closer; `0.0` means the vectors point the same way.  Use
//! [`Neighbor::similarity`] to convert back to cosine similarity.
//!
//! # Example
//!
//! ```rust
//! use recall_memory::index::FlatIndex;
//!
//! let mut index = FlatIndex::new();
//! index.insert(&[1.0, 0.0]).unwrap();
//! index.insert(&[0.0, 1.0]).unwrap();
//!
//! let hits = index.search(&[0.9, 0.1], 1).unwrap();
//! assert_eq!(hits[0].position, 0);
//! ```

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vector index operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vectors must be non-empty")]
    EmptyVector,
    #[error("position {position} out of range (index holds {len} vectors)")]
    PositionOutOfRange { position: usize, len: usize },
}

// ─────────────────────────────────────────────────────────────────────────────
// Cosine similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Neighbor
// ─────────────────────────────────────────────────────────────────────────────

/// A single k-NN match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the matched vector inside the index.
    pub position: usize,
    /// Cosine distance to the query (lower is closer).
    pub distance: f32,
}

impl Neighbor {
    /// Cosine similarity to the query (higher is closer).
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FlatIndex
// ─────────────────────────────────────────────────────────────────────────────

/// Exact nearest-neighbour index over vectors of one fixed dimension.
///
/// The dimension is either supplied up front via
/// [`with_dimension`][FlatIndex::with_dimension] or fixed by the first
/// [`insert`][FlatIndex::insert].  Once fixed it never changes, even if every
/// vector is later removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index whose dimension is discovered on first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with a known dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            data: Vec::new(),
        }
    }

    /// Rebuild an index from a raw row-major buffer.
    ///
    /// `data.len()` must be a multiple of `dimension`.
    pub fn from_raw(dimension: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::EmptyVector);
        }
        if data.len() % dimension != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: data.len() % dimension,
            });
        }
        Ok(Self {
            dimension: Some(dimension),
            data,
        })
    }

    /// The fixed dimension, or `None` if no vector has been inserted yet.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of vectors stored.
    pub fn len(&self) -> usize {
        match self.dimension {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    /// Returns `true` if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw row-major vector buffer.
    pub fn raw(&self) -> &[f32] {
        &self.data
    }

    /// Verify that `vector` is acceptable for this index without mutating it.
    pub fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(IndexError::DimensionMismatch {
                expected,
                got: vector.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Append `vector` and return its position.
    pub fn insert(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        self.check_dimension(vector)?;
        let position = self.len();
        self.dimension.get_or_insert(vector.len());
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Overwrite the vector at `position` in place.
    pub fn update(&mut self, position: usize, vector: &[f32]) -> Result<(), IndexError> {
        self.check_dimension(vector)?;
        let range = self.slot(position)?;
        self.data[range].copy_from_slice(vector);
        Ok(())
    }

    /// Return a copy of the vector stored at `position`.
    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        let range = self.slot(position)?;
        Ok(self.data[range].to_vec())
    }

    /// Remove the vector at `position`; every later vector moves down by one.
    pub fn remove_and_compact(&mut self, position: usize) -> Result<(), IndexError> {
        let range = self.slot(position)?;
        self.data.drain(range);
        Ok(())
    }

    /// Return up to `k` nearest vectors ordered by increasing distance.
    ///
    /// Ties are broken by ascending position.  An empty index yields an empty
    /// result rather than an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.search_where(query, k, |_| true)
    }

    /// Like [`search`][Self::search] but only positions for which `accept`
    /// returns `true` are ranked.
    pub fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        accept: F,
    ) -> Result<Vec<Neighbor>, IndexError>
    where
        F: Fn(usize) -> bool,
    {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;
        let d = query.len();

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(d)
            .enumerate()
            .filter(|(position, _)| accept(*position))
            .map(|(position, stored)| Neighbor {
                position,
                distance: 1.0 - cosine_similarity(stored, query),
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn slot(&self, position: usize) -> Result<std::ops::Range<usize>, IndexError> {
        let len = self.len();
        if position >= len {
            return Err(IndexError::PositionOutOfRange { position, len });
        }
        // len > 0 implies the dimension is known.
        let d = self.dimension.unwrap_or(0);
        Ok(position * d..(position + 1) * d)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── cosine_similarity ────────────────────────────────────────────────────

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_returns_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    // ── insert ───────────────────────────────────────────────────────────────

    #[test]
    fn first_insert_fixes_dimension() {
        let mut index = FlatIndex::new();
        assert_eq!(index.dimension(), None);
        assert_eq!(index.insert(&[1.0, 2.0, 3.0]).unwrap(), 0);
        assert_eq!(index.dimension(), Some(3));
        assert_eq!(index.insert(&[0.0, 0.0, 1.0]).unwrap(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn insert_rejects_dimension_mismatch() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        let err = index.insert(&[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 2, got: 3 });
        assert!(err.to_string().contains("dimension mismatch"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn insert_rejects_empty_vector() {
        let mut index = FlatIndex::new();
        assert_eq!(index.insert(&[]).unwrap_err(), IndexError::EmptyVector);
        assert_eq!(index.dimension(), None);
    }

    // ── search ───────────────────────────────────────────────────────────────

    #[test]
    fn search_empty_index_returns_empty() {
        let index = FlatIndex::new();
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn search_orders_by_increasing_distance() {
        let mut index = FlatIndex::new();
        index.insert(&[0.0, 1.0]).unwrap();
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[1.0, 1.0]).unwrap();

        let hits = index.search(&[1.0, 0.1], 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn search_returns_fewer_than_k_when_small() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 1);
    }

    #[test]
    fn search_breaks_ties_by_position() {
        let mut index = FlatIndex::new();
        index.insert(&[2.0, 0.0]).unwrap();
        index.insert(&[1.0, 0.0]).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn search_where_skips_rejected_positions() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[0.9, 0.1]).unwrap();
        let hits = index.search_where(&[1.0, 0.0], 1, |p| p != 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 1);
    }

    #[test]
    fn search_rejects_query_of_wrong_dimension() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn identical_vector_has_similarity_one() {
        let mut index = FlatIndex::new();
        index.insert(&[0.3, 0.4]).unwrap();
        let hit = index.search(&[0.3, 0.4], 1).unwrap()[0];
        assert!((hit.similarity() - 1.0).abs() < 1e-6);
        assert!(hit.distance.abs() < 1e-6);
    }

    // ── reconstruct / update / remove ────────────────────────────────────────

    #[test]
    fn reconstruct_returns_stored_vector() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 2.0]).unwrap();
        index.insert(&[3.0, 4.0]).unwrap();
        assert_eq!(index.reconstruct(1).unwrap(), vec![3.0, 4.0]);
        assert!(matches!(
            index.reconstruct(2),
            Err(IndexError::PositionOutOfRange { position: 2, len: 2 })
        ));
    }

    #[test]
    fn remove_and_compact_shifts_later_positions() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[0.0, 1.0]).unwrap();
        index.insert(&[1.0, 1.0]).unwrap();

        index.remove_and_compact(0).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.reconstruct(0).unwrap(), vec![0.0, 1.0]);
        assert_eq!(index.reconstruct(1).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn remove_last_vector_keeps_dimension() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        index.remove_and_compact(0).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), Some(2));
        assert!(index.insert(&[1.0]).is_err());
    }

    #[test]
    fn update_overwrites_in_place() {
        let mut index = FlatIndex::new();
        index.insert(&[1.0, 0.0]).unwrap();
        index.insert(&[0.0, 1.0]).unwrap();
        index.update(0, &[0.5, 0.5]).unwrap();
        assert_eq!(index.reconstruct(0).unwrap(), vec![0.5, 0.5]);
        assert_eq!(index.reconstruct(1).unwrap(), vec![0.0, 1.0]);
        assert!(index.update(0, &[1.0, 2.0, 3.0]).is_err());
    }

    // ── from_raw ─────────────────────────────────────────────────────────────

    #[test]
    fn from_raw_validates_buffer_length() {
        let index = FlatIndex::from_raw(2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 2);
        assert!(FlatIndex::from_raw(2, vec![1.0, 0.0, 0.0]).is_err());
        assert!(FlatIndex::from_raw(0, vec![]).is_err());
    }
}
