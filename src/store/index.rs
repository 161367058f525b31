//! Append-only exact nearest-neighbour index over squared Euclidean distance.
//!
//! Vectors live in one flat buffer; the internal id of a vector is its insertion position.
//! Search is brute force with a bounded max-heap, so results are exact.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;

/// Errors raised when inserting into or querying the index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was built for.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

/// One search hit: the position of the stored vector and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion position of the vector (equals its fragment position).
    pub position: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        // NaN compares equal; ties resolve toward the earlier insertion.
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.position.cmp(&other.position))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Flat L2 index; vectors can be appended but never removed individually.
#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that every vector matches the index dimension without mutating anything.
    pub fn validate(&self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        match vectors.iter().find(|vector| vector.len() != self.dimension) {
            Some(vector) => Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }),
            None => Ok(()),
        }
    }

    /// Append `vectors` in order. Either all are added or none are.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        self.validate(vectors)?;
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// The `k` nearest stored vectors to `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.search_positions(query, 0..self.len(), k)
    }

    /// The `k` nearest vectors among `candidates` (positions), closest first.
    ///
    /// Positions outside the index are ignored.
    pub fn search_within(
        &self,
        query: &[f32],
        candidates: &[usize],
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.search_positions(query, candidates.iter().copied(), k)
    }

    fn search_positions(
        &self,
        query: &[f32],
        positions: impl IntoIterator<Item = usize>,
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for position in positions {
            let Some(vector) = self.vector(position) else {
                continue;
            };
            let candidate = Neighbor {
                position,
                distance: squared_l2(query, vector),
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        Ok(heap.into_sorted_vec())
    }

    fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.data.get(start..end)
    }
}

/// Squared Euclidean distance between two equally sized vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
