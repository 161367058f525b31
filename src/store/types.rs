//! Fragment records and store error definitions.

use crate::embedding::EmbeddingClientError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Contiguous slice of extracted document text, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Fragment text.
    pub text: String,
    /// Name of the uploaded document the text came from.
    pub source_filename: String,
    /// Session the fragment was ingested under.
    pub session_id: String,
}

/// Fragment returned by a search together with its squared Euclidean distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFragment {
    /// Matched fragment.
    pub fragment: Fragment,
    /// Squared Euclidean distance between query and fragment embeddings.
    pub distance: f32,
}

/// Fragment and vector counts, which must always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreCounts {
    /// Stored fragments.
    pub fragments: usize,
    /// Stored embeddings.
    pub embeddings: usize,
    /// Vectors searchable through the index.
    pub indexed: usize,
}

impl StoreCounts {
    /// Whether fragments, embeddings, and indexed vectors are in lockstep.
    pub fn is_consistent(&self) -> bool {
        self.fragments == self.embeddings && self.embeddings == self.indexed
    }
}

/// Errors emitted by the vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Embedding provider failed to produce vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider did not answer within the configured bound.
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
    /// Provider returned a different number of vectors than texts supplied.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Returned embedding dimension does not match the index.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
    /// Fragment, embedding, and index stores disagree. Not recoverable.
    #[error("Vector store invariant violated: {0}")]
    InvariantViolation(String),
}
