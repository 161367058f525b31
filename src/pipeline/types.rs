//! Outcomes and errors of the pipeline coordinator.

use crate::extraction::ExtractionError;
use crate::persistence::RepositoryError;
use crate::protocol::MessageType;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Ingest stage that can fail without a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStep {
    /// Running the parser off the async runtime.
    Extraction,
    /// Embedding the document's fragments.
    Embedding,
    /// Recording the session that owns the document.
    SessionRecord,
    /// Appending the embedded fragments to the index.
    Indexing,
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Extraction => "extraction",
            Self::Embedding => "embedding",
            Self::SessionRecord => "session record",
            Self::Indexing => "indexing",
        };
        f.write_str(label)
    }
}

/// Cause attached to an ingest failure.
#[derive(Debug, Error)]
pub enum IngestCause {
    /// Vector store rejected or failed the batch.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Session repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// The blocking parser task panicked or was cancelled.
    #[error("parser task did not finish: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Errors emitted by the pipeline coordinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document could not be parsed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// A later ingest stage failed; nothing was committed.
    #[error("Error processing {filename} during {step}: {cause}")]
    Ingest {
        /// Document being ingested.
        filename: String,
        /// Stage that failed.
        step: IngestStep,
        /// Underlying failure.
        #[source]
        cause: IngestCause,
    },
    /// Session does not exist or belongs to another user.
    #[error("Chat session not found: {0}")]
    SessionNotFound(String),
    /// Similarity search failed.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] StoreError),
    /// The generative model did not produce an answer.
    #[error("Answer generation failed: {0}")]
    Generation(String),
    /// Session storage failed outside of ingest.
    #[error("Session storage failed: {0}")]
    Repository(#[from] RepositoryError),
    /// A stage received a message it does not handle.
    #[error("Unexpected {0} message")]
    UnexpectedMessage(MessageType),
}

impl PipelineError {
    /// Whether the failure means internal state is broken rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::Retrieval(StoreError::InvariantViolation(_))
                | Self::UnexpectedMessage(_)
                | Self::Ingest {
                    cause: IngestCause::Store(StoreError::InvariantViolation(_)),
                    ..
                }
        )
    }
}

/// Acknowledgement of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Session created for the document.
    pub session_id: String,
    /// Uploaded document name.
    pub filename: String,
    /// Number of fragments indexed.
    pub stored_count: usize,
    /// Trace id shared by the ingest's messages.
    pub trace_id: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub document_digest: String,
}

/// Answer to a query together with the documents it drew on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    /// Model answer.
    pub answer: String,
    /// Distinct source filenames, sorted.
    pub sources: Vec<String>,
    /// Question text.
    pub query: String,
    /// Session the question was asked in.
    pub session_id: String,
    /// Trace id shared by the query's messages.
    pub trace_id: String,
}

/// Per-user usage summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Distinct document names the user uploaded.
    pub total_documents: usize,
    /// Fragments in the shared store, across every session.
    pub total_chunks: usize,
    /// Messages recorded across the user's sessions.
    pub chat_history_count: usize,
}

/// Errors raised while assembling a coordinator from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Embedding adapter could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingClientError),
    /// Generation adapter could not be built.
    #[error("Failed to initialize generation client: {0}")]
    Generation(#[from] crate::generation::GenerationClientError),
    /// Fragment size was rejected.
    #[error("Invalid fragment configuration: {0}")]
    Chunking(#[from] crate::extraction::ChunkingError),
}
