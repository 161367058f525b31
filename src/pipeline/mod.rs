//! Ingest and query orchestration over the shared vector store.

mod service;
mod types;

pub use service::{PipelineApi, PipelineCoordinator, document_digest};
pub use types::{
    IngestCause, IngestOutcome, IngestStep, PipelineError, PipelineStats, QueryOutcome,
    SetupError,
};
