#![deny(missing_docs)]

//! Core library for the agentic RAG service.
//!
//! Uploaded documents are cut into fragments, embedded, and indexed per chat session; questions
//! are answered by a generative model from the nearest fragments of the asking session.

/// Grounded answer generation.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Document text extraction and fragment splitting.
pub mod extraction;
/// Generative model client abstraction and adapters.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Session and message storage.
pub mod persistence;
/// Ingest and query coordination.
pub mod pipeline;
/// Messages exchanged between pipeline stages.
pub mod protocol;
/// Fragment storage and nearest-neighbour search.
pub mod store;

#[cfg(test)]
mod testing;
