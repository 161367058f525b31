//! Coordinator sequencing extraction, indexing, retrieval, and answer generation.

use crate::{
    answer::AnswerGenerator,
    config::Config,
    embedding::embedding_client_for,
    extraction::FragmentExtractor,
    generation::generation_client_for,
    metrics::{MetricsSnapshot, PipelineMetrics},
    persistence::{
        InMemorySessionRepository, MessageRecord, NO_FILE_UPLOADED, SessionHistory, SessionRecord,
        SessionRepository, current_timestamp_rfc3339,
    },
    pipeline::types::{
        IngestCause, IngestOutcome, IngestStep, PipelineError, PipelineStats, QueryOutcome, SetupError,
    },
    protocol::{AgentId, Message, Payload},
    store::VectorStore,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_TOP_K: usize = 3;

/// Runs the ingest and query pipelines over one shared vector store.
///
/// Ingest: extract fragments, embed them, record the owning session, then append to the index.
/// Query: retrieve the session's nearest fragments, then ask the generator for a grounded answer.
/// Each run exchanges [`Message`]s under a single trace id. Construct once near process start and
/// share through an `Arc`.
pub struct PipelineCoordinator {
    extractor: FragmentExtractor,
    store: Arc<VectorStore>,
    answers: AnswerGenerator,
    sessions: Arc<dyn SessionRepository>,
    metrics: Arc<PipelineMetrics>,
    top_k: usize,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Index a document into a new session owned by `owning_user`.
    async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        owning_user: &str,
    ) -> Result<IngestOutcome, PipelineError>;

    /// Answer `query` within a session, after checking `owning_user` owns it.
    async fn ask(
        &self,
        owning_user: &str,
        query: &str,
        session_id: &str,
    ) -> Result<QueryOutcome, PipelineError>;

    /// Open a session without a document.
    async fn open_session(&self, owning_user: &str) -> Result<SessionRecord, PipelineError>;

    /// Every session of `owning_user` with its messages, newest first.
    async fn sessions_for(&self, owning_user: &str) -> Result<Vec<SessionHistory>, PipelineError>;

    /// One session of `owning_user` with its messages.
    async fn session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<SessionHistory, PipelineError>;

    /// Discard every indexed fragment of every session.
    async fn reset_session(&self) -> usize;

    /// Delete the sessions and messages of `owning_user`.
    async fn clear_history(&self, owning_user: &str) -> Result<usize, PipelineError>;

    /// Usage summary for `owning_user`.
    async fn stats(&self, owning_user: &str) -> Result<PipelineStats, PipelineError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl PipelineCoordinator {
    /// Assemble a coordinator from its stages.
    pub fn new(
        extractor: FragmentExtractor,
        store: Arc<VectorStore>,
        answers: AnswerGenerator,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            extractor,
            store,
            answers,
            sessions,
            metrics: Arc::new(PipelineMetrics::new()),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Retrieve `top_k` fragments per query.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Build the configured adapters, an empty store, and an in-memory session repository.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        tracing::info!(
            provider = ?config.embedding_provider,
            dimension = config.embedding_dimension,
            scope = ?config.retrieval_scope,
            "Initializing pipeline"
        );
        let timeout = config.service_timeout();
        let store = VectorStore::new(embedding_client_for(config)?, config.embedding_dimension)
            .with_scope(config.retrieval_scope)
            .with_timeout(timeout);
        let answers = AnswerGenerator::new(generation_client_for(config)?).with_timeout(timeout);
        let extractor = FragmentExtractor::new(config.fragment_chunk_size)?;

        Ok(Self::new(
            extractor,
            Arc::new(store),
            answers,
            Arc::new(InMemorySessionRepository::new()),
        )
        .with_top_k(config.search_top_k))
    }

    /// Shared vector store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Extract, embed, and index a document under a freshly allocated session.
    ///
    /// A failure before the index append leaves neither a session record nor store entries.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        owning_user: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        let session_id = Uuid::new_v4().to_string();
        let document_digest = document_digest(bytes);
        tracing::info!(
            filename,
            session_id = %session_id,
            bytes = bytes.len(),
            digest = %document_digest,
            "Processing upload"
        );

        let fragments = self.extract(bytes, filename).await?;
        let processed = Message::new(
            AgentId::Ingestion,
            AgentId::Retrieval,
            Payload::DocumentProcessed {
                filename: filename.to_string(),
                fragments,
            },
        );
        let trace_id = processed.trace_id().to_string();
        let stored = self.store_document(processed, &session_id, owning_user).await?;

        let kind = stored.kind();
        let Payload::ChunksStored {
            filename,
            stored_count,
            session_id,
        } = stored.into_payload()
        else {
            return Err(PipelineError::UnexpectedMessage(kind));
        };

        self.metrics.record_document(stored_count as u64);
        tracing::info!(
            trace_id = %trace_id,
            filename = %filename,
            session_id = %session_id,
            stored_count,
            "Document indexed"
        );
        Ok(IngestOutcome {
            session_id,
            filename,
            stored_count,
            trace_id,
            document_digest,
        })
    }

    /// Answer `query` from the fragments of `session_id`.
    ///
    /// A session without documents still gets an answer, prompting the user to upload some.
    pub async fn query(&self, query: &str, session_id: &str) -> Result<QueryOutcome, PipelineError> {
        let request = Message::new(
            AgentId::Coordinator,
            AgentId::Retrieval,
            Payload::Query {
                query: query.to_string(),
                session_id: session_id.to_string(),
            },
        );
        let trace_id = request.trace_id().to_string();
        tracing::info!(trace_id = %trace_id, session_id, "Processing query");
        if !self.sessions.contains_session(session_id).await? {
            return Err(PipelineError::SessionNotFound(session_id.to_string()));
        }

        let context = self.retrieve(request).await?;
        let response = self.answers.respond(context).await;

        match response.into_payload() {
            Payload::FinalResponse {
                query,
                answer,
                sources,
                session_id,
            } => {
                self.sessions
                    .append_message(MessageRecord {
                        message_id: Uuid::new_v4().to_string(),
                        session_id: session_id.clone(),
                        query: query.clone(),
                        answer: answer.clone(),
                        sources: sources.clone(),
                        timestamp: current_timestamp_rfc3339(),
                    })
                    .await?;
                self.metrics.record_answer();
                tracing::info!(
                    trace_id = %trace_id,
                    session_id = %session_id,
                    sources = sources.len(),
                    "Query answered"
                );
                Ok(QueryOutcome {
                    answer,
                    sources,
                    query,
                    session_id,
                    trace_id,
                })
            }
            Payload::Error { error, session_id } => {
                self.metrics.record_failure();
                tracing::error!(
                    trace_id = %trace_id,
                    session_id = %session_id,
                    error = %error,
                    "Query failed"
                );
                Err(PipelineError::Generation(error))
            }
            other => Err(PipelineError::UnexpectedMessage(other.kind())),
        }
    }

    /// Discard every indexed fragment of every session. Session records are kept.
    pub async fn reset_session(&self) -> usize {
        self.store.reset().await
    }

    /// Open a session without a document.
    pub async fn open_session(&self, owning_user: &str) -> Result<SessionRecord, PipelineError> {
        let record = SessionRecord::new(Uuid::new_v4().to_string(), owning_user, NO_FILE_UPLOADED);
        self.sessions.create_session(record.clone()).await?;
        tracing::info!(session_id = %record.session_id, "New chat session created");
        Ok(record)
    }

    /// Every session of `owning_user` with its messages, newest first.
    pub async fn sessions_for(
        &self,
        owning_user: &str,
    ) -> Result<Vec<SessionHistory>, PipelineError> {
        let sessions = self.sessions.list_sessions(owning_user).await?;
        let mut histories = Vec::with_capacity(sessions.len());
        for session in sessions {
            let messages = self.sessions.messages_for(&session.session_id).await?;
            histories.push(SessionHistory { session, messages });
        }
        tracing::debug!(sessions = histories.len(), "Fetched chat sessions");
        Ok(histories)
    }

    /// One session of `owning_user` with its messages.
    pub async fn session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<SessionHistory, PipelineError> {
        let session = self.owned_session(session_id, owning_user).await?;
        let messages = self.sessions.messages_for(session_id).await?;
        Ok(SessionHistory { session, messages })
    }

    /// Delete the sessions and messages of `owning_user`.
    ///
    /// Indexed fragments stay in the store until the next reset.
    pub async fn clear_history(&self, owning_user: &str) -> Result<usize, PipelineError> {
        let removed = self.sessions.clear_user(owning_user).await?;
        tracing::info!(removed, "Chat history cleared");
        Ok(removed)
    }

    /// Usage summary for `owning_user`.
    pub async fn stats(&self, owning_user: &str) -> Result<PipelineStats, PipelineError> {
        let sessions = self.sessions.list_sessions(owning_user).await?;
        let total_documents = sessions
            .iter()
            .filter(|session| session.has_document())
            .map(|session| session.filename.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let mut chat_history_count = 0;
        for session in &sessions {
            chat_history_count += self.sessions.messages_for(&session.session_id).await?.len();
        }
        Ok(PipelineStats {
            total_documents,
            total_chunks: self.store.len().await,
            chat_history_count,
        })
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn owned_session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<SessionRecord, PipelineError> {
        self.sessions
            .find_session(session_id, owning_user)
            .await?
            .ok_or_else(|| PipelineError::SessionNotFound(session_id.to_string()))
    }

    /// Parse on the blocking pool; PDF and Office parsing is CPU-bound.
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Vec<String>, PipelineError> {
        let extractor = self.extractor;
        let owned = bytes.to_vec();
        let name = filename.to_string();
        let fragments = tokio::task::spawn_blocking(move || extractor.extract(&owned, &name))
            .await
            .map_err(|error| ingest_failure(filename, IngestStep::Extraction, error))??;
        Ok(fragments)
    }

    async fn store_document(
        &self,
        message: Message,
        session_id: &str,
        owning_user: &str,
    ) -> Result<Message, PipelineError> {
        let kind = message.kind();
        let trace_id = message.trace_id().to_string();
        let Payload::DocumentProcessed {
            filename,
            fragments,
        } = message.into_payload()
        else {
            return Err(PipelineError::UnexpectedMessage(kind));
        };
        let batch = self
            .store
            .prepare(fragments, &filename, session_id)
            .await
            .map_err(|error| ingest_failure(&filename, IngestStep::Embedding, error))?;

        self.sessions
            .create_session(SessionRecord::new(session_id, owning_user, filename.clone()))
            .await
            .map_err(|error| ingest_failure(&filename, IngestStep::SessionRecord, error))?;

        let stored_count = self.store.commit(batch).await.map_err(|error| {
            tracing::error!(
                trace_id = %trace_id,
                session_id,
                error = %error,
                "Index append failed after the session was recorded"
            );
            ingest_failure(&filename, IngestStep::Indexing, error)
        })?;

        Ok(Message::in_trace(
            trace_id,
            AgentId::Retrieval,
            AgentId::Coordinator,
            Payload::ChunksStored {
                filename,
                stored_count,
                session_id: session_id.to_string(),
            },
        ))
    }

    async fn retrieve(&self, message: Message) -> Result<Message, PipelineError> {
        let kind = message.kind();
        let trace_id = message.trace_id().to_string();
        let Payload::Query { query, session_id } = message.into_payload() else {
            return Err(PipelineError::UnexpectedMessage(kind));
        };

        let fragments = self
            .store
            .search(&query, &session_id, self.top_k)
            .await
            .map_err(PipelineError::Retrieval)?;
        tracing::debug!(
            trace_id = %trace_id,
            session_id = %session_id,
            retrieved = fragments.len(),
            "Context retrieved"
        );

        Ok(Message::in_trace(
            trace_id,
            AgentId::Retrieval,
            AgentId::Answer,
            Payload::ContextResponse {
                query,
                session_id,
                fragments,
            },
        ))
    }
}

#[async_trait]
impl PipelineApi for PipelineCoordinator {
    async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        owning_user: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        PipelineCoordinator::ingest(self, bytes, filename, owning_user).await
    }

    async fn ask(
        &self,
        owning_user: &str,
        query: &str,
        session_id: &str,
    ) -> Result<QueryOutcome, PipelineError> {
        self.owned_session(session_id, owning_user).await?;
        PipelineCoordinator::query(self, query, session_id).await
    }

    async fn open_session(&self, owning_user: &str) -> Result<SessionRecord, PipelineError> {
        PipelineCoordinator::open_session(self, owning_user).await
    }

    async fn sessions_for(&self, owning_user: &str) -> Result<Vec<SessionHistory>, PipelineError> {
        PipelineCoordinator::sessions_for(self, owning_user).await
    }

    async fn session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<SessionHistory, PipelineError> {
        PipelineCoordinator::session(self, session_id, owning_user).await
    }

    async fn reset_session(&self) -> usize {
        PipelineCoordinator::reset_session(self).await
    }

    async fn clear_history(&self, owning_user: &str) -> Result<usize, PipelineError> {
        PipelineCoordinator::clear_history(self, owning_user).await
    }

    async fn stats(&self, owning_user: &str) -> Result<PipelineStats, PipelineError> {
        PipelineCoordinator::stats(self, owning_user).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PipelineCoordinator::metrics_snapshot(self)
    }
}

fn ingest_failure(filename: &str, step: IngestStep, cause: impl Into<IngestCause>) -> PipelineError {
    PipelineError::Ingest {
        filename: filename.to_string(),
        step,
        cause: cause.into(),
    }
}

/// Hex-encoded SHA-256 of a document's bytes.
pub fn document_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
