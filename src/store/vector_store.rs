//! Shared fragment/embedding store guarded by a single lock.
//!
//! Fragments, their embeddings, and the index are parallel: position `i` in each refers to the
//! same fragment. Embedding happens before the lock is taken; the write lock only covers the
//! append, so a failed or slow embedding call never leaves a partial batch behind.

use super::index::{FlatL2Index, Neighbor};
use super::types::{Fragment, ScoredFragment, StoreCounts, StoreError};
use crate::config::RetrievalScope;
use crate::embedding::EmbeddingClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Embedded fragments of one document, ready to be committed.
#[derive(Debug)]
pub struct PreparedBatch {
    filename: String,
    session_id: String,
    texts: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug)]
struct StoreState {
    fragments: Vec<Fragment>,
    embeddings: Vec<Vec<f32>>,
    index: FlatL2Index,
    sessions: HashMap<String, Vec<usize>>,
}

impl StoreState {
    fn new(dimension: usize) -> Self {
        Self {
            fragments: Vec::new(),
            embeddings: Vec::new(),
            index: FlatL2Index::new(dimension),
            sessions: HashMap::new(),
        }
    }

    fn counts(&self) -> StoreCounts {
        StoreCounts {
            fragments: self.fragments.len(),
            embeddings: self.embeddings.len(),
            indexed: self.index.len(),
        }
    }

    fn ensure_consistent(&self) -> Result<(), StoreError> {
        let counts = self.counts();
        if counts.is_consistent() {
            Ok(())
        } else {
            tracing::error!(?counts, "Fragment, embedding, and index stores diverged");
            Err(StoreError::InvariantViolation(format!(
                "{} fragments, {} embeddings, {} indexed vectors",
                counts.fragments, counts.embeddings, counts.indexed
            )))
        }
    }

    fn resolve(&self, neighbors: Vec<Neighbor>) -> Result<Vec<ScoredFragment>, StoreError> {
        neighbors
            .into_iter()
            .map(|neighbor| {
                self.fragments
                    .get(neighbor.position)
                    .map(|fragment| ScoredFragment {
                        fragment: fragment.clone(),
                        distance: neighbor.distance,
                    })
                    .ok_or_else(|| {
                        StoreError::InvariantViolation(format!(
                            "index returned position {} beyond {} fragments",
                            neighbor.position,
                            self.fragments.len()
                        ))
                    })
            })
            .collect()
    }
}

/// Owns every indexed fragment and answers session-scoped similarity queries.
///
/// Share one instance across request handlers through an `Arc`.
pub struct VectorStore {
    embedding_client: Arc<dyn EmbeddingClient>,
    dimension: usize,
    scope: RetrievalScope,
    timeout: Duration,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(embedding_client: Arc<dyn EmbeddingClient>, dimension: usize) -> Self {
        Self {
            embedding_client,
            dimension,
            scope: RetrievalScope::default(),
            timeout: DEFAULT_TIMEOUT,
            state: RwLock::new(StoreState::new(dimension)),
        }
    }

    /// Choose how searches are restricted to a session.
    pub fn with_scope(mut self, scope: RetrievalScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bound every embedding call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Embed and index `fragments` under `session_id`, returning how many were stored.
    ///
    /// Nothing is stored unless every fragment was embedded successfully.
    pub async fn add(
        &self,
        fragments: Vec<String>,
        filename: &str,
        session_id: &str,
    ) -> Result<usize, StoreError> {
        let batch = self.prepare(fragments, filename, session_id).await?;
        self.commit(batch).await
    }

    /// Embed `fragments` in one batched call without touching the store.
    pub async fn prepare(
        &self,
        fragments: Vec<String>,
        filename: &str,
        session_id: &str,
    ) -> Result<PreparedBatch, StoreError> {
        let embeddings = if fragments.is_empty() {
            Vec::new()
        } else {
            self.embed(fragments.clone()).await?
        };

        tracing::debug!(
            filename,
            session_id,
            fragments = fragments.len(),
            "Prepared fragment embeddings"
        );

        Ok(PreparedBatch {
            filename: filename.to_string(),
            session_id: session_id.to_string(),
            texts: fragments,
            embeddings,
        })
    }

    /// Append a prepared batch contiguously and make it searchable.
    pub async fn commit(&self, batch: PreparedBatch) -> Result<usize, StoreError> {
        let PreparedBatch {
            filename,
            session_id,
            texts,
            embeddings,
        } = batch;
        let count = texts.len();

        let mut state = self.state.write().await;
        state.ensure_consistent()?;
        state
            .index
            .add(&embeddings)
            .map_err(|error| StoreError::InvariantViolation(error.to_string()))?;

        let start = state.fragments.len();
        state.fragments.extend(texts.into_iter().map(|text| Fragment {
            text,
            source_filename: filename.clone(),
            session_id: session_id.clone(),
        }));
        state.embeddings.extend(embeddings);
        if count > 0 {
            state
                .sessions
                .entry(session_id.clone())
                .or_default()
                .extend(start..start + count);
        }
        state.ensure_consistent()?;

        tracing::info!(
            filename = %filename,
            session_id = %session_id,
            stored = count,
            total = state.fragments.len(),
            "Fragments indexed"
        );
        Ok(count)
    }

    /// Nearest fragments of `session_id` to `query`, closest first.
    pub async fn search(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> Result<Vec<Fragment>, StoreError> {
        Ok(self
            .search_scored(query, session_id, k)
            .await?
            .into_iter()
            .map(|hit| hit.fragment)
            .collect())
    }

    /// Same as [`VectorStore::search`] with each fragment's distance attached.
    ///
    /// Under [`RetrievalScope::Global`] the `k` nearest fragments are chosen across all sessions
    /// and then filtered, so fewer than `k` (or none) may come back even when the session holds
    /// relevant text. [`RetrievalScope::Session`] ranks only the session's own fragments.
    pub async fn search_scored(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> Result<Vec<ScoredFragment>, StoreError> {
        {
            let state = self.state.read().await;
            if state.fragments.is_empty() {
                tracing::debug!(session_id, "Store is empty; skipping query embedding");
                return Ok(Vec::new());
            }
            if self.scope == RetrievalScope::Session && !state.sessions.contains_key(session_id) {
                tracing::debug!(session_id, "Session has no fragments; skipping query embedding");
                return Ok(Vec::new());
            }
        }

        let mut vectors = self.embed(vec![query.to_string()]).await?;
        let query_vector = vectors.pop().unwrap_or_default();

        let state = self.state.read().await;
        let neighbors = match self.scope {
            RetrievalScope::Global => state
                .index
                .search(&query_vector, k)
                .map_err(|error| StoreError::InvariantViolation(error.to_string()))?,
            RetrievalScope::Session => {
                let candidates = state
                    .sessions
                    .get(session_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                state
                    .index
                    .search_within(&query_vector, candidates, k)
                    .map_err(|error| StoreError::InvariantViolation(error.to_string()))?
            }
        };
        let considered = neighbors.len();

        let hits: Vec<ScoredFragment> = state
            .resolve(neighbors)?
            .into_iter()
            .filter(|hit| hit.fragment.session_id == session_id)
            .collect();

        tracing::debug!(
            session_id,
            k,
            scope = ?self.scope,
            considered,
            returned = hits.len(),
            "Similarity search completed"
        );
        Ok(hits)
    }

    /// Drop every fragment of every session and start from an empty index.
    ///
    /// Returns how many fragments were discarded.
    pub async fn reset(&self) -> usize {
        let mut state = self.state.write().await;
        let cleared = state.fragments.len();
        *state = StoreState::new(self.dimension);
        tracing::info!(cleared, "Vector store reset");
        cleared
    }

    /// Total number of stored fragments across sessions.
    pub async fn len(&self) -> usize {
        self.state.read().await.fragments.len()
    }

    /// Whether the store holds no fragments.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.fragments.is_empty()
    }

    /// Number of fragments stored under `session_id`.
    pub async fn session_len(&self, session_id: &str) -> usize {
        self.state
            .read()
            .await
            .sessions
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// Current fragment, embedding, and index sizes.
    pub async fn counts(&self) -> StoreCounts {
        self.state.read().await.counts()
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, StoreError> {
        let expected = texts.len();
        let vectors = tokio::time::timeout(
            self.timeout,
            self.embedding_client.generate_embeddings(texts),
        )
        .await
        .map_err(|_| {
            tracing::warn!(timeout = ?self.timeout, "Embedding request timed out");
            StoreError::Timeout(self.timeout)
        })??;

        if vectors.len() != expected {
            return Err(StoreError::EmbeddingCountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != self.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CountingEmbeddingClient, FailingEmbeddingClient, GatedEmbeddingClient,
        KeyedEmbeddingClient, ShortEmbeddingClient, StalledEmbeddingClient,
    };

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn search_on_empty_store_skips_embedding() {
        let client = Arc::new(CountingEmbeddingClient::new(8));
        let store = VectorStore::new(client.clone(), 8).with_scope(RetrievalScope::Global);

        let hits = store.search("anything", "s1", 3).await.expect("search");

        assert!(hits.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn add_batches_one_embedding_call_and_keeps_stores_parallel() {
        let client = Arc::new(CountingEmbeddingClient::new(8));
        let store = VectorStore::new(client.clone(), 8);
        assert!(store.counts().await.is_consistent());

        let stored = store
            .add(texts(&["one", "two", "three"]), "doc.txt", "s1")
            .await
            .expect("add");

        assert_eq!(stored, 3);
        assert_eq!(client.calls(), 1);
        let counts = store.counts().await;
        assert!(counts.is_consistent());
        assert_eq!(counts.fragments, 3);
        assert_eq!(store.session_len("s1").await, 3);
    }

    #[tokio::test]
    async fn adding_nothing_stores_nothing_and_calls_nothing() {
        let client = Arc::new(CountingEmbeddingClient::new(8));
        let store = VectorStore::new(client.clone(), 8);

        let stored = store.add(Vec::new(), "empty.txt", "s1").await.expect("add");

        assert_eq!(stored, 0);
        assert_eq!(client.calls(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn exact_text_query_matches_at_zero_distance() {
        let store = VectorStore::new(Arc::new(CountingEmbeddingClient::new(16)), 16);
        store
            .add(texts(&["the quarterly revenue grew"]), "report.txt", "s1")
            .await
            .expect("add");

        let hits = store
            .search_scored("the quarterly revenue grew", "s1", 3)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fragment.text, "the quarterly revenue grew");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn failed_embedding_commits_nothing() {
        let store = VectorStore::new(Arc::new(FailingEmbeddingClient), 4);

        let error = store
            .add(texts(&["a", "b"]), "doc.txt", "s1")
            .await
            .unwrap_err();

        assert!(matches!(error, StoreError::Embedding(_)));
        assert_eq!(store.counts().await, StoreCounts::default());
    }

    #[tokio::test]
    async fn embedding_timeout_commits_nothing() {
        let store = VectorStore::new(Arc::new(StalledEmbeddingClient), 4)
            .with_timeout(Duration::from_millis(20));

        let error = store.add(texts(&["a"]), "doc.txt", "s1").await.unwrap_err();

        assert!(matches!(error, StoreError::Timeout(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn short_embedding_batches_are_rejected() {
        let store = VectorStore::new(Arc::new(ShortEmbeddingClient(4)), 4);

        let error = store
            .add(texts(&["a", "b", "c"]), "doc.txt", "s1")
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            StoreError::EmbeddingCountMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let store = VectorStore::new(Arc::new(CountingEmbeddingClient::new(8)), 4);
        let error = store.add(texts(&["a"]), "doc.txt", "s1").await.unwrap_err();
        assert!(matches!(
            error,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
    }

    #[tokio::test]
    async fn reset_clears_every_session() {
        let store = VectorStore::new(Arc::new(CountingEmbeddingClient::new(8)), 8);
        store.add(texts(&["alpha"]), "a.txt", "s1").await.expect("add");
        store.add(texts(&["beta"]), "b.txt", "s2").await.expect("add");

        assert_eq!(store.reset().await, 2);

        assert!(store.search("alpha", "s1", 3).await.expect("search").is_empty());
        assert!(store.search("beta", "s2", 3).await.expect("search").is_empty());
        assert_eq!(store.session_len("s1").await, 0);
        assert!(store.counts().await.is_consistent());
    }

    fn crowded_store(scope: RetrievalScope) -> VectorStore {
        let client = KeyedEmbeddingClient::new(
            &[
                ("apples are red", vec![10.0, 10.0]),
                ("near one", vec![0.0, 0.1]),
                ("near two", vec![0.0, 0.2]),
                ("near three", vec![0.0, 0.3]),
                ("what colour are apples?", vec![0.0, 0.0]),
            ],
            vec![50.0, 50.0],
        );
        VectorStore::new(Arc::new(client), 2).with_scope(scope)
    }

    #[tokio::test]
    async fn session_scope_ranks_only_the_sessions_fragments() {
        let store = crowded_store(RetrievalScope::Session);
        store
            .add(texts(&["apples are red"]), "fruit.txt", "s1")
            .await
            .expect("add");
        store
            .add(texts(&["near one", "near two", "near three"]), "other.txt", "s2")
            .await
            .expect("add");

        let hits = store
            .search("what colour are apples?", "s1", 3)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|hit| hit.source_filename == "fruit.txt"));
    }

    #[tokio::test]
    async fn global_scope_post_filter_can_starve_a_session() {
        let store = crowded_store(RetrievalScope::Global);
        store
            .add(texts(&["apples are red"]), "fruit.txt", "s1")
            .await
            .expect("add");
        store
            .add(texts(&["near one", "near two", "near three"]), "other.txt", "s2")
            .await
            .expect("add");

        let hits = store
            .search("what colour are apples?", "s1", 3)
            .await
            .expect("search");

        // Other sessions never leak through, but the three closer fragments crowd s1 out.
        assert!(hits.iter().all(|hit| hit.session_id == "s1"));
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_stay_contiguous() {
        let store = Arc::new(VectorStore::new(Arc::new(CountingEmbeddingClient::new(8)), 8));
        let mut handles = Vec::new();
        for session in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<String> = (0..5).map(|i| format!("s{session}-{i}")).collect();
                store
                    .add(batch, "doc.txt", &format!("s{session}"))
                    .await
                    .expect("add")
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("join"), 5);
        }

        let state = store.state.read().await;
        assert!(state.counts().is_consistent());
        for positions in state.sessions.values() {
            assert_eq!(positions.len(), 5);
            assert!(positions.windows(2).all(|pair| pair[1] == pair[0] + 1));
            let first = &state.fragments[positions[0]];
            assert!(first.text.ends_with("-0"));
        }
    }

    #[tokio::test]
    async fn readers_proceed_while_an_embedding_is_pending() {
        let client = Arc::new(GatedEmbeddingClient::new(8));
        let store = Arc::new(VectorStore::new(client.clone(), 8));
        store
            .add(texts(&["ready"]), "a.txt", "s1")
            .await
            .expect("add");

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.add(texts(&["held back"]), "b.txt", "s2").await }
        });
        client.wait_until_held().await;

        let hits = tokio::time::timeout(Duration::from_secs(1), store.search("ready", "s1", 3))
            .await
            .expect("search finished while the embedding was pending")
            .expect("search");
        assert_eq!(hits.len(), 1);
        let len = tokio::time::timeout(Duration::from_secs(1), store.len())
            .await
            .expect("len finished while the embedding was pending");
        assert_eq!(len, 1);
        assert!(!pending.is_finished());

        client.release();
        assert_eq!(pending.await.expect("join").expect("add"), 1);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.session_len("s2").await, 1);
    }
}
