//! Test doubles for the embedding and generation services, plus document fixtures.

use crate::embedding::{EmbeddingClient, EmbeddingClientError, HashEmbeddingClient};
use crate::generation::{GenerationClient, GenerationClientError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Hash embeddings that count how often the service is called.
pub(crate) struct CountingEmbeddingClient {
    inner: HashEmbeddingClient,
    calls: AtomicUsize,
}

impl CountingEmbeddingClient {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbeddingClient::new(dimension),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for CountingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_embeddings(texts).await
    }
}

/// Embeddings looked up from a fixed table; unknown text maps to `fallback`.
pub(crate) struct KeyedEmbeddingClient {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

impl KeyedEmbeddingClient {
    pub(crate) fn new(entries: &[(&str, Vec<f32>)], fallback: Vec<f32>) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            fallback,
        }
    }
}

#[async_trait]
impl EmbeddingClient for KeyedEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.fallback.clone())
            })
            .collect())
    }
}

/// Embedding service that always fails.
pub(crate) struct FailingEmbeddingClient;

#[async_trait]
impl EmbeddingClient for FailingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        _texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        Err(EmbeddingClientError::ProviderUnavailable(
            "embedding backend offline".into(),
        ))
    }
}

/// Embedding service that never answers in time.
pub(crate) struct StalledEmbeddingClient;

#[async_trait]
impl EmbeddingClient for StalledEmbeddingClient {
    async fn generate_embeddings(
        &self,
        _texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

/// Hash embeddings that hold any batch containing text starting with `held` until released.
pub(crate) struct GatedEmbeddingClient {
    inner: HashEmbeddingClient,
    held: Notify,
    release: Notify,
}

impl GatedEmbeddingClient {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbeddingClient::new(dimension),
            held: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Resolve once a held batch is waiting inside the service.
    pub(crate) async fn wait_until_held(&self) {
        self.held.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl EmbeddingClient for GatedEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.iter().any(|text| text.starts_with("held")) {
            self.held.notify_one();
            self.release.notified().await;
        }
        self.inner.generate_embeddings(texts).await
    }
}

/// Embedding service that drops the last vector of every batch.
pub(crate) struct ShortEmbeddingClient(pub(crate) usize);

#[async_trait]
impl EmbeddingClient for ShortEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let count = texts.len().saturating_sub(1);
        Ok(vec![vec![0.0; self.0]; count])
    }
}

/// Generation service returning a fixed answer and recording every prompt.
pub(crate) struct RecordingGenerationClient {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerationClient {
    pub(crate) fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log").clone()
    }
}

#[async_trait]
impl GenerationClient for RecordingGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationClientError> {
        self.prompts
            .lock()
            .expect("prompt log")
            .push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

/// Generation service that always fails.
pub(crate) struct FailingGenerationClient;

#[async_trait]
impl GenerationClient for FailingGenerationClient {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationClientError> {
        Err(GenerationClientError::GenerationFailed(
            "Ollama returned 503 Service Unavailable: overloaded".into(),
        ))
    }
}

/// Generation service that never answers in time.
pub(crate) struct StalledGenerationClient;

#[async_trait]
impl GenerationClient for StalledGenerationClient {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationClientError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

/// Single-page PDF drawing `words` in Courier on one line.
pub(crate) fn one_page_pdf(words: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(words)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}
