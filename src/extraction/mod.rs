//! Document-to-fragment conversion.
//!
//! [`FragmentExtractor`] picks a parsing strategy from the filename extension, pulls the plain
//! text out of the document bytes, and cuts it into fixed-size, non-overlapping fragments in
//! document order. Unknown extensions produce no text instead of an error.

mod formats;

use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub use formats::FormatError;

/// Characters per fragment when no override is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Parsing strategy selected for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Portable Document Format; page text is concatenated.
    Pdf,
    /// Word processing document; paragraphs are joined by newlines.
    Docx,
    /// Slide deck; text-bearing shapes are concatenated slide by slide.
    Pptx,
    /// Comma separated values rendered as an aligned text table.
    Csv,
    /// Plain text or markdown decoded as UTF-8.
    Text,
    /// Anything else; yields empty text.
    Unsupported,
}

impl DocumentKind {
    /// Select the strategy for `filename` from its (case-insensitive) extension.
    pub fn from_filename(filename: &str) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("docx") => Self::Docx,
            Some("pptx") => Self::Pptx,
            Some("csv") => Self::Csv,
            Some("txt" | "md") => Self::Text,
            _ => Self::Unsupported,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Csv => "csv",
            Self::Text => "text",
            Self::Unsupported => "unsupported",
        };
        f.pad(label)
    }
}

/// Raised when a document's bytes cannot be parsed by the strategy chosen for its extension.
#[derive(Debug, Error)]
#[error("Error processing {filename} as {kind}: {source}")]
pub struct ExtractionError {
    /// Name of the document that failed.
    pub filename: String,
    /// Strategy that rejected the bytes.
    pub kind: DocumentKind,
    /// Underlying parser failure.
    #[source]
    pub source: FormatError,
}

/// Errors produced while configuring fragment splitting.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A fragment must hold at least one character.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Converts raw document bytes into ordered text fragments.
#[derive(Debug, Clone, Copy)]
pub struct FragmentExtractor {
    chunk_size: usize,
}

impl Default for FragmentExtractor {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FragmentExtractor {
    /// Build an extractor cutting fragments of at most `chunk_size` characters.
    pub fn new(chunk_size: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    /// Maximum number of characters per fragment.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Extract the document text and split it into fragments.
    ///
    /// Returns an empty vector when the document has no extractable text.
    pub fn extract(&self, bytes: &[u8], filename: &str) -> Result<Vec<String>, ExtractionError> {
        let text = self.extract_text(bytes, filename)?;
        let fragments = split_fragments(&text, self.chunk_size);
        tracing::debug!(
            filename,
            characters = text.chars().count(),
            fragments = fragments.len(),
            chunk_size = self.chunk_size,
            "Document split into fragments"
        );
        Ok(fragments)
    }

    /// Extract the full document text without splitting.
    pub fn extract_text(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractionError> {
        let kind = DocumentKind::from_filename(filename);
        let result = match kind {
            DocumentKind::Pdf => formats::pdf_text(bytes),
            DocumentKind::Docx => formats::docx_text(bytes),
            DocumentKind::Pptx => formats::pptx_text(bytes),
            DocumentKind::Csv => formats::csv_text(bytes),
            DocumentKind::Text => formats::plain_text(bytes),
            DocumentKind::Unsupported => {
                tracing::debug!(filename, "Unsupported extension; treating as empty document");
                Ok(String::new())
            }
        };

        result.map_err(|source| {
            tracing::warn!(filename, %kind, error = %source, "Document extraction failed");
            ExtractionError {
                filename: filename.to_string(),
                kind,
                source,
            }
        })
    }
}

/// Cut `text` into consecutive slices of at most `chunk_size` characters.
///
/// Slicing happens on character boundaries, so multi-byte text never splits inside a code point.
/// `chunk_size` must be non-zero.
pub fn split_fragments(text: &str, chunk_size: usize) -> Vec<String> {
    debug_assert!(chunk_size > 0);
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_size {
            fragments.push(text[start..offset].to_string());
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        fragments.push(text[start..].to_string());
    }

    fragments
}
