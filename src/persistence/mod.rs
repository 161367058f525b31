//! Durable chat sessions and their question/answer history.
//!
//! The pipeline only depends on [`SessionRepository`]; the bundled [`InMemorySessionRepository`]
//! keeps everything in process memory and is lost on restart.

mod memory;

pub use memory::InMemorySessionRepository;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Filename recorded for sessions opened without a document.
pub const NO_FILE_UPLOADED: &str = "No file uploaded";

/// Errors raised by session repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A session with the same id already exists.
    #[error("Session already exists: {0}")]
    DuplicateSession(String),
    /// A message referenced a session that does not exist.
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    /// Backing storage could not be reached.
    #[error("Session storage unavailable: {0}")]
    Unavailable(String),
}

/// Metadata of one chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Session id (UUID v4).
    #[serde(rename = "id")]
    pub session_id: String,
    /// User that owns the session.
    #[serde(rename = "user_id")]
    pub owning_user: String,
    /// Uploaded document, or [`NO_FILE_UPLOADED`].
    pub filename: String,
    /// Creation time, RFC3339.
    pub created_at: String,
}

impl SessionRecord {
    /// Record for a session created now.
    pub fn new(
        session_id: impl Into<String>,
        owning_user: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            owning_user: owning_user.into(),
            filename: filename.into(),
            created_at: current_timestamp_rfc3339(),
        }
    }

    /// Whether the session was created with an uploaded document.
    pub fn has_document(&self) -> bool {
        self.filename != NO_FILE_UPLOADED
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    /// Message id (UUID v4).
    #[serde(rename = "id")]
    pub message_id: String,
    /// Session the question was asked in.
    #[serde(skip)]
    pub session_id: String,
    /// Question text.
    pub query: String,
    /// Model answer.
    pub answer: String,
    /// Source filenames cited by the answer.
    pub sources: Vec<String>,
    /// Answer time, RFC3339.
    pub timestamp: String,
}

/// Session together with its messages, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHistory {
    /// Session metadata.
    #[serde(flatten)]
    pub session: SessionRecord,
    /// Messages recorded for the session.
    pub messages: Vec<MessageRecord>,
}

/// Storage for sessions and messages.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session.
    async fn create_session(&self, record: SessionRecord) -> Result<(), RepositoryError>;

    /// Append a message to an existing session.
    async fn append_message(&self, record: MessageRecord) -> Result<(), RepositoryError>;

    /// Session `session_id` if it exists and belongs to `owning_user`.
    async fn find_session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<Option<SessionRecord>, RepositoryError>;

    /// Whether any user has a session `session_id`.
    async fn contains_session(&self, session_id: &str) -> Result<bool, RepositoryError>;

    /// Sessions of `owning_user`, newest first.
    async fn list_sessions(&self, owning_user: &str) -> Result<Vec<SessionRecord>, RepositoryError>;

    /// Messages of `session_id`, oldest first.
    async fn messages_for(&self, session_id: &str) -> Result<Vec<MessageRecord>, RepositoryError>;

    /// Delete every session and message of `owning_user`, returning the number of sessions removed.
    async fn clear_user(&self, owning_user: &str) -> Result<usize, RepositoryError>;
}

/// Current UTC time formatted as RFC3339.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
