use super::{MessageRecord, RepositoryError, SessionRecord, SessionRepository};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    // Insertion order doubles as creation order.
    sessions: Vec<SessionRecord>,
    messages: Vec<MessageRecord>,
}

/// Process-local repository; contents are lost on restart.
#[derive(Default)]
pub struct InMemorySessionRepository {
    tables: RwLock<Tables>,
}

impl InMemorySessionRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_session(&self, record: SessionRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables
            .sessions
            .iter()
            .any(|existing| existing.session_id == record.session_id)
        {
            return Err(RepositoryError::DuplicateSession(record.session_id));
        }
        tables.sessions.push(record);
        Ok(())
    }

    async fn append_message(&self, record: MessageRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables
            .sessions
            .iter()
            .any(|session| session.session_id == record.session_id)
        {
            return Err(RepositoryError::UnknownSession(record.session_id));
        }
        tables.messages.push(record);
        Ok(())
    }

    async fn find_session(
        &self,
        session_id: &str,
        owning_user: &str,
    ) -> Result<Option<SessionRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .find(|session| session.session_id == session_id && session.owning_user == owning_user)
            .cloned())
    }

    async fn contains_session(&self, session_id: &str) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .any(|session| session.session_id == session_id))
    }

    async fn list_sessions(&self, owning_user: &str) -> Result<Vec<SessionRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .rev()
            .filter(|session| session.owning_user == owning_user)
            .cloned()
            .collect())
    }

    async fn messages_for(&self, session_id: &str) -> Result<Vec<MessageRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|message| message.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn clear_user(&self, owning_user: &str) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write().await;
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.sessions)
            .into_iter()
            .partition(|session| session.owning_user == owning_user);
        tables.sessions = kept;
        tables.messages.retain(|message| {
            !removed
                .iter()
                .any(|session| session.session_id == message.session_id)
        });
        Ok(removed.len())
    }
}
