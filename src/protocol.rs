//! Typed messages exchanged between pipeline stages.
//!
//! Every message carries a trace id; all messages produced while handling one upload or one
//! query share the same id so their log lines can be correlated. The payload variant decides the
//! message type, so a message can never claim one type while carrying another type's payload.

use crate::store::Fragment;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Pipeline stage that sends or receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentId {
    /// Turns uploaded bytes into fragments.
    #[serde(rename = "IngestionAgent")]
    Ingestion,
    /// Owns the vector store.
    #[serde(rename = "RetrievalAgent")]
    Retrieval,
    /// Phrases answers with the generative model.
    #[serde(rename = "LLMResponseAgent")]
    Answer,
    /// Sequences the other stages.
    #[serde(rename = "CoordinatorAgent")]
    Coordinator,
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ingestion => "IngestionAgent",
            Self::Retrieval => "RetrievalAgent",
            Self::Answer => "LLMResponseAgent",
            Self::Coordinator => "CoordinatorAgent",
        };
        f.write_str(name)
    }
}

/// Kind of a message, derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// A document was converted into fragments.
    DocumentProcessed,
    /// Fragments were embedded and indexed.
    ChunksStored,
    /// A question to answer within a session.
    Query,
    /// Retrieved fragments for a question.
    ContextResponse,
    /// A generated answer.
    FinalResponse,
    /// A stage failed.
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DocumentProcessed => "DOCUMENT_PROCESSED",
            Self::ChunksStored => "CHUNKS_STORED",
            Self::Query => "QUERY",
            Self::ContextResponse => "CONTEXT_RESPONSE",
            Self::FinalResponse => "FINAL_RESPONSE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Message body; one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Fragments extracted from one document.
    DocumentProcessed {
        /// Uploaded document name.
        filename: String,
        /// Fragments in document order.
        #[serde(rename = "chunks")]
        fragments: Vec<String>,
    },
    /// Acknowledgement that a document's fragments are searchable.
    ChunksStored {
        /// Uploaded document name.
        filename: String,
        /// Number of fragments indexed.
        #[serde(rename = "chunks_count")]
        stored_count: usize,
        /// Session the fragments belong to.
        session_id: String,
    },
    /// Question asked within a session.
    Query {
        /// Question text.
        query: String,
        /// Session to search.
        session_id: String,
    },
    /// Fragments retrieved for a question, closest first.
    ContextResponse {
        /// Question text.
        query: String,
        /// Session that was searched.
        session_id: String,
        /// Retrieved fragments.
        #[serde(rename = "top_chunks")]
        fragments: Vec<Fragment>,
    },
    /// Generated answer and the documents it drew on.
    FinalResponse {
        /// Question text.
        query: String,
        /// Model answer.
        answer: String,
        /// Distinct source filenames, sorted.
        sources: Vec<String>,
        /// Session the question was asked in.
        session_id: String,
    },
    /// Failure description.
    Error {
        /// Human readable cause.
        error: String,
        /// Session the failed request belonged to.
        session_id: String,
    },
}

impl Payload {
    /// Message type implied by this payload.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::DocumentProcessed { .. } => MessageType::DocumentProcessed,
            Self::ChunksStored { .. } => MessageType::ChunksStored,
            Self::Query { .. } => MessageType::Query,
            Self::ContextResponse { .. } => MessageType::ContextResponse,
            Self::FinalResponse { .. } => MessageType::FinalResponse,
            Self::Error { .. } => MessageType::Error,
        }
    }
}

/// Immutable envelope passed from one stage to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    sender: AgentId,
    receiver: AgentId,
    trace_id: String,
    payload: Payload,
}

impl Message {
    /// Start a new trace with a freshly generated id.
    pub fn new(sender: AgentId, receiver: AgentId, payload: Payload) -> Self {
        Self::in_trace(Uuid::new_v4().to_string(), sender, receiver, payload)
    }

    /// Create a message belonging to an existing trace.
    pub fn in_trace(
        trace_id: impl Into<String>,
        sender: AgentId,
        receiver: AgentId,
        payload: Payload,
    ) -> Self {
        Self {
            sender,
            receiver,
            trace_id: trace_id.into(),
            payload,
        }
    }

    /// Sending stage.
    pub fn sender(&self) -> AgentId {
        self.sender
    }

    /// Receiving stage.
    pub fn receiver(&self) -> AgentId {
        self.receiver
    }

    /// Type derived from the payload.
    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    /// Correlation id shared by every message of one request.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Message body.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the message, keeping only its body.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    sender: AgentId,
    receiver: AgentId,
    #[serde(rename = "type")]
    kind: MessageType,
    trace_id: &'a str,
    payload: &'a Payload,
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Envelope {
            sender: self.sender,
            receiver: self.receiver,
            kind: self.kind(),
            trace_id: &self.trace_id,
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_messages_get_distinct_uuid_trace_ids() {
        let payload = Payload::Query {
            query: "q".into(),
            session_id: "s".into(),
        };
        let first = Message::new(AgentId::Coordinator, AgentId::Retrieval, payload.clone());
        let second = Message::new(AgentId::Coordinator, AgentId::Retrieval, payload);

        assert_ne!(first.trace_id(), second.trace_id());
        assert!(Uuid::parse_str(first.trace_id()).is_ok());
    }

    #[test]
    fn envelope_serializes_with_type_field() {
        let message = Message::in_trace(
            "abc",
            AgentId::Retrieval,
            AgentId::Coordinator,
            Payload::ChunksStored {
                filename: "notes.txt".into(),
                stored_count: 3,
                session_id: "s1".into(),
            },
        );

        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(
            value,
            json!({
                "sender": "RetrievalAgent",
                "receiver": "CoordinatorAgent",
                "type": "CHUNKS_STORED",
                "trace_id": "abc",
                "payload": {
                    "filename": "notes.txt",
                    "chunks_count": 3,
                    "session_id": "s1"
                }
            })
        );
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(MessageType::ContextResponse.to_string(), "CONTEXT_RESPONSE");
        assert_eq!(AgentId::Answer.to_string(), "LLMResponseAgent");
    }
}
