//! Answer generation from retrieved fragments.

mod prompt;

pub use prompt::{build_context, build_grounded_prompt, build_no_context_prompt, build_prompt};

use crate::generation::GenerationClient;
use crate::protocol::{AgentId, Message, Payload};
use crate::store::Fragment;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one generation attempt. Failures are data, never partial answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The model answered.
    Answered {
        /// Model answer.
        answer: String,
        /// Distinct filenames of the fragments supplied as context, sorted.
        sources: Vec<String>,
    },
    /// The model call failed or timed out.
    Failed {
        /// Cause of the failure.
        error: String,
    },
}

/// Phrases answers with a generative model, calling it exactly once per question.
pub struct AnswerGenerator {
    client: Arc<dyn GenerationClient>,
    timeout: Duration,
}

impl AnswerGenerator {
    /// Create a generator backed by `client`.
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound each model call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answer `query` from `fragments`.
    pub async fn generate(&self, query: &str, fragments: &[Fragment]) -> AnswerOutcome {
        let sources = distinct_sources(fragments);
        let prompt = build_prompt(query, fragments, &sources);
        tracing::debug!(
            fragments = fragments.len(),
            sources = sources.len(),
            prompt_chars = prompt.chars().count(),
            "Requesting answer"
        );

        match tokio::time::timeout(self.timeout, self.client.generate(&prompt)).await {
            Ok(Ok(answer)) => AnswerOutcome::Answered { answer, sources },
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Answer generation failed");
                AnswerOutcome::Failed {
                    error: error.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Answer generation timed out");
                AnswerOutcome::Failed {
                    error: format!("Answer generation timed out after {:?}", self.timeout),
                }
            }
        }
    }

    /// Turn a `CONTEXT_RESPONSE` into a `FINAL_RESPONSE` or `ERROR` in the same trace.
    pub async fn respond(&self, message: Message) -> Message {
        let trace_id = message.trace_id().to_string();
        let payload = match message.into_payload() {
            Payload::ContextResponse {
                query,
                session_id,
                fragments,
            } => match self.generate(&query, &fragments).await {
                AnswerOutcome::Answered { answer, sources } => Payload::FinalResponse {
                    query,
                    answer,
                    sources,
                    session_id,
                },
                AnswerOutcome::Failed { error } => Payload::Error { error, session_id },
            },
            other => Payload::Error {
                error: format!("Cannot answer a {} message", other.kind()),
                session_id: String::new(),
            },
        };
        Message::in_trace(trace_id, AgentId::Answer, AgentId::Coordinator, payload)
    }
}

fn distinct_sources(fragments: &[Fragment]) -> Vec<String> {
    fragments
        .iter()
        .map(|fragment| fragment.source_filename.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use crate::testing::{
        FailingGenerationClient, RecordingGenerationClient, StalledGenerationClient,
    };

    fn fragment(text: &str, filename: &str) -> Fragment {
        Fragment {
            text: text.into(),
            source_filename: filename.into(),
            session_id: "s1".into(),
        }
    }

    #[tokio::test]
    async fn sources_are_distinct_and_sorted() {
        let client = Arc::new(RecordingGenerationClient::new("42"));
        let generator = AnswerGenerator::new(client.clone());

        let outcome = generator
            .generate(
                "q",
                &[
                    fragment("a", "zeta.pdf"),
                    fragment("b", "alpha.txt"),
                    fragment("c", "zeta.pdf"),
                ],
            )
            .await;

        assert_eq!(
            outcome,
            AnswerOutcome::Answered {
                answer: "42".into(),
                sources: vec!["alpha.txt".into(), "zeta.pdf".into()],
            }
        );
        assert_eq!(client.prompts().len(), 1);
    }

    #[tokio::test]
    async fn no_fragments_still_calls_the_model_once() {
        let client = Arc::new(RecordingGenerationClient::new("Please upload documents."));
        let generator = AnswerGenerator::new(client.clone());

        let outcome = generator.generate("anything?", &[]).await;

        let AnswerOutcome::Answered { sources, .. } = outcome else {
            panic!("expected an answer");
        };
        assert!(sources.is_empty());
        let prompts = client.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("upload some documents"));
    }

    #[tokio::test]
    async fn service_failure_becomes_failed_outcome() {
        let generator = AnswerGenerator::new(Arc::new(FailingGenerationClient));
        let outcome = generator.generate("q", &[fragment("a", "x.txt")]).await;
        assert!(matches!(outcome, AnswerOutcome::Failed { ref error } if error.contains("503")));
    }

    #[tokio::test]
    async fn timeout_becomes_failed_outcome() {
        let generator = AnswerGenerator::new(Arc::new(StalledGenerationClient))
            .with_timeout(Duration::from_millis(20));
        let outcome = generator.generate("q", &[]).await;
        assert!(matches!(outcome, AnswerOutcome::Failed { ref error } if error.contains("timed out")));
    }

    #[tokio::test]
    async fn respond_produces_final_response_in_same_trace() {
        let generator = AnswerGenerator::new(Arc::new(RecordingGenerationClient::new("yes")));
        let request = Message::in_trace(
            "trace-9",
            AgentId::Retrieval,
            AgentId::Answer,
            Payload::ContextResponse {
                query: "q".into(),
                session_id: "s1".into(),
                fragments: vec![fragment("a", "x.txt")],
            },
        );

        let reply = generator.respond(request).await;

        assert_eq!(reply.kind(), MessageType::FinalResponse);
        assert_eq!(reply.trace_id(), "trace-9");
        assert_eq!(reply.sender(), AgentId::Answer);
        assert_eq!(reply.receiver(), AgentId::Coordinator);
    }

    #[tokio::test]
    async fn respond_reports_errors_as_error_messages() {
        let generator = AnswerGenerator::new(Arc::new(FailingGenerationClient));
        let request = Message::new(
            AgentId::Retrieval,
            AgentId::Answer,
            Payload::ContextResponse {
                query: "q".into(),
                session_id: "s1".into(),
                fragments: Vec::new(),
            },
        );

        let reply = generator.respond(request).await;

        assert_eq!(reply.kind(), MessageType::Error);
        assert!(matches!(
            reply.payload(),
            Payload::Error { session_id, .. } if session_id == "s1"
        ));
    }

    #[tokio::test]
    async fn respond_rejects_unexpected_messages() {
        let generator = AnswerGenerator::new(Arc::new(RecordingGenerationClient::new("unused")));
        let request = Message::new(
            AgentId::Coordinator,
            AgentId::Answer,
            Payload::Query {
                query: "q".into(),
                session_id: "s1".into(),
            },
        );
        let reply = generator.respond(request).await;
        assert_eq!(reply.kind(), MessageType::Error);
    }
}
