//! HTTP surface for the RAG pipeline.
//!
//! Every route except `/` and `/commands` requires the caller's verified user id in the
//! `x-user-id` header, set by the authenticating proxy in front of this service.
//!
//! - `POST /upload` – Multipart `file` upload; extracts, embeds, and indexes the document under a
//!   new chat session and returns `{ message, filename, chunks_count, session_id }`.
//! - `POST /query` – Answer `{ query, session_id }` from the session's documents.
//! - `POST /api/chat-sessions/new` – Open a chat session without a document.
//! - `GET /api/chat-sessions` and `GET /api/chat-sessions/{id}` – Sessions with their messages.
//! - `POST /api/context/reset` – Drop every indexed fragment (all sessions).
//! - `DELETE /chat-history` – Remove the caller's sessions and messages.
//! - `GET /stats` – Document, fragment, and message counts for the caller.
//! - `GET /metrics` – Pipeline counters since startup.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::persistence::SessionHistory;
use crate::pipeline::{PipelineApi, PipelineError, PipelineStats};
use axum::{
    Json, Router, async_trait,
    extract::{
        DefaultBodyLimit, FromRequestParts, Multipart, Path, State, multipart::MultipartError,
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the verified user id.
pub const USER_HEADER: &str = "x-user-id";

/// Build the HTTP router exposing the pipeline.
///
/// `max_upload_bytes` bounds the `/upload` request body; other routes keep axum's default limit.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/", get(root))
        .route(
            "/upload",
            post(upload_document::<S>).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/query", post(query_documents::<S>))
        .route("/api/chat-sessions/new", post(new_chat_session::<S>))
        .route("/api/chat-sessions", get(list_chat_sessions::<S>))
        .route("/api/chat-sessions/:session_id", get(get_chat_session::<S>))
        .route("/api/context/reset", post(reset_context::<S>))
        .route("/chat-history", delete(clear_chat_history::<S>))
        .route("/stats", get(get_stats::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Caller identity taken from [`USER_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(
    /// Verified user id.
    pub String,
);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Agentic RAG API is running!" }))
}

/// Success response for `POST /upload`.
#[derive(Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
    chunks_count: usize,
    session_id: String,
}

/// Index the multipart `file` field under a new session owned by the caller.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError>
where
    S: PipelineApi,
{
    while let Some(field) = multipart.next_field().await.map_err(AppError::Upload)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::BadRequest("Uploaded file has no filename".into()))?;
        let bytes = field.bytes().await.map_err(AppError::Upload)?;

        let outcome = service.ingest(&bytes, &filename, &user).await?;
        tracing::info!(
            filename = %outcome.filename,
            session_id = %outcome.session_id,
            chunks = outcome.stored_count,
            "Upload request completed"
        );
        return Ok(Json(UploadResponse {
            message: format!("Successfully processed {}", outcome.filename),
            filename: outcome.filename,
            chunks_count: outcome.stored_count,
            session_id: outcome.session_id,
        }));
    }

    Err(AppError::BadRequest("Missing multipart field 'file'".into()))
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    session_id: String,
}

/// Success response for `POST /query`.
#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<String>,
    query: String,
    session_id: String,
}

async fn query_documents<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: PipelineApi,
{
    let outcome = service
        .ask(&user, &request.query, &request.session_id)
        .await?;
    Ok(Json(QueryResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        query: outcome.query,
        session_id: outcome.session_id,
    }))
}

#[derive(Serialize)]
struct NewSessionResponse {
    session_id: String,
    message: &'static str,
}

async fn new_chat_session<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<NewSessionResponse>, AppError>
where
    S: PipelineApi,
{
    let record = service.open_session(&user).await?;
    Ok(Json(NewSessionResponse {
        session_id: record.session_id,
        message: "New chat session created",
    }))
}

async fn list_chat_sessions<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<SessionHistory>>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.sessions_for(&user).await?))
}

async fn get_chat_session<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<Json<SessionHistory>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.session(&session_id, &user).await?))
}

/// Drop every indexed fragment. Affects all users' sessions.
async fn reset_context<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Json<serde_json::Value>
where
    S: PipelineApi,
{
    let cleared = service.reset_session().await;
    tracing::warn!(requested_by = %user, cleared, "Context reset for every session");
    Json(json!({
        "message": "New session started, context cleared",
        "cleared_chunks": cleared
    }))
}

async fn clear_chat_history<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: PipelineApi,
{
    let removed = service.clear_history(&user).await?;
    Ok(Json(json!({
        "message": "Chat history cleared",
        "sessions_removed": removed
    })))
}

async fn get_stats<S>(
    State(service): State<Arc<S>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<PipelineStats>, AppError>
where
    S: PipelineApi,
{
    Ok(Json(service.stats(&user).await?))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/upload",
                description: "Upload a PDF, DOCX, PPTX, CSV, TXT, or MD document as multipart field 'file'. The document is split into fragments and indexed under a new chat session; the response returns { \"chunks_count\": number, \"session_id\": string }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Answer a question using only the documents of the given chat session.",
                request_example: Some(json!({
                    "query": "What were the quarterly results?",
                    "session_id": "3f1c0a52-6a8e-4d0b-9d55-2f3f3c8e9b11"
                })),
            },
            CommandDescriptor {
                name: "new_chat_session",
                method: "POST",
                path: "/api/chat-sessions/new",
                description: "Open a chat session without uploading a document.",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_chat_sessions",
                method: "GET",
                path: "/api/chat-sessions",
                description: "List the caller's chat sessions with their messages, newest first.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_chat_session",
                method: "GET",
                path: "/api/chat-sessions/{session_id}",
                description: "Return one chat session with its messages.",
                request_example: None,
            },
            CommandDescriptor {
                name: "reset_context",
                method: "POST",
                path: "/api/context/reset",
                description: "Drop every indexed fragment for all sessions. Session records and messages are kept.",
                request_example: None,
            },
            CommandDescriptor {
                name: "clear_chat_history",
                method: "DELETE",
                path: "/chat-history",
                description: "Delete the caller's chat sessions and messages.",
                request_example: None,
            },
            CommandDescriptor {
                name: "stats",
                method: "GET",
                path: "/stats",
                description: "Return { \"total_documents\", \"total_chunks\", \"chat_history_count\" } for the caller.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

/// Errors rendered as `{ "detail": message }` responses.
#[derive(Debug)]
pub enum AppError {
    /// Missing or empty [`USER_HEADER`].
    Unauthorized,
    /// Malformed request.
    BadRequest(String),
    /// Multipart body could not be read; carries its own status (413 when over the limit).
    Upload(MultipartError),
    /// Pipeline failure.
    Pipeline(PipelineError),
}

impl AppError {
    fn status_and_detail(&self) -> (StatusCode, String) {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing user identity. Please log in.".into(),
            ),
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            Self::Upload(error) => (
                error.status(),
                format!("Failed to read upload: {}", error.body_text()),
            ),
            Self::Pipeline(error) if error.is_invariant_violation() => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal index error".into(),
            ),
            Self::Pipeline(error) => match error {
                PipelineError::Extraction(_) | PipelineError::Ingest { .. } => {
                    (StatusCode::BAD_REQUEST, error.to_string())
                }
                PipelineError::SessionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "Chat session not found".into())
                }
                PipelineError::Generation(_) => (
                    StatusCode::BAD_GATEWAY,
                    "The language model could not produce an answer".into(),
                ),
                PipelineError::Retrieval(_) => (
                    StatusCode::BAD_GATEWAY,
                    "Failed to retrieve document context".into(),
                ),
                PipelineError::Repository(_) | PipelineError::UnexpectedMessage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Session storage error".into(),
                ),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        if status.is_server_error() {
            tracing::error!(error = ?self, %status, "Request failed");
        } else {
            tracing::warn!(error = ?self, %status, "Request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{USER_HEADER, create_router, get_commands};
    use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
    use crate::metrics::MetricsSnapshot;
    use crate::persistence::{NO_FILE_UPLOADED, SessionHistory, SessionRecord};
    use crate::pipeline::{IngestOutcome, PipelineApi, PipelineError, PipelineStats, QueryOutcome};
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Copy)]
    enum AskBehaviour {
        Answer,
        NotFound,
        ModelDown,
    }

    struct StubPipeline {
        uploads: Mutex<Vec<(String, Vec<u8>, String)>>,
        ask: AskBehaviour,
    }

    impl StubPipeline {
        fn new(ask: AskBehaviour) -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                ask,
            }
        }
    }

    #[async_trait]
    impl PipelineApi for StubPipeline {
        async fn ingest(
            &self,
            bytes: &[u8],
            filename: &str,
            owning_user: &str,
        ) -> Result<IngestOutcome, PipelineError> {
            self.uploads.lock().await.push((
                filename.to_string(),
                bytes.to_vec(),
                owning_user.to_string(),
            ));
            Ok(IngestOutcome {
                session_id: "session-1".into(),
                filename: filename.to_string(),
                stored_count: 3,
                trace_id: "trace".into(),
                document_digest: "digest".into(),
            })
        }

        async fn ask(
            &self,
            _owning_user: &str,
            query: &str,
            session_id: &str,
        ) -> Result<QueryOutcome, PipelineError> {
            match self.ask {
                AskBehaviour::Answer => Ok(QueryOutcome {
                    answer: "Forty-two.".into(),
                    sources: vec!["guide.txt".into()],
                    query: query.to_string(),
                    session_id: session_id.to_string(),
                    trace_id: "trace".into(),
                }),
                AskBehaviour::NotFound => Err(PipelineError::SessionNotFound(session_id.into())),
                AskBehaviour::ModelDown => Err(PipelineError::Generation(
                    "connection refused at 10.0.0.3".into(),
                )),
            }
        }

        async fn open_session(&self, owning_user: &str) -> Result<SessionRecord, PipelineError> {
            Ok(SessionRecord::new("session-2", owning_user, NO_FILE_UPLOADED))
        }

        async fn sessions_for(
            &self,
            owning_user: &str,
        ) -> Result<Vec<SessionHistory>, PipelineError> {
            Ok(vec![SessionHistory {
                session: SessionRecord::new("session-1", owning_user, "guide.txt"),
                messages: Vec::new(),
            }])
        }

        async fn session(
            &self,
            session_id: &str,
            _owning_user: &str,
        ) -> Result<SessionHistory, PipelineError> {
            Err(PipelineError::SessionNotFound(session_id.into()))
        }

        async fn reset_session(&self) -> usize {
            7
        }

        async fn clear_history(&self, _owning_user: &str) -> Result<usize, PipelineError> {
            Ok(2)
        }

        async fn stats(&self, _owning_user: &str) -> Result<PipelineStats, PipelineError> {
            Ok(PipelineStats {
                total_documents: 1,
                total_chunks: 3,
                chat_history_count: 4,
            })
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }

    fn router(service: Arc<StubPipeline>) -> Router {
        create_router(service, DEFAULT_MAX_UPLOAD_BYTES)
    }

    fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(USER_HEADER, "alice")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn query_request(user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/query")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder
            .body(Body::from(
                json!({ "query": "What is it?", "session_id": "session-1" }).to_string(),
            ))
            .expect("request")
    }

    #[tokio::test]
    async fn commands_catalog_exposes_upload_and_query() {
        let commands = get_commands().await.0.commands;
        let upload = commands
            .iter()
            .find(|cmd| cmd.name == "upload")
            .expect("upload command present");
        assert_eq!(upload.method, "POST");
        assert_eq!(upload.path, "/upload");
        assert!(commands.iter().any(|cmd| cmd.path == "/query"));
        assert!(commands.len() >= 5);
    }

    #[tokio::test]
    async fn upload_reads_the_file_field() {
        let service = Arc::new(StubPipeline::new(AskBehaviour::Answer));
        let app = router(service.clone());
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"guide.txt\"\r\nContent-Type: text/plain\r\n\r\nhello world\r\n--{boundary}--\r\n"
        );

        let (status, json) = send(
            app,
            Request::builder()
                .method(Method::POST)
                .uri("/upload")
                .header(USER_HEADER, "alice")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["chunks_count"], 3);
        assert_eq!(json["session_id"], "session-1");
        assert_eq!(json["message"], "Successfully processed guide.txt");
        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "guide.txt");
        assert_eq!(uploads[0].1, b"hello world");
        assert_eq!(uploads[0].2, "alice");
    }

    #[tokio::test]
    async fn uploads_beyond_axum_default_limit_are_accepted() {
        let service = Arc::new(StubPipeline::new(AskBehaviour::Answer));
        let content = vec![b'a'; 3 * 1024 * 1024];

        let (status, json) = send(
            router(service.clone()),
            upload_request("big.txt", &content),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "unexpected body: {json}");
        let uploads = service.uploads.lock().await;
        assert_eq!(uploads[0].1.len(), content.len());
    }

    #[tokio::test]
    async fn uploads_over_the_configured_limit_are_too_large() {
        let service = Arc::new(StubPipeline::new(AskBehaviour::Answer));
        let app = create_router(service.clone(), 1024);

        let (status, json) = send(app, upload_request("big.txt", &[b'a'; 4096])).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json["detail"].as_str().unwrap_or_default().starts_with("Failed to read upload"));
        assert!(service.uploads.lock().await.is_empty());
    }

    #[tokio::test]
    async fn query_returns_answer_and_sources() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::Answer)));
        let (status, json) = send(app, query_request(Some("alice"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["answer"], "Forty-two.");
        assert_eq!(json["sources"], json!(["guide.txt"]));
        assert_eq!(json["session_id"], "session-1");
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::Answer)));
        let (status, _) = send(app, query_request(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::NotFound)));
        let (status, json) = send(app, query_request(Some("alice"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "Chat session not found");
    }

    #[tokio::test]
    async fn generation_failures_hide_the_cause() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::ModelDown)));
        let (status, json) = send(app, query_request(Some("alice"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!json["detail"].as_str().unwrap_or_default().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn stats_and_reset_routes_respond() {
        let service = Arc::new(StubPipeline::new(AskBehaviour::Answer));

        let (status, json) = send(
            router(service.clone()),
            Request::builder()
                .uri("/stats")
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({ "total_documents": 1, "total_chunks": 3, "chat_history_count": 4 })
        );

        let (status, json) = send(
            router(service),
            Request::builder()
                .method(Method::POST)
                .uri("/api/context/reset")
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cleared_chunks"], 7);
    }

    #[tokio::test]
    async fn session_listing_uses_wire_field_names() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::Answer)));
        let (status, json) = send(
            app,
            Request::builder()
                .uri("/api/chat-sessions")
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["id"], "session-1");
        assert_eq!(json[0]["user_id"], "alice");
        assert_eq!(json[0]["filename"], "guide.txt");
        assert_eq!(json[0]["messages"], json!([]));
    }

    #[tokio::test]
    async fn missing_session_lookup_is_not_found() {
        let app = router(Arc::new(StubPipeline::new(AskBehaviour::Answer)));
        let (status, _) = send(
            app,
            Request::builder()
                .uri("/api/chat-sessions/ghost")
                .header(USER_HEADER, "alice")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
