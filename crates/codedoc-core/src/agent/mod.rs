//! Staged query agent.
//!
//! A directed pipeline of five stages with a typed state object passed
//! between them — an explicit sequence, not dynamic dispatch:
//!
//! ```text
//! analyse -> retrieve -> contextualise -> generate -> validate
//! ```
//!
//! Generation tokens flow to the caller through a channel bounded to a
//! single element, so a slow consumer back-pressures the producer and a
//! dropped consumer cancels downstream work at the next suspension
//! point. On a stage failure the agent surfaces one `error` frame and
//! persists an assistant message capturing the failure (for session
//! continuity); it never retries generation implicitly.

pub mod analyze;
pub mod prompt;
pub mod validate;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::chunker::estimate_tokens;
use crate::config::{LlmConfig, RetrievalConfig};
use crate::error::{CodedocError, CodedocResult};
use crate::llm::LlmClient;
use crate::registry::CodebaseRegistry;
use crate::retrieval::{QueryFilters, RetrievalEngine};
use crate::session::SessionStore;
use crate::types::{Citation, CodebaseStatus, Message, QueryEvent, RetrievedChunk};

/// Typed state threaded through the pipeline stages.
#[derive(Debug, Default)]
struct AgentState {
    query: String,
    filters: QueryFilters,
    retrieved: Vec<RetrievedChunk>,
    context: String,
    draft: String,
    citations: Vec<Citation>,
}

/// The query agent: owns the stage sequence and the admission gate.
#[derive(Clone)]
pub struct QueryAgent {
    retrieval: Arc<RetrievalEngine>,
    llm: Arc<dyn LlmClient>,
    sessions: Arc<SessionStore>,
    registry: Arc<CodebaseRegistry>,
    history_messages: usize,
    context_budget_tokens: u32,
    gate: Arc<Semaphore>,
    gate_limit: usize,
}

impl QueryAgent {
    /// Build the agent over its collaborator handles.
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        llm: Arc<dyn LlmClient>,
        sessions: Arc<SessionStore>,
        registry: Arc<CodebaseRegistry>,
        llm_config: &LlmConfig,
        retrieval_config: &RetrievalConfig,
    ) -> Self {
        let gate_limit = retrieval_config.concurrent_queries_max.max(1);
        Self {
            retrieval,
            llm,
            sessions,
            registry,
            history_messages: llm_config.history_messages,
            context_budget_tokens: llm_config.context_budget_tokens,
            gate: Arc::new(Semaphore::new(gate_limit)),
            gate_limit,
        }
    }

    /// Open or resume a session and drive the pipeline, streaming
    /// events to the returned receiver.
    ///
    /// Admission errors (unknown or unqueryable codebase, malformed
    /// query, concurrency limit) are returned directly — no stream is
    /// opened for them.
    pub async fn query(
        &self,
        codebase_id: Uuid,
        session_id: Option<Uuid>,
        raw_query: &str,
    ) -> CodedocResult<ReceiverStream<QueryEvent>> {
        let query = analyze::normalize(raw_query);
        if query.is_empty() {
            return Err(CodedocError::MalformedQuery {
                reason: "empty query".into(),
            });
        }

        let codebase = self.registry.get(codebase_id)?;
        if codebase.status != CodebaseStatus::Completed {
            return Err(CodedocError::NotQueryable {
                id: codebase_id.to_string(),
                status: codebase.status.to_string(),
            });
        }

        let permit = self.gate.clone().try_acquire_owned().map_err(|_| {
            CodedocError::TooManyQueries {
                limit: self.gate_limit,
            }
        })?;

        let (session_id, new_session) = match session_id {
            Some(id) => {
                let bound = self.sessions.codebase_of(id).ok_or_else(|| {
                    CodedocError::UnknownSession { id: id.to_string() }
                })?;
                if bound != codebase_id {
                    return Err(CodedocError::MalformedQuery {
                        reason: "session is bound to a different codebase".into(),
                    });
                }
                (id, false)
            }
            None => (self.sessions.create(codebase_id), true),
        };

        // Capacity 1: the pipeline blocks until the consumer pulls.
        let (tx, rx) = mpsc::channel::<QueryEvent>(1);
        let agent = self.clone();

        tokio::spawn(async move {
            let _permit = permit;
            agent
                .run_pipeline(codebase_id, session_id, new_session, query, tx)
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_pipeline(
        &self,
        codebase_id: Uuid,
        session_id: Uuid,
        new_session: bool,
        query: String,
        tx: mpsc::Sender<QueryEvent>,
    ) {
        if new_session {
            let _ = tx.send(QueryEvent::SessionId { session_id }).await;
        }

        // History prefix is captured before this turn's user message is
        // appended, so the prompt never duplicates the query.
        let history = self
            .sessions
            .recent(session_id, self.history_messages)
            .await
            .unwrap_or_default();

        if let Err(e) = self
            .sessions
            .append(session_id, Message::user(query.as_str()))
            .await
        {
            let _ = tx.send(QueryEvent::Error { error: e.to_string() }).await;
            return;
        }

        let mut state = AgentState {
            query,
            ..AgentState::default()
        };

        match self.drive(codebase_id, &history, &mut state, &tx).await {
            Ok(()) => {
                let _ = tx
                    .send(QueryEvent::Sources {
                        sources: state.citations.clone(),
                    })
                    .await;

                let retrieved_ids = state
                    .retrieved
                    .iter()
                    .map(|r| r.chunk.id.clone())
                    .collect();
                let message =
                    Message::assistant(state.draft.clone(), state.citations, retrieved_ids);
                if let Err(e) = self.sessions.append(session_id, message).await {
                    tracing::warn!(%session_id, error = %e, "failed to persist assistant message");
                }

                let _ = tx.send(QueryEvent::Done).await;
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "query pipeline failed");
                let _ = tx.send(QueryEvent::Error { error: e.to_string() }).await;

                // Persist the failure so the session history stays coherent.
                let message =
                    Message::assistant(format!("Error: {e}"), Vec::new(), Vec::new());
                if let Err(persist_err) = self.sessions.append(session_id, message).await {
                    tracing::warn!(%session_id, error = %persist_err, "failed to persist error message");
                }
            }
        }
    }

    /// Stages analyse → retrieve → contextualise → generate → validate.
    async fn drive(
        &self,
        codebase_id: Uuid,
        history: &[Message],
        state: &mut AgentState,
        tx: &mpsc::Sender<QueryEvent>,
    ) -> CodedocResult<()> {
        // Analyse: filter extraction, no external calls.
        state.filters = analyze::extract_filters(&state.query);

        // Retrieve.
        state.retrieved = self
            .retrieval
            .retrieve(&state.query, codebase_id, &state.filters)
            .await?;

        // Contextualise.
        state.context = contextualize(&state.retrieved, self.context_budget_tokens);

        // Generate.
        let messages = prompt::build_messages(&state.context, history, &state.query);
        let mut stream = self.llm.stream_chat(messages).await?;
        while let Some(token) = stream.next().await {
            let token = token?;
            state.draft.push_str(&token);
            if tx.send(QueryEvent::Chunk { content: token }).await.is_err() {
                // Consumer disconnected; dropping the stream cancels the
                // generation at its next suspension point.
                return Err(CodedocError::Generation {
                    message: "client disconnected mid-stream".into(),
                });
            }
        }

        // Validate. With an empty retrieval set every citation the model
        // emitted is fabricated by definition.
        state.citations = if state.retrieved.is_empty() {
            Vec::new()
        } else {
            validate::validate_citations(&state.draft, &state.retrieved)
        };

        Ok(())
    }
}

/// Format retrieved chunks into a bounded context block, best first.
///
/// Chunks past the token budget are dropped from the bottom of the
/// ranking. An empty retrieval produces the explicit marker the system
/// prompt keys on.
fn contextualize(retrieved: &[RetrievedChunk], budget_tokens: u32) -> String {
    if retrieved.is_empty() {
        return prompt::EMPTY_CONTEXT.to_string();
    }

    let mut block = String::new();
    let mut used: u32 = 0;
    for item in retrieved {
        let header = format!(
            "// {}:{}-{}\n",
            item.chunk.file_path, item.chunk.line_start, item.chunk.line_end
        );
        let cost = estimate_tokens(&header) + item.chunk.token_count;
        if used + cost > budget_tokens && used > 0 {
            tracing::debug!(
                dropped_from = %item.chunk.file_path,
                "context budget reached, truncating lowest-ranked chunks"
            );
            break;
        }
        block.push_str(&header);
        block.push_str(&item.chunk.content);
        block.push_str("\n\n");
        used += cost;
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, RetrievalConfig};
    use crate::embedder::{EmbeddingClient, EmbeddingProvider};
    use crate::llm::{ChatMessage, TokenStream};
    use crate::types::{chunk_id, Chunk, ChunkKind, Language, OriginKind};
    use crate::vector::{ChunkRecord, FlatVectorStore, VectorStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct HashEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        fn name(&self) -> &str {
            "hash"
        }

        async fn embed_batch(&self, texts: &[String]) -> CodedocResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for c in t.to_lowercase().chars() {
                        if c.is_ascii_lowercase() {
                            v[(c as u8 - b'a') as usize] += 1.0;
                        }
                    }
                    v
                })
                .collect())
        }
    }

    /// Plays back a fixed token script and records the prompt it saw.
    struct ScriptedLlm {
        tokens: Vec<String>,
        seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(tokens: &[&str]) -> Self {
            Self {
                tokens: tokens.iter().map(|s| s.to_string()).collect(),
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn stream_chat(&self, messages: Vec<ChatMessage>) -> CodedocResult<TokenStream> {
            self.seen_messages.lock().push(messages);
            let tokens = self.tokens.clone();
            Ok(Box::pin(futures_util::stream::iter(
                tokens.into_iter().map(Ok),
            )))
        }
    }

    struct Fixture {
        agent: QueryAgent,
        codebase_id: Uuid,
        llm: Arc<ScriptedLlm>,
    }

    async fn fixture(tokens: &[&str], chunk_builder: fn(Uuid) -> Vec<Chunk>) -> Fixture {
        let registry = Arc::new(CodebaseRegistry::in_memory().expect("registry"));
        let cb = registry
            .create("demo", None, OriginKind::Archive, "hash", 0, None)
            .expect("create");
        registry.mark_started(cb.id).expect("start");
        registry.mark_completed(cb.id).expect("complete");

        let embedder = Arc::new(EmbeddingClient::new(Arc::new(HashEmbedder), None, 100));
        let store = Arc::new(FlatVectorStore::in_memory());
        let chunks = chunk_builder(cb.id);
        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await.expect("embed");
            store
                .upsert(
                    chunks
                        .into_iter()
                        .zip(vectors)
                        .map(|(chunk, vector)| ChunkRecord { vector, chunk })
                        .collect(),
                )
                .await
                .expect("upsert");
        }

        let retrieval = Arc::new(RetrievalEngine::new(
            store,
            embedder,
            RetrievalConfig::default(),
        ));
        let sessions = Arc::new(SessionStore::new(3600));
        let llm = Arc::new(ScriptedLlm::new(tokens));

        Fixture {
            agent: QueryAgent::new(
                retrieval,
                llm.clone(),
                sessions,
                registry,
                &LlmConfig::default(),
                &RetrievalConfig::default(),
            ),
            codebase_id: cb.id,
            llm,
        }
    }

    fn foo_chunk(codebase_id: Uuid) -> Chunk {
        Chunk {
            id: chunk_id(codebase_id, "a.py", 1, 10, ChunkKind::Function),
            codebase_id,
            file_path: "a.py".into(),
            line_start: 1,
            line_end: 10,
            kind: ChunkKind::Function,
            name: "foo".into(),
            language: Language::Python,
            content: "def foo():\n    return 1".into(),
            dependencies: Vec::new(),
            docstring: None,
            parent_class: None,
            token_count: 6,
        }
    }

    async fn collect(stream: ReceiverStream<QueryEvent>) -> Vec<QueryEvent> {
        stream.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn test_event_sequence_with_citation() {
        let fx = fixture(&["foo ", "returns 1 ", "[a.py:1-10]"], |cb| vec![foo_chunk(cb)]).await;

        let stream = fx
            .agent
            .query(fx.codebase_id, None, "what does foo do?")
            .await
            .expect("stream");
        let events = collect(stream).await;

        assert!(matches!(events[0], QueryEvent::SessionId { .. }));
        let chunks: String = events
            .iter()
            .filter_map(|e| match e {
                QueryEvent::Chunk { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, "foo returns 1 [a.py:1-10]");

        let sources = events.iter().find_map(|e| match e {
            QueryEvent::Sources { sources } => Some(sources.clone()),
            _ => None,
        });
        let sources = sources.expect("sources event");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].file_path, "a.py");
        assert_eq!(sources[0].line_start, 1);
        assert_eq!(sources[0].line_end, 10);

        assert!(matches!(events.last(), Some(QueryEvent::Done)));
    }

    #[tokio::test]
    async fn test_empty_retrieval_uses_marker_context_and_no_citations() {
        let fx = fixture(
            &["I don't see this in the provided code. [fake.py:1-5]"],
            |_| Vec::new(),
        )
        .await;

        let stream = fx
            .agent
            .query(fx.codebase_id, None, "how does the Kubernetes operator reconcile pods?")
            .await
            .expect("stream");
        let events = collect(stream).await;

        let sources = events.iter().find_map(|e| match e {
            QueryEvent::Sources { sources } => Some(sources.clone()),
            _ => None,
        });
        assert_eq!(sources.expect("sources event").len(), 0);

        let prompts = fx.llm.seen_messages.lock();
        let last_user = prompts[0].last().expect("user turn").content.clone();
        assert!(last_user.contains(prompt::EMPTY_CONTEXT));
    }

    #[tokio::test]
    async fn test_follow_up_includes_history() {
        let fx = fixture(&["answer"], |_| Vec::new()).await;

        let first = fx
            .agent
            .query(fx.codebase_id, None, "Where is foo?")
            .await
            .expect("stream");
        let events = collect(first).await;
        let session_id = events
            .iter()
            .find_map(|e| match e {
                QueryEvent::SessionId { session_id } => Some(*session_id),
                _ => None,
            })
            .expect("session id");

        let second = fx
            .agent
            .query(fx.codebase_id, Some(session_id), "and what does it return?")
            .await
            .expect("stream");
        let events = collect(second).await;
        assert!(
            !events.iter().any(|e| matches!(e, QueryEvent::SessionId { .. })),
            "resumed session must not re-announce its id"
        );

        let prompts = fx.llm.seen_messages.lock();
        let follow_up = &prompts[1];
        let all_text: String = follow_up.iter().map(|m| m.content.clone()).collect();
        assert!(all_text.contains("Where is foo?"));
        assert!(all_text.contains("answer"));
    }

    #[tokio::test]
    async fn test_query_against_unqueryable_codebase_is_domain_error() {
        let registry = Arc::new(CodebaseRegistry::in_memory().expect("registry"));
        let cb = registry
            .create("demo", None, OriginKind::Archive, "hash", 0, None)
            .expect("create");
        registry.mark_failed(cb.id, "embedding budget exhausted").expect("fail");

        let embedder = Arc::new(EmbeddingClient::new(Arc::new(HashEmbedder), None, 100));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::new(FlatVectorStore::in_memory()),
            embedder,
            RetrievalConfig::default(),
        ));
        let agent = QueryAgent::new(
            retrieval,
            Arc::new(ScriptedLlm::new(&["x"])),
            Arc::new(SessionStore::new(3600)),
            registry,
            &LlmConfig::default(),
            &RetrievalConfig::default(),
        );

        let result = agent.query(cb.id, None, "anything").await;
        assert!(matches!(result, Err(CodedocError::NotQueryable { .. })));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let fx = fixture(&["x"], |_| Vec::new()).await;
        let result = fx.agent.query(fx.codebase_id, None, "   ").await;
        assert!(matches!(result, Err(CodedocError::MalformedQuery { .. })));
    }

    #[tokio::test]
    async fn test_session_cannot_cross_codebases() {
        let fx = fixture(&["x"], |_| Vec::new()).await;
        let other = fixture(&["x"], |_| Vec::new()).await;

        let stream = fx
            .agent
            .query(fx.codebase_id, None, "q1")
            .await
            .expect("stream");
        let events = collect(stream).await;
        let session_id = events
            .iter()
            .find_map(|e| match e {
                QueryEvent::SessionId { session_id } => Some(*session_id),
                _ => None,
            })
            .expect("session id");

        // The other agent's session store has no such session at all;
        // same-store cross-codebase reuse is rejected as malformed.
        let result = other.agent.query(other.codebase_id, Some(session_id), "q2").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_contextualize_orders_and_truncates() {
        let cb = Uuid::new_v4();
        let make = |path: &str, score: f64, tokens: u32| RetrievedChunk {
            chunk: Chunk {
                id: chunk_id(cb, path, 1, 10, ChunkKind::Function),
                codebase_id: cb,
                file_path: path.into(),
                line_start: 1,
                line_end: 10,
                kind: ChunkKind::Function,
                name: "f".into(),
                language: Language::Python,
                content: "x".repeat((tokens * 4) as usize),
                dependencies: Vec::new(),
                docstring: None,
                parent_class: None,
                token_count: tokens,
            },
            score,
            dense_score: score,
            sparse_score: 0.0,
            snippet: String::new(),
        };

        let retrieved = vec![make("best.py", 0.9, 100), make("worst.py", 0.1, 100)];
        let block = contextualize(&retrieved, 120);
        assert!(block.contains("best.py:1-10"));
        assert!(!block.contains("worst.py"), "over-budget chunk must drop");

        let empty = contextualize(&[], 1000);
        assert_eq!(empty, prompt::EMPTY_CONTEXT);
    }
}
