//! Engine facade.
//!
//! Wires every subsystem together behind one handle: the registry,
//! vector store, embedding and LLM clients, session store, retrieval
//! engine, query agent, and the ingestion workflows. Collaborators are
//! held behind trait objects so tests substitute in-process fakes.
//!
//! Control flow: an upload creates a codebase record, stages the
//! archive content-addressed, and launches an ingestion workflow
//! identified by the codebase id. A query opens or resumes a session
//! and streams agent events to the caller. Delete cancels any running
//! workflow, then removes vectors, sessions, staging, and the record.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::QueryAgent;
use crate::config::Config;
use crate::embedder::EmbeddingClient;
use crate::error::{CodedocError, CodedocResult};
use crate::ingest::{staging, IngestWorkflow};
use crate::llm::{HttpLlmClient, LlmClient};
use crate::registry::CodebaseRegistry;
use crate::retrieval::RetrievalEngine;
use crate::session::SessionStore;
use crate::types::{Codebase, OriginKind, QueryEvent, StatusProjection};
use crate::vector::{FlatVectorStore, VectorStore};

struct WorkflowHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// The top-level engine owning all subsystems.
pub struct Engine {
    config: Config,
    registry: Arc<CodebaseRegistry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingClient>,
    sessions: Arc<SessionStore>,
    agent: QueryAgent,
    workflows: DashMap<Uuid, WorkflowHandle>,
}

impl Engine {
    /// Build an engine from configuration, using the HTTP providers and
    /// the flat vector store.
    pub fn new(config: Config) -> CodedocResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store: Arc<dyn VectorStore> =
            Arc::new(FlatVectorStore::open(&config.vector_snapshot_path())?);
        let embedder = Arc::new(EmbeddingClient::from_config(&config.embedding)?);
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::from_config(&config.llm)?);
        Self::with_providers(config, store, embedder, llm)
    }

    /// Build an engine with explicit provider handles (test substitution).
    pub fn with_providers(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
    ) -> CodedocResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let registry = Arc::new(CodebaseRegistry::open(&config.registry_path())?);
        let sessions = Arc::new(SessionStore::new(config.session.ttl_seconds));

        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            config.retrieval.clone(),
        ));
        let agent = QueryAgent::new(
            retrieval,
            llm,
            sessions.clone(),
            registry.clone(),
            &config.llm,
            &config.retrieval,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            "engine initialized"
        );

        Ok(Self {
            config,
            registry,
            store,
            embedder,
            sessions,
            agent,
            workflows: DashMap::new(),
        })
    }

    /// Register an uploaded archive and launch its ingestion workflow.
    ///
    /// Admission checks: the name must be a recognised archive format
    /// and the payload must fit `max_upload_bytes` exactly (a payload
    /// of the cap size is accepted, cap + 1 is rejected).
    pub fn upload_archive(
        &self,
        name: &str,
        description: Option<&str>,
        file_name: &str,
        bytes: &[u8],
    ) -> CodedocResult<Codebase> {
        let cap = self.config.ingestion.max_upload_bytes;
        if bytes.len() as u64 > cap {
            return Err(CodedocError::UploadTooLarge {
                actual: bytes.len() as u64,
                cap,
            });
        }
        staging::validate_archive_name(file_name)?;

        let (_, hash) = staging::store_upload(&self.config.staging_dir(), bytes)?;
        let codebase = self.registry.create(
            name,
            description,
            OriginKind::Archive,
            &hash,
            bytes.len() as u64,
            None,
        )?;
        self.launch_workflow(codebase.id);
        Ok(codebase)
    }

    /// Register a remote clone origin and launch its ingestion workflow.
    pub fn register_remote(
        &self,
        name: &str,
        description: Option<&str>,
        url: &str,
    ) -> CodedocResult<Codebase> {
        staging::validate_origin_url(url)?;
        let codebase =
            self.registry
                .create(name, description, OriginKind::Remote, url, 0, None)?;
        self.launch_workflow(codebase.id);
        Ok(codebase)
    }

    fn launch_workflow(&self, codebase_id: Uuid) {
        let cancel = CancellationToken::new();
        let workflow = IngestWorkflow::new(
            self.registry.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.config.clone(),
            codebase_id,
            cancel.clone(),
        );

        let join = tokio::spawn(async move {
            if let Err(e) = workflow.run().await {
                tracing::warn!(%codebase_id, error = %e, "ingestion workflow ended with error");
            }
        });

        self.workflows
            .insert(codebase_id, WorkflowHandle { cancel, join });
    }

    /// Re-launch ingestion for a codebase (resume after restart). A
    /// completed codebase is a no-op inside the workflow.
    pub fn resume_ingestion(&self, codebase_id: Uuid) -> CodedocResult<()> {
        self.registry.get(codebase_id)?;
        if self.workflows.contains_key(&codebase_id) {
            return Ok(());
        }
        self.launch_workflow(codebase_id);
        Ok(())
    }

    /// Wait for a codebase's running workflow to finish (tests, CLI).
    pub async fn wait_for_ingestion(&self, codebase_id: Uuid) {
        if let Some((_, handle)) = self.workflows.remove(&codebase_id) {
            let _ = handle.join.await;
        }
    }

    /// The status projection read by the status endpoint.
    pub fn status(&self, codebase_id: Uuid) -> CodedocResult<StatusProjection> {
        let codebase = self.registry.get(codebase_id)?;
        Ok(StatusProjection::from_codebase(&codebase))
    }

    /// List all codebases.
    pub fn list(&self) -> CodedocResult<Vec<Codebase>> {
        self.registry.list()
    }

    /// Drive the query agent for one question, returning the event
    /// stream.
    pub async fn query(
        &self,
        codebase_id: Uuid,
        session_id: Option<Uuid>,
        question: &str,
    ) -> CodedocResult<ReceiverStream<QueryEvent>> {
        self.agent.query(codebase_id, session_id, question).await
    }

    /// Delete a codebase: cancel its workflow, then cascade to vectors,
    /// sessions, staging, and the registry record.
    pub async fn delete(&self, codebase_id: Uuid) -> CodedocResult<()> {
        let codebase = self.registry.get(codebase_id)?;

        if let Some((_, handle)) = self.workflows.remove(&codebase_id) {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }

        let removed = self.store.delete_by_codebase(codebase_id).await?;
        let sessions_removed = self.sessions.delete_by_codebase(codebase_id);
        staging::remove_staging(&self.config.staging_dir(), codebase_id);
        if codebase.origin_kind == OriginKind::Archive {
            let staged = self
                .config
                .staging_dir()
                .join("uploads")
                .join(&codebase.origin_ref);
            if staged.exists() {
                let _ = std::fs::remove_file(staged);
            }
        }
        self.registry.delete(codebase_id)?;

        tracing::info!(
            %codebase_id,
            vectors_removed = removed,
            sessions_removed,
            "codebase deleted"
        );
        Ok(())
    }

    /// Periodic session expiry sweep; returns sessions removed.
    pub async fn cleanup_sessions(&self) -> usize {
        self.sessions.cleanup_expired().await
    }

    /// Spawn the background session sweeper at the configured interval.
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        let interval = std::time::Duration::from_secs(engine.config.session.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.cleanup_sessions().await;
            }
        })
    }

    /// The shared session store handle.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The registry handle.
    pub fn registry(&self) -> &Arc<CodebaseRegistry> {
        &self.registry
    }
}
