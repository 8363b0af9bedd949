//! Hybrid retrieval engine.
//!
//! Fuses a dense arm (embedding similarity against the vector store)
//! with a sparse arm (BM25 over the dense candidate pool) into a single
//! ranked result set:
//!
//! 1. Embed the query; fetch `k_dense` candidates under the codebase
//!    filter (plus any explicit metadata filters).
//! 2. Normalise cosine distance to similarity in [0, 1].
//! 3. BM25-score the candidates' content, min-max normalised.
//! 4. `final = dense_weight · dense + (1 - dense_weight) · sparse`.
//! 5. Tie-break: higher dense similarity, then lexicographically smaller
//!    file path, then smaller line start.
//!
//! An empty candidate pool or an all-zero score set yields an empty
//! result list, not an error.

pub mod bm25;

use std::sync::Arc;

use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedder::EmbeddingClient;
use crate::error::CodedocResult;
use crate::types::{ChunkKind, Language, RetrievedChunk};
use crate::vector::{MetadataFilter, VectorStore};

/// Explicit filters extracted from the query text (§ agent analyse stage).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    /// Restrict to one language.
    pub language: Option<Language>,
    /// Restrict to a file (exact path, prefix, or file name).
    pub file_path: Option<String>,
    /// Restrict to one chunk kind.
    pub chunk_kind: Option<ChunkKind>,
}

impl QueryFilters {
    /// Whether any filter is set.
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.file_path.is_none() && self.chunk_kind.is_none()
    }
}

/// Maximum snippet length in characters, whole-line aligned.
const SNIPPET_MAX_CHARS: usize = 400;

/// Hybrid dense + sparse retrieval over the vector store.
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingClient>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Build the engine over store and embedder handles.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Retrieve the top-K chunks for a query within one codebase.
    pub async fn retrieve(
        &self,
        query: &str,
        codebase_id: Uuid,
        filters: &QueryFilters,
    ) -> CodedocResult<Vec<RetrievedChunk>> {
        let mut where_clause = MetadataFilter::for_codebase(codebase_id);
        where_clause.language = filters.language;
        where_clause.chunk_kind = filters.chunk_kind;
        where_clause.file_path = filters.file_path.clone();

        // Dense arm.
        let query_vector = self.embedder.embed_one(query).await?;
        let hits = self
            .store
            .query(&query_vector, self.config.k_dense, &where_clause)
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Sparse arm over the candidate pool.
        let documents: Vec<&str> = hits.iter().map(|h| h.chunk.content.as_str()).collect();
        let scorer = bm25::Bm25::new(&documents);
        let sparse_scores = scorer.normalized_scores(query);

        let dense_weight = self.config.dense_weight;
        let sparse_weight = 1.0 - dense_weight;

        let mut results: Vec<RetrievedChunk> = hits
            .into_iter()
            .zip(sparse_scores)
            .map(|(hit, sparse)| {
                let dense = f64::from(1.0 - hit.distance).clamp(0.0, 1.0);
                let snippet = make_snippet(&hit.chunk.content);
                RetrievedChunk {
                    score: dense_weight * dense + sparse_weight * sparse,
                    dense_score: dense,
                    sparse_score: sparse,
                    snippet,
                    chunk: hit.chunk,
                }
            })
            .collect();

        if results.iter().all(|r| r.score <= f64::EPSILON) {
            return Ok(Vec::new());
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.dense_score
                        .partial_cmp(&a.dense_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.line_start.cmp(&b.chunk.line_start))
        });
        results.truncate(self.config.k_final);

        tracing::debug!(
            query_len = query.len(),
            %codebase_id,
            results = results.len(),
            top_score = results.first().map(|r| r.score).unwrap_or(0.0),
            "retrieval complete"
        );

        Ok(results)
    }
}

/// First whole lines of content, at most [`SNIPPET_MAX_CHARS`] characters.
fn make_snippet(content: &str) -> String {
    let mut snippet = String::new();
    for line in content.lines() {
        if !snippet.is_empty() && snippet.len() + line.len() + 1 > SNIPPET_MAX_CHARS {
            break;
        }
        if !snippet.is_empty() {
            snippet.push('\n');
        }
        if snippet.len() + line.len() > SNIPPET_MAX_CHARS {
            break;
        }
        snippet.push_str(line);
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingProvider;
    use crate::types::{chunk_id, Chunk};
    use crate::vector::{ChunkRecord, FlatVectorStore};
    use async_trait::async_trait;

    /// Embeds text as a bag-of-characters histogram so related texts get
    /// related vectors. Deterministic, 26 dimensions.
    struct HistogramEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HistogramEmbedder {
        fn name(&self) -> &str {
            "histogram"
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

    fn chunk(codebase_id: Uuid, path: &str, line: u32, name: &str, content: &str) -> Chunk {
        Chunk {
            id: chunk_id(codebase_id, path, line, line + 9, ChunkKind::Function),
            codebase_id,
            file_path: path.to_string(),
            line_start: line,
            line_end: line + 9,
            kind: ChunkKind::Function,
            name: name.to_string(),
            language: Language::Python,
            content: content.to_string(),
            dependencies: Vec::new(),
            docstring: None,
            parent_class: None,
            token_count: 10,
        }
    }

    async fn engine_with(
        chunks: Vec<Chunk>,
    ) -> (RetrievalEngine, Arc<EmbeddingClient>) {
        let embedder = Arc::new(EmbeddingClient::new(Arc::new(HistogramEmbedder), None, 100));
        let store = Arc::new(FlatVectorStore::in_memory());

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await.expect("embed");
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord { vector, chunk })
            .collect();
        store.upsert(records).await.expect("upsert");

        (
            RetrievalEngine::new(store, embedder.clone(), RetrievalConfig::default()),
            embedder,
        )
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_first() {
        let cb = Uuid::new_v4();
        let (engine, _) = engine_with(vec![
            chunk(cb, "auth.py", 1, "validate_token", "def validate_token(token): return jwt_decode(token)"),
            chunk(cb, "draw.py", 1, "render", "def render(canvas): canvas.fill(0, 0)"),
        ])
        .await;

        let results = engine
            .retrieve("validate_token", cb, &QueryFilters::default())
            .await
            .expect("retrieve");
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.name, "validate_token");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_empty_codebase_returns_empty() {
        let cb = Uuid::new_v4();
        let (engine, _) = engine_with(vec![]).await;
        let results = engine
            .retrieve("anything", cb, &QueryFilters::default())
            .await
            .expect("retrieve");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_language_filter_applied() {
        let cb = Uuid::new_v4();
        let mut rust_chunk = chunk(cb, "main.rs", 1, "main", "fn main() { run_server(); }");
        rust_chunk.language = Language::Rust;
        let (engine, _) = engine_with(vec![
            chunk(cb, "main.py", 1, "main", "def main(): run_server()"),
            rust_chunk,
        ])
        .await;

        let filters = QueryFilters {
            language: Some(Language::Rust),
            ..QueryFilters::default()
        };
        let results = engine.retrieve("main run server", cb, &filters).await.expect("retrieve");
        assert!(results.iter().all(|r| r.chunk.language == Language::Rust));
    }

    #[tokio::test]
    async fn test_fewer_than_k_returns_all() {
        let cb = Uuid::new_v4();
        let (engine, _) = engine_with(vec![chunk(
            cb,
            "a.py",
            1,
            "solo",
            "def solo(): return 42",
        )])
        .await;
        let results = engine
            .retrieve("solo", cb, &QueryFilters::default())
            .await
            .expect("retrieve");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_snippet_is_line_aligned_and_bounded() {
        let long_line = "x".repeat(150);
        let content = format!("{long_line}\n{long_line}\n{long_line}\n{long_line}");
        let snippet = make_snippet(&content);
        assert!(snippet.len() <= SNIPPET_MAX_CHARS);
        assert_eq!(snippet.lines().count(), 2);
    }
}
