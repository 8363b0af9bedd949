//! Vector store adapter.
//!
//! Contracts a single logical collection of chunk records behind the
//! [`VectorStore`] trait: upsert, metadata-filtered query, per-codebase
//! delete, and count. The built-in [`FlatVectorStore`] is an exact
//! cosine scan over an in-memory table with a bincode snapshot on disk;
//! remote stores plug in behind the same trait.
//!
//! The adapter guarantees that `codebase_id` filtering is exact (no
//! cross-codebase leakage) and that full chunk metadata is returned
//! with every hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodedocError, CodedocResult};
use crate::types::{Chunk, ChunkKind, Language};

/// A chunk plus its embedding, as stored in the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// The embedding vector (unit length).
    pub vector: Vec<f32>,
    /// The chunk document and metadata.
    pub chunk: Chunk,
}

/// One query hit: the chunk with its cosine distance.
#[derive(Debug, Clone)]
pub struct QueryHit {
    /// The matched chunk with full metadata.
    pub chunk: Chunk,
    /// Cosine distance in [0, 2]; similarity is `1 - distance`.
    pub distance: f32,
}

/// Conjunction of metadata constraints applied to a query.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// Restrict to one codebase. Always set by the retrieval engine.
    pub codebase_id: Option<Uuid>,
    /// Restrict to one language.
    pub language: Option<Language>,
    /// Restrict to one chunk kind.
    pub chunk_kind: Option<ChunkKind>,
    /// Restrict by file path: exact path, path prefix, or file name.
    pub file_path: Option<String>,
}

impl MetadataFilter {
    /// A filter scoped to one codebase.
    pub fn for_codebase(codebase_id: Uuid) -> Self {
        Self {
            codebase_id: Some(codebase_id),
            ..Self::default()
        }
    }

    /// Whether a chunk satisfies every set constraint.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(id) = self.codebase_id {
            if chunk.codebase_id != id {
                return false;
            }
        }
        if let Some(language) = self.language {
            if chunk.language != language {
                return false;
            }
        }
        if let Some(kind) = self.chunk_kind {
            if chunk.kind != kind {
                return false;
            }
        }
        if let Some(pattern) = &self.file_path {
            let p = chunk.file_path.as_str();
            let name_match = p
                .rsplit('/')
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(pattern));
            if !(p.starts_with(pattern.as_str()) || name_match) {
                return false;
            }
        }
        true
    }
}

/// Abstract vector collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by chunk id. Atomic per call.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> CodedocResult<()>;

    /// Return the `k` nearest records under `filter`, closest first.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> CodedocResult<Vec<QueryHit>>;

    /// Remove every record tagged with the codebase id. Returns the
    /// number of records removed.
    async fn delete_by_codebase(&self, codebase_id: Uuid) -> CodedocResult<usize>;

    /// Count records matching the filter.
    async fn count(&self, filter: &MetadataFilter) -> CodedocResult<usize>;
}

// ---------------------------------------------------------------------------
// Flat store
// ---------------------------------------------------------------------------

#[derive(Default, Serialize, Deserialize)]
struct StoreInner {
    /// Committed vector dimension (0 = uncommitted).
    dim: usize,
    /// Records keyed by chunk id.
    records: HashMap<String, ChunkRecord>,
}

/// Exact cosine-scan store with optional disk persistence.
pub struct FlatVectorStore {
    inner: RwLock<StoreInner>,
    snapshot_path: Option<PathBuf>,
}

impl FlatVectorStore {
    /// In-memory store without persistence (tests).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            snapshot_path: None,
        }
    }

    /// Open a store backed by a snapshot file, loading it if present.
    pub fn open(snapshot_path: &Path) -> CodedocResult<Self> {
        let inner = if snapshot_path.exists() {
            let bytes = std::fs::read(snapshot_path)?;
            bincode::deserialize(&bytes)
                .map_err(|e| CodedocError::Serialization(format!("vector snapshot: {e}")))?
        } else {
            StoreInner::default()
        };
        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(snapshot_path.to_path_buf()),
        })
    }

    /// Persist the current contents to the snapshot file, if configured.
    pub fn save(&self) -> CodedocResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = {
            let inner = self.inner.read();
            bincode::serialize(&*inner)
                .map_err(|e| CodedocError::Serialization(format!("vector snapshot: {e}")))?
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Number of records in the collection.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for FlatVectorStore {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> CodedocResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut inner = self.inner.write();

            // Validate the whole batch before touching the table, so the
            // call stays atomic.
            for record in &records {
                if record.vector.is_empty() {
                    return Err(CodedocError::Internal(format!(
                        "empty vector for chunk {}",
                        record.chunk.id
                    )));
                }
                if inner.dim != 0 && record.vector.len() != inner.dim {
                    return Err(CodedocError::DimensionMismatch {
                        expected: inner.dim,
                        actual: record.vector.len(),
                    });
                }
            }

            if inner.dim == 0 {
                inner.dim = records[0].vector.len();
            }
            for record in records {
                inner.records.insert(record.chunk.id.clone(), record);
            }
        }
        self.save()
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> CodedocResult<Vec<QueryHit>> {
        let inner = self.inner.read();
        if inner.dim != 0 && vector.len() != inner.dim {
            return Err(CodedocError::DimensionMismatch {
                expected: inner.dim,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<QueryHit> = inner
            .records
            .values()
            .filter(|r| filter.matches(&r.chunk))
            .map(|r| QueryHit {
                chunk: r.chunk.clone(),
                distance: 1.0 - dot(vector, &r.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_codebase(&self, codebase_id: Uuid) -> CodedocResult<usize> {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.records.len();
            inner.records.retain(|_, r| r.chunk.codebase_id != codebase_id);
            before - inner.records.len()
        };
        self.save()?;
        Ok(removed)
    }

    async fn count(&self, filter: &MetadataFilter) -> CodedocResult<usize> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter(|r| filter.matches(&r.chunk))
            .count())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk_id;

    fn record(codebase_id: Uuid, path: &str, line: u32, vector: Vec<f32>) -> ChunkRecord {
        let id = chunk_id(codebase_id, path, line, line + 5, ChunkKind::Function);
        ChunkRecord {
            vector,
            chunk: Chunk {
                id,
                codebase_id,
                file_path: path.to_string(),
                line_start: line,
                line_end: line + 5,
                kind: ChunkKind::Function,
                name: "f".into(),
                language: Language::Python,
                content: "def f(): pass".into(),
                dependencies: Vec::new(),
                docstring: None,
                parent_class: None,
                token_count: 4,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_query_roundtrip() {
        let store = FlatVectorStore::in_memory();
        let cb = Uuid::new_v4();
        store
            .upsert(vec![
                record(cb, "a.py", 1, vec![1.0, 0.0]),
                record(cb, "b.py", 1, vec![0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        let hits = store
            .query(&[1.0, 0.0], 2, &MetadataFilter::for_codebase(cb))
            .await
            .expect("query");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.file_path, "a.py");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_codebase_filter_is_exact() {
        let store = FlatVectorStore::in_memory();
        let cb1 = Uuid::new_v4();
        let cb2 = Uuid::new_v4();
        store
            .upsert(vec![
                record(cb1, "a.py", 1, vec![1.0, 0.0]),
                record(cb2, "b.py", 1, vec![1.0, 0.0]),
            ])
            .await
            .expect("upsert");

        let hits = store
            .query(&[1.0, 0.0], 10, &MetadataFilter::for_codebase(cb1))
            .await
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.codebase_id, cb1);
    }

    #[tokio::test]
    async fn test_delete_by_codebase() {
        let store = FlatVectorStore::in_memory();
        let cb1 = Uuid::new_v4();
        let cb2 = Uuid::new_v4();
        store
            .upsert(vec![
                record(cb1, "a.py", 1, vec![1.0, 0.0]),
                record(cb1, "a.py", 10, vec![0.5, 0.5]),
                record(cb2, "b.py", 1, vec![0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        let removed = store.delete_by_codebase(cb1).await.expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(
            store.count(&MetadataFilter::default()).await.expect("count"),
            1
        );
        assert_eq!(
            store
                .count(&MetadataFilter::for_codebase(cb1))
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_id() {
        let store = FlatVectorStore::in_memory();
        let cb = Uuid::new_v4();
        store
            .upsert(vec![record(cb, "a.py", 1, vec![1.0, 0.0])])
            .await
            .expect("upsert");
        store
            .upsert(vec![record(cb, "a.py", 1, vec![1.0, 0.0])])
            .await
            .expect("re-upsert");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = FlatVectorStore::in_memory();
        let cb = Uuid::new_v4();
        store
            .upsert(vec![record(cb, "a.py", 1, vec![1.0, 0.0])])
            .await
            .expect("upsert");

        let result = store
            .upsert(vec![record(cb, "c.py", 1, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(matches!(result, Err(CodedocError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_metadata_filters() {
        let store = FlatVectorStore::in_memory();
        let cb = Uuid::new_v4();
        let mut r1 = record(cb, "src/auth.py", 1, vec![1.0, 0.0]);
        r1.chunk.language = Language::Python;
        let mut r2 = record(cb, "src/main.rs", 1, vec![0.9, 0.1]);
        r2.chunk.language = Language::Rust;
        store.upsert(vec![r1, r2]).await.expect("upsert");

        let mut filter = MetadataFilter::for_codebase(cb);
        filter.language = Some(Language::Rust);
        let hits = store.query(&[1.0, 0.0], 10, &filter).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "src/main.rs");

        let mut by_name = MetadataFilter::for_codebase(cb);
        by_name.file_path = Some("auth.py".into());
        let hits = store.query(&[1.0, 0.0], 10, &by_name).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "src/auth.py");
    }

    #[tokio::test]
    async fn test_snapshot_persistence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");
        let cb = Uuid::new_v4();

        {
            let store = FlatVectorStore::open(&path).expect("open");
            store
                .upsert(vec![record(cb, "a.py", 1, vec![1.0, 0.0])])
                .await
                .expect("upsert");
        }

        let reopened = FlatVectorStore::open(&path).expect("reopen");
        assert_eq!(reopened.len(), 1);
        let hits = reopened
            .query(&[1.0, 0.0], 1, &MetadataFilter::for_codebase(cb))
            .await
            .expect("query");
        assert_eq!(hits.len(), 1);
    }
}
