//! Core domain types shared across all codedoc-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported programming languages and recognised document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// JavaScript (.js, .jsx, .mjs, .cjs)
    JavaScript,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// Rust (.rs)
    Rust,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// Markdown (.md, .mdx)
    Markdown,
    /// TOML configuration (.toml)
    Toml,
    /// YAML configuration (.yml, .yaml)
    Yaml,
    /// JSON data (.json)
    Json,
    /// Unknown / unsupported
    Unknown,
}

/// Exact-filename overrides consulted before extension matching.
const FILENAME_OVERRIDES: &[(&str, Language)] = &[
    ("Cargo.lock", Language::Toml),
    (".babelrc", Language::Json),
    (".eslintrc", Language::Json),
    ("tsconfig.json", Language::Json),
];

impl Language {
    /// Detect language from a file path: filename override table first,
    /// then extension.
    pub fn detect(path: &Path) -> Self {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            for (override_name, language) in FILENAME_OVERRIDES {
                if name == *override_name {
                    return *language;
                }
            }
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext)
    }

    /// Detect language from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "md" | "mdx" => Self::Markdown,
            "toml" => Self::Toml,
            "yml" | "yaml" => Self::Yaml,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::Markdown => "markdown",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "rust" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "markdown" => Self::Markdown,
            "toml" => Self::Toml,
            "yaml" => Self::Yaml,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Returns true if this is an AST-parseable programming language.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::Python
                | Self::JavaScript
                | Self::TypeScript
                | Self::Rust
                | Self::Go
                | Self::Java
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chunk types
// ---------------------------------------------------------------------------

/// The kind of code construct a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Free function definition.
    Function,
    /// Method inside a class (or impl block).
    Method,
    /// Whole class, struct, or interface definition.
    Class,
    /// Module preamble: imports, module docstring, top-level constants.
    Module,
    /// A block of import statements.
    ImportBlock,
    /// Unstructured or fallback content.
    Other,
}

impl ChunkKind {
    /// Convert to the metadata string stored with each vector.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
            Self::ImportBlock => "import_block",
            Self::Other => "other",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "function" => Self::Function,
            "method" => Self::Method,
            "class" => Self::Class,
            "module" => Self::Module,
            "import_block" => Self::ImportBlock,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed unit of code with its metadata.
///
/// Content is always post-redaction; chunks are never mutated after
/// creation and are destroyed only by codebase delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: hex SHA-256 over
    /// `(codebase_id, file_path, line_start, line_end, kind)`.
    pub id: String,
    /// Owning codebase.
    pub codebase_id: Uuid,
    /// Path relative to the codebase root, forward slashes.
    pub file_path: String,
    /// Starting line number (1-indexed).
    pub line_start: u32,
    /// Ending line number (1-indexed, inclusive).
    pub line_end: u32,
    /// What kind of code construct this is.
    #[serde(rename = "chunk_type")]
    pub kind: ChunkKind,
    /// Symbolic name (function identifier, class name, or file stem).
    pub name: String,
    /// Language of the source file.
    pub language: Language,
    /// Redacted source content of this chunk.
    pub content: String,
    /// Imports referenced by this chunk.
    pub dependencies: Vec<String>,
    /// Extracted doc comment, if any.
    pub docstring: Option<String>,
    /// Enclosing class name, for methods.
    pub parent_class: Option<String>,
    /// Estimated token count.
    pub token_count: u32,
}

/// Compute the deterministic chunk id.
///
/// Stable across re-ingestions of identical content, which makes
/// re-run upserts idempotent.
pub fn chunk_id(
    codebase_id: Uuid,
    file_path: &str,
    line_start: u32,
    line_end: u32,
    kind: ChunkKind,
) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(codebase_id.as_bytes());
    hasher.update(b"|");
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(line_start.to_le_bytes());
    hasher.update(line_end.to_le_bytes());
    hasher.update(kind.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Codebase
// ---------------------------------------------------------------------------

/// Where a codebase's source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Uploaded archive, staged content-addressed.
    Archive,
    /// Remote clone URL.
    Remote,
}

impl OriginKind {
    /// Convert to a stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Remote => "remote",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "remote" => Self::Remote,
            _ => Self::Archive,
        }
    }
}

/// Lifecycle status of a codebase.
///
/// Advances monotonically queued → processing → {completed | failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    /// Created, ingestion not yet running (or awaiting a rate-limited provider).
    Queued,
    /// Ingestion in progress.
    Processing,
    /// Ingestion finished; counts frozen.
    Completed,
    /// Ingestion failed terminally; error string retained.
    Failed,
}

impl CodebaseStatus {
    /// Convert to a stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

impl std::fmt::Display for CodebaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ingestion step a workflow is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStep {
    /// Verifying archive integrity or URL reachability.
    Validating,
    /// Extracting the archive or cloning the remote.
    Cloning,
    /// Scanning and parsing files.
    Parsing,
    /// Producing chunks from parsed regions.
    Chunking,
    /// Generating embeddings.
    Embedding,
    /// Upserting chunks into the vector store.
    Indexing,
    /// Terminal marker once finalised.
    Complete,
}

impl IngestStep {
    /// Convert to a stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Cloning => "cloning",
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
            Self::Complete => "complete",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "validating" => Some(Self::Validating),
            "cloning" => Some(Self::Cloning),
            "parsing" => Some(Self::Parsing),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "indexing" => Some(Self::Indexing),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Per-file secret detection summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSecretSummary {
    /// Path relative to the codebase root.
    pub file_path: String,
    /// Total secrets redacted in this file.
    pub secret_count: u32,
    /// Distinct secret types found.
    pub types: Vec<String>,
}

/// A logical unit of indexed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    /// Opaque id.
    pub id: Uuid,
    /// Human name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Origin kind.
    pub origin_kind: OriginKind,
    /// Origin reference: archive content hash or clone URL.
    pub origin_ref: String,
    /// Lifecycle status.
    pub status: CodebaseStatus,
    /// Step the ingestion workflow is currently in.
    pub current_step: Option<IngestStep>,
    /// Total files in the manifest.
    pub total_files: u32,
    /// Files whose chunks have committed to the vector store.
    pub processed_files: u32,
    /// Most common detected language.
    pub primary_language: Option<Language>,
    /// Full set of detected languages.
    pub languages: Vec<Language>,
    /// Byte size of the staged source.
    pub size_bytes: u64,
    /// Identifier of the launched ingestion workflow.
    pub workflow_id: Option<String>,
    /// Staging directory for this codebase.
    pub staging_path: Option<PathBuf>,
    /// Total secrets redacted across all files.
    pub secrets_detected: u32,
    /// Per-file secret summary.
    pub secret_summary: Vec<FileSecretSummary>,
    /// Terminal error string for failed codebases.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// When ingestion started.
    pub started_at: Option<DateTime<Utc>>,
    /// When ingestion completed.
    pub completed_at: Option<DateTime<Utc>>,
}

/// The status view read by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusProjection {
    /// The codebase id.
    pub codebase_id: Uuid,
    /// Lifecycle status.
    pub status: CodebaseStatus,
    /// Completion percentage in [0, 100].
    pub progress: u8,
    /// Total files in the manifest.
    pub total_files: u32,
    /// Files fully indexed.
    pub processed_files: u32,
    /// Current ingestion step, if running.
    pub current_step: Option<IngestStep>,
    /// Terminal error, if failed.
    pub error: Option<String>,
    /// Secret summary, once scanning has run.
    pub secrets_detected: Option<Vec<FileSecretSummary>>,
    /// When ingestion started.
    pub started_at: Option<DateTime<Utc>>,
    /// When ingestion completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusProjection {
    /// Build the projection from a codebase record.
    pub fn from_codebase(cb: &Codebase) -> Self {
        let progress = match cb.status {
            CodebaseStatus::Completed => 100,
            _ if cb.total_files == 0 => 0,
            _ => ((cb.processed_files as u64 * 100) / cb.total_files as u64).min(100) as u8,
        };
        Self {
            codebase_id: cb.id,
            status: cb.status,
            progress,
            total_files: cb.total_files,
            processed_files: cb.processed_files,
            current_step: cb.current_step,
            error: cb.error.clone(),
            secrets_detected: if cb.secret_summary.is_empty() {
                None
            } else {
                Some(cb.secret_summary.clone())
            },
            started_at: cb.started_at,
            completed_at: cb.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation types
// ---------------------------------------------------------------------------

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The querying user.
    User,
    /// The assistant.
    Assistant,
}

/// A reference from an assistant answer back to source coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// File path the citation points at.
    pub file_path: String,
    /// Starting line (1-indexed).
    pub line_start: u32,
    /// Ending line (1-indexed, inclusive).
    pub line_end: u32,
    /// Retrieval confidence of the backing chunk, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Short code snippet, whole-line aligned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// One turn in a session. Immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: Uuid,
    /// Author role.
    pub role: Role,
    /// Textual content.
    pub content: String,
    /// Insertion timestamp.
    pub timestamp: DateTime<Utc>,
    /// Validated citations (assistant messages only).
    pub citations: Vec<Citation>,
    /// Ids of the chunks retrieved for this turn (assistant messages only).
    pub retrieved_chunk_ids: Vec<String>,
    /// Estimated token count.
    pub token_count: u32,
}

impl Message {
    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = (content.len() / 4) as u32;
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content,
            timestamp: Utc::now(),
            citations: Vec::new(),
            retrieved_chunk_ids: Vec::new(),
            token_count,
        }
    }

    /// Build an assistant message.
    pub fn assistant(
        content: impl Into<String>,
        citations: Vec<Citation>,
        retrieved_chunk_ids: Vec<String>,
    ) -> Self {
        let content = content.into();
        let token_count = (content.len() / 4) as u32;
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            citations,
            retrieved_chunk_ids,
            token_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Query stream events
// ---------------------------------------------------------------------------

/// Events produced by the query agent, consumed by the transport layer.
///
/// Serialised as JSON objects with a `type` discriminator; the event
/// order is: optional `session_id`, zero or more `chunk`, exactly one
/// `sources`, then `done` — or a terminal `error` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    /// Emitted first when a new session was allocated.
    SessionId {
        /// The allocated session id.
        session_id: Uuid,
    },
    /// A generation token (or token group) in order.
    Chunk {
        /// Token text.
        content: String,
    },
    /// The validated citation list, emitted exactly once after validation.
    Sources {
        /// Surviving citations.
        sources: Vec<Citation>,
    },
    /// Terminal marker.
    Done,
    /// Terminal alternative to `done`.
    Error {
        /// Error description.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Retrieval types
// ---------------------------------------------------------------------------

/// A retrieved chunk with its fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Fused relevance score.
    pub score: f64,
    /// Dense (cosine similarity) component in [0, 1].
    pub dense_score: f64,
    /// Sparse (BM25, min-max normalised) component in [0, 1].
    pub sparse_score: f64,
    /// Short snippet, whole-line aligned, at most 400 characters.
    pub snippet: String,
}
