//! Error types for codedoc-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the failure class. The taxonomy mirrors the propagation policy:
//! per-file errors are absorbed inside the ingestion workflow, transient
//! external errors are retried, everything else surfaces at the nearest
//! boundary (activity, agent stage, engine API).

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all codedoc-core operations.
#[derive(Debug, Error)]
pub enum CodedocError {
    // ---- Input validation (rejected at admission, not logged as faults) ----
    /// The uploaded archive exceeds the configured size cap.
    #[error("upload too large: {actual} bytes exceeds cap of {cap} bytes")]
    UploadTooLarge {
        /// Size of the rejected upload.
        actual: u64,
        /// Configured maximum.
        cap: u64,
    },

    /// The archive format was not recognised.
    #[error("unrecognised archive format: {name}")]
    UnrecognisedArchive {
        /// File name of the rejected archive.
        name: String,
    },

    /// The origin URL could not be parsed or is not a supported scheme.
    #[error("malformed origin URL: {url}")]
    MalformedOrigin {
        /// The offending URL.
        url: String,
    },

    /// A request referenced a codebase id that does not exist.
    #[error("unknown codebase: {id}")]
    UnknownCodebase {
        /// The unknown id.
        id: String,
    },

    /// A request referenced a session that does not exist or has expired.
    #[error("unknown or expired session: {id}")]
    UnknownSession {
        /// The unknown id.
        id: String,
    },

    /// A query was empty or otherwise malformed.
    #[error("malformed query: {reason}")]
    MalformedQuery {
        /// What is wrong with the query.
        reason: String,
    },

    /// The target codebase is not in a queryable state.
    #[error("codebase {id} is not queryable: status is {status}")]
    NotQueryable {
        /// The codebase id.
        id: String,
        /// Its current status.
        status: String,
    },

    // ---- Transient external (retried with backoff) ----
    /// A provider rate-limited the request. Retryable.
    #[error("{provider} rate limited: {message}")]
    RateLimited {
        /// Which provider pushed back.
        provider: String,
        /// Provider message, if any.
        message: String,
    },

    /// A provider returned a server-side error. Retryable.
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable {
        /// Which provider failed.
        provider: String,
        /// Error detail.
        message: String,
    },

    // ---- Skippable per-file (recorded as warnings, ingestion continues) ----
    /// A single file failed to parse. The rest of the codebase is fine.
    #[error("parse error for {path}: {message}")]
    Parse {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    // ---- Terminal ingestion ----
    /// The retry budget for an activity was exhausted.
    #[error("retry budget exhausted for {activity}: {last_error}")]
    RetryBudgetExhausted {
        /// Name of the failing activity.
        activity: String,
        /// The last error observed before giving up.
        last_error: String,
    },

    /// Staged content is missing or corrupted.
    #[error("staging corrupted for codebase {id}: {details}")]
    StagingCorrupted {
        /// The codebase id.
        id: String,
        /// Diagnostic detail.
        details: String,
    },

    /// An ingestion workflow was cancelled (typically by delete).
    #[error("ingestion cancelled for codebase {id}")]
    Cancelled {
        /// The codebase id.
        id: String,
    },

    // ---- Provider contract violations ----
    /// Embedding dimensionality does not match the collection's committed dimension.
    #[error("embedding dimension mismatch: collection is {expected}, provider produced {actual}")]
    DimensionMismatch {
        /// Dimension the collection committed to.
        expected: usize,
        /// Dimension the provider returned.
        actual: usize,
    },

    /// A provider returned a payload that violates its contract.
    #[error("{provider} protocol error: {message}")]
    ProviderProtocol {
        /// Which provider misbehaved.
        provider: String,
        /// What was wrong with the payload.
        message: String,
    },

    // ---- Query runtime ----
    /// The concurrent-query admission limit was hit. The caller should back off.
    #[error("too many concurrent queries (limit {limit})")]
    TooManyQueries {
        /// The configured limit.
        limit: usize,
    },

    /// LLM generation failed mid-stream.
    #[error("generation failed: {message}")]
    Generation {
        /// Error detail.
        message: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("registry error: {0}")]
    Registry(#[from] rusqlite::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    /// Generic internal error for unexpected conditions. Bug class: fail fast.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CodedocError {
    /// Whether the retry layer may re-attempt the failed operation.
    ///
    /// Rate limits and provider 5xx are transient; HTTP transport errors
    /// (connection reset, timeout) are treated the same way. Everything
    /// else propagates immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ProviderUnavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Whether this error is a rate-limit push-back specifically.
    ///
    /// The ingestion workflow flips the codebase status to `queued`
    /// while awaiting a rate-limited provider.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<serde_json::Error> for CodedocError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for Results in codedoc-core.
pub type CodedocResult<T> = Result<T, CodedocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let rl = CodedocError::RateLimited {
            provider: "embeddings".into(),
            message: "429".into(),
        };
        assert!(rl.is_transient());
        assert!(rl.is_rate_limit());

        let unavailable = CodedocError::ProviderUnavailable {
            provider: "llm".into(),
            message: "503".into(),
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_rate_limit());

        let validation = CodedocError::UploadTooLarge { actual: 10, cap: 5 };
        assert!(!validation.is_transient());
    }

    #[test]
    fn test_display_includes_detail() {
        let e = CodedocError::UnknownCodebase { id: "abc".into() };
        assert!(e.to_string().contains("abc"));
    }
}
