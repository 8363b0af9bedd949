//! SQLite-backed codebase registry.
//!
//! Persistent store for codebase records and their ingestion state.
//! A coarse mutex guards the connection: creates and deletes are rare,
//! and progress updates are single-row writes.
//!
//! ## Lifecycle invariants
//!
//! Status advances queued → processing → {completed | failed}. The one
//! sanctioned backward edge is processing → queued while the workflow
//! awaits a rate-limited provider. Terminal states are frozen: updates
//! against a completed or failed codebase are dropped with a warning.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::error::{CodedocError, CodedocResult};
use crate::types::{
    Codebase, CodebaseStatus, FileSecretSummary, IngestStep, Language, OriginKind,
};

/// SQLite-backed registry of codebases.
pub struct CodebaseRegistry {
    conn: Mutex<Connection>,
}

impl CodebaseRegistry {
    /// Open or create a registry database at the given path.
    pub fn open(db_path: &Path) -> CodedocResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let registry = Self { conn: Mutex::new(conn) };
        registry.ensure_schema()?;
        Ok(registry)
    }

    /// In-memory registry for tests.
    pub fn in_memory() -> CodedocResult<Self> {
        let registry = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        registry.ensure_schema()?;
        Ok(registry)
    }

    fn ensure_schema(&self) -> CodedocResult<()> {
        self.conn.lock().execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Create a codebase record in `queued` state.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
        origin_kind: OriginKind,
        origin_ref: &str,
        size_bytes: u64,
        staging_path: Option<&Path>,
    ) -> CodedocResult<Codebase> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn.lock().execute(
            "INSERT INTO codebases
                (id, name, description, origin_kind, origin_ref, status,
                 size_bytes, staging_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?7, ?8, ?8)",
            params![
                id.to_string(),
                name,
                description,
                origin_kind.as_str(),
                origin_ref,
                size_bytes as i64,
                staging_path.map(|p| p.display().to_string()),
                now.to_rfc3339(),
            ],
        )?;
        tracing::info!(codebase_id = %id, name, "codebase created");
        self.get(id)
    }

    /// Fetch one codebase.
    pub fn get(&self, id: Uuid) -> CodedocResult<Codebase> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM codebases WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => row_to_codebase(row),
            None => Err(CodedocError::UnknownCodebase { id: id.to_string() }),
        }
    }

    /// List all codebases, most recent first.
    pub fn list(&self) -> CodedocResult<Vec<Codebase>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM codebases ORDER BY created_at DESC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_codebase(row)?);
        }
        Ok(out)
    }

    /// Set the lifecycle status. Terminal states are frozen.
    pub fn set_status(&self, id: Uuid, status: CodebaseStatus) -> CodedocResult<()> {
        let current = self.get(id)?.status;
        if matches!(current, CodebaseStatus::Completed | CodebaseStatus::Failed) {
            tracing::warn!(
                codebase_id = %id,
                current = %current,
                requested = %status,
                "ignoring status update on terminal codebase"
            );
            return Ok(());
        }
        self.update(id, "status = ?2", &[&status.as_str()])
    }

    /// Update the workflow's current step.
    pub fn set_step(&self, id: Uuid, step: IngestStep) -> CodedocResult<()> {
        self.update(id, "current_step = ?2", &[&step.as_str()])
    }

    /// Mark ingestion started: status `processing`, `started_at` stamped
    /// once.
    pub fn mark_started(&self, id: Uuid) -> CodedocResult<()> {
        self.set_status(id, CodebaseStatus::Processing)?;
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "UPDATE codebases SET started_at = COALESCE(started_at, ?2), updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), now],
        )?;
        Ok(())
    }

    /// Record manifest size.
    pub fn set_total_files(&self, id: Uuid, total: u32) -> CodedocResult<()> {
        self.update(id, "total_files = ?2", &[&(total as i64)])
    }

    /// Atomic progress update. `processed` never exceeds the stored
    /// total.
    pub fn set_processed_files(&self, id: Uuid, processed: u32) -> CodedocResult<()> {
        self.conn.lock().execute(
            "UPDATE codebases
             SET processed_files = MIN(?2, total_files), updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), processed as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the detected language set.
    pub fn set_languages(
        &self,
        id: Uuid,
        primary: Option<Language>,
        languages: &[Language],
    ) -> CodedocResult<()> {
        let json = serde_json::to_string(languages)?;
        self.conn.lock().execute(
            "UPDATE codebases
             SET primary_language = ?2, languages = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                primary.map(|l| l.as_str()),
                json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record the aggregate secret summary.
    pub fn set_secret_summary(
        &self,
        id: Uuid,
        total: u32,
        summary: &[FileSecretSummary],
    ) -> CodedocResult<()> {
        let json = serde_json::to_string(summary)?;
        self.conn.lock().execute(
            "UPDATE codebases
             SET secrets_detected = ?2, secret_summary = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id.to_string(), total as i64, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the launched workflow id.
    pub fn set_workflow_id(&self, id: Uuid, workflow_id: &str) -> CodedocResult<()> {
        self.update(id, "workflow_id = ?2", &[&workflow_id])
    }

    /// Record the staging directory.
    pub fn set_staging_path(&self, id: Uuid, staging_path: &Path) -> CodedocResult<()> {
        let text = staging_path.display().to_string();
        self.update(id, "staging_path = ?2", &[&text.as_str()])
    }

    /// Terminal success: freeze counts, stamp `completed_at`.
    pub fn mark_completed(&self, id: Uuid) -> CodedocResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "UPDATE codebases
             SET status = 'completed', current_step = 'complete',
                 processed_files = total_files,
                 completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id.to_string(), now],
        )?;
        Ok(())
    }

    /// Terminal failure: retain the error string.
    pub fn mark_failed(&self, id: Uuid, error: &str) -> CodedocResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "UPDATE codebases
             SET status = 'failed', error = ?2, completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status != 'completed'",
            params![id.to_string(), error, now],
        )?;
        Ok(())
    }

    /// Remove a codebase record.
    pub fn delete(&self, id: Uuid) -> CodedocResult<()> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM codebases WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(CodedocError::UnknownCodebase { id: id.to_string() });
        }
        tracing::info!(codebase_id = %id, "codebase deleted");
        Ok(())
    }

    fn update(
        &self,
        id: Uuid,
        set_clause: &str,
        extra: &[&dyn rusqlite::ToSql],
    ) -> CodedocResult<()> {
        let sql = format!(
            "UPDATE codebases SET {set_clause}, updated_at = ?{} WHERE id = ?1",
            extra.len() + 2
        );
        let id_text = id.to_string();
        let now = Utc::now().to_rfc3339();
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&id_text];
        params_vec.extend_from_slice(extra);
        params_vec.push(&now);
        self.conn.lock().execute(&sql, params_vec.as_slice())?;
        Ok(())
    }
}

fn row_to_codebase(row: &Row<'_>) -> CodedocResult<Codebase> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|e| CodedocError::Internal(format!("corrupt codebase id {id_text}: {e}")))?;

    let origin_kind: String = row.get("origin_kind")?;
    let status: String = row.get("status")?;
    let current_step: Option<String> = row.get("current_step")?;
    let primary_language: Option<String> = row.get("primary_language")?;
    let languages_json: String = row.get("languages")?;
    let secret_summary_json: String = row.get("secret_summary")?;
    let staging_path: Option<String> = row.get("staging_path")?;

    Ok(Codebase {
        id,
        name: row.get("name")?,
        description: row.get("description")?,
        origin_kind: OriginKind::from_str_lossy(&origin_kind),
        origin_ref: row.get("origin_ref")?,
        status: CodebaseStatus::from_str_lossy(&status),
        current_step: current_step.as_deref().and_then(IngestStep::from_str_lossy),
        total_files: row.get::<_, i64>("total_files")? as u32,
        processed_files: row.get::<_, i64>("processed_files")? as u32,
        primary_language: primary_language.as_deref().map(Language::from_str_lossy),
        languages: serde_json::from_str(&languages_json).unwrap_or_default(),
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        workflow_id: row.get("workflow_id")?,
        staging_path: staging_path.map(std::path::PathBuf::from),
        secrets_detected: row.get::<_, i64>("secrets_detected")? as u32,
        secret_summary: serde_json::from_str(&secret_summary_json).unwrap_or_default(),
        error: row.get("error")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        started_at: parse_optional_timestamp(row, "started_at")?,
        completed_at: parse_optional_timestamp(row, "completed_at")?,
    })
}

fn parse_timestamp(row: &Row<'_>, column: &str) -> CodedocResult<DateTime<Utc>> {
    let text: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CodedocError::Internal(format!("corrupt timestamp in {column}: {e}")))
}

fn parse_optional_timestamp(row: &Row<'_>, column: &str) -> CodedocResult<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(column)?;
    match text {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| CodedocError::Internal(format!("corrupt timestamp in {column}: {e}"))),
    }
}
