//! Workflow activity journal.
//!
//! Durability is an explicit event log: every completed activity
//! appends its result to `journal.jsonl` inside the codebase's staging
//! directory. A re-instantiated workflow replays the journal and
//! resumes at the first unrecorded activity. Activities are pure with
//! respect to their recorded inputs, so replay is deterministic.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodedocResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    activity: String,
    result: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

/// Append-only journal of completed activities for one workflow.
pub struct ActivityJournal {
    path: PathBuf,
    entries: HashMap<String, serde_json::Value>,
}

impl ActivityJournal {
    /// Open the journal, replaying any existing entries.
    pub fn open(path: &Path) -> CodedocResult<Self> {
        let mut entries = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => {
                        entries.insert(entry.activity, entry.result);
                    }
                    Err(e) => {
                        // A torn tail line from a crash mid-append is
                        // expected; the activity simply re-runs.
                        tracing::warn!(error = %e, "skipping corrupt journal line");
                    }
                }
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// The recorded result of an activity, if it already completed.
    pub fn get<T: DeserializeOwned>(&self, activity: &str) -> Option<T> {
        self.entries
            .get(activity)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Whether an activity has a recorded result.
    pub fn contains(&self, activity: &str) -> bool {
        self.entries.contains_key(activity)
    }

    /// Record an activity result, appending to the log file.
    pub fn record<T: Serialize>(&mut self, activity: &str, result: &T) -> CodedocResult<()> {
        let value = serde_json::to_value(result)?;
        let entry = JournalEntry {
            activity: activity.to_string(),
            result: value.clone(),
            recorded_at: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;

        self.entries.insert(activity.to_string(), value);
        Ok(())
    }
}
