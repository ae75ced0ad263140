//! Session snapshot persistence.
//!
//! A JSON document of the in-memory queue and session metadata, written
//! after each run for external inspection (status screens, the approvals
//! CLI). Recovery after a crash starts fresh on the next trigger; the
//! snapshot is never replayed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::jobs::JobQueue;

pub const SNAPSHOT_FILE: &str = "last_session.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub phase: String,
    #[serde(default)]
    pub findings: Vec<String>,
    pub briefing: Option<String>,
    pub queue: JobQueue,
}

impl SessionSnapshot {
    pub fn write(&self, state_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let path = state_dir.join(SNAPSHOT_FILE);
        let raw = serde_json::to_string_pretty(self).context("serialize session snapshot")?;
        std::fs::write(&path, raw)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        info!(path = %path.display(), "session snapshot written");
        Ok(path)
    }

    pub fn load(state_dir: &Path) -> Result<Option<Self>> {
        let path = state_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parse snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::JobKind;

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        let mut queue = JobQueue::new(true);
        queue.push("maintenance", JobKind::NoteConsolidation, vec![]);

        let snapshot = SessionSnapshot {
            session_id: "night_test".to_string(),
            started_at_ms: 1,
            finished_at_ms: Some(2),
            phase: "briefing".to_string(),
            findings: vec!["one finding".to_string()],
            briefing: Some("all quiet".to_string()),
            queue,
        };
        snapshot.write(dir.path()).unwrap();

        let loaded = SessionSnapshot::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.session_id, "night_test");
        assert_eq!(loaded.queue.jobs().len(), 1);
        assert_eq!(loaded.briefing.as_deref(), Some("all quiet"));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionSnapshot::load(dir.path()).unwrap().is_none());
    }
}
