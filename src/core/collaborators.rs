//! Narrow contracts to the systems around the engine.
//!
//! Memory, chat channels and durable task storage are separate subsystems;
//! the orchestration core only needs these three seams. Each trait ships a
//! log-backed default so the engine runs standalone and tests can substitute
//! recording fakes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Supplies the precompiled context pack the nightly planner reads. The
/// engine treats every section body as opaque text.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    /// Returns `(title, body)` sections. Bodies may be arbitrarily large;
    /// the digest assembler caps each one before concatenation.
    async fn context_sections(&self) -> Result<Vec<(String, String)>>;
}

/// Best-effort outbound notifications. Failures must never affect
/// orchestration correctness.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> Result<()>;
}

/// Durable store for overnight tasks, their iterations and artifacts. The
/// engine has no storage-engine concerns; it only issues these calls.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task_id: &str, subject: &str) -> Result<()>;
    async fn update_task_status(&self, task_id: &str, status: &str) -> Result<()>;
    async fn append_artifact(&self, task_id: &str, name: &str, content: &str) -> Result<()>;
    async fn record_milestone(&self, task_id: &str, milestone: &str) -> Result<()>;
}

/// Fire a notification and swallow any failure, logging it. This is the one
/// blessed way to call a sink from orchestration code.
pub async fn notify_best_effort(sink: &dyn NotificationSink, channel: &str, message: &str) {
    if let Err(e) = sink.notify(channel, message).await {
        warn!(channel, error = %e, "notification failed, continuing");
    }
}

/// Default provider: no external memory wired up, empty pack.
pub struct EmptyContextProvider;

#[async_trait::async_trait]
impl ContextProvider for EmptyContextProvider {
    async fn context_sections(&self) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

/// Default sink: notifications land in the log.
pub struct LogNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        info!(channel, "{message}");
        Ok(())
    }
}

/// Default store: artifacts are logged and kept in memory for the life of
/// the process, which is enough for snapshot reporting.
#[derive(Default)]
pub struct LogTaskStore {
    artifacts: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl LogTaskStore {
    pub async fn artifacts_for(&self, task_id: &str) -> Vec<(String, String)> {
        self.artifacts
            .lock()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TaskStore for LogTaskStore {
    async fn create_task(&self, task_id: &str, subject: &str) -> Result<()> {
        info!(task_id, subject, "task created");
        Ok(())
    }

    async fn update_task_status(&self, task_id: &str, status: &str) -> Result<()> {
        info!(task_id, status, "task status");
        Ok(())
    }

    async fn append_artifact(&self, task_id: &str, name: &str, content: &str) -> Result<()> {
        info!(task_id, name, bytes = content.len(), "artifact recorded");
        self.artifacts
            .lock()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push((name.to_string(), content.to_string()));
        Ok(())
    }

    async fn record_milestone(&self, task_id: &str, milestone: &str) -> Result<()> {
        info!(task_id, milestone, "milestone");
        Ok(())
    }
}

/// Bundle of collaborator handles threaded through the supervisor and task
/// orchestrators.
#[derive(Clone)]
pub struct Collaborators {
    pub context: Arc<dyn ContextProvider>,
    pub notifications: Arc<dyn NotificationSink>,
    pub store: Arc<dyn TaskStore>,
}

impl Collaborators {
    /// Log-backed defaults: runnable with nothing else configured.
    pub fn standalone() -> Self {
        Self {
            context: Arc::new(EmptyContextProvider),
            notifications: Arc::new(LogNotificationSink),
            store: Arc::new(LogTaskStore::default()),
        }
    }
}
