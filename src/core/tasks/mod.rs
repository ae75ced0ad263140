//! Overnight task model and the ad-hoc intake queue.
//!
//! An overnight task is one user-submitted unit of work processed through a
//! fixed multi-phase pipeline (research dive or prototype iteration). Tasks
//! own their iterations; iterations only reference the executor profile and
//! account that produced them.

pub mod proposal;
pub mod prototype;
pub mod research;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::exec::ExecOutcome;
use crate::core::jobs::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Research,
    Prototype,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvernightStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl OvernightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OvernightStatus::Queued => "queued",
            OvernightStatus::Running => "running",
            OvernightStatus::Completed => "completed",
            OvernightStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvernightTask {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub kind: TaskKind,
    pub status: OvernightStatus,
    pub created_at_ms: u64,
}

impl OvernightTask {
    pub fn new(subject: &str, kind: TaskKind) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4()),
            subject: subject.to_string(),
            constraints: Vec::new(),
            kind,
            status: OvernightStatus::Queued,
            created_at_ms: now_ms(),
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// One executor invocation made on behalf of a task. References the account
/// by id only; the account itself lives in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub index: usize,
    pub profile: String,
    pub account_id: Option<String>,
    pub outcome: ExecOutcome,
    pub duration_ms: u64,
}

/// One piece of harvested information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub query: String,
    pub category: String,
    pub content: String,
    pub confidence: f32,
}

/// One of the labeled synthesis outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    pub label: String,
    pub summary: String,
    pub confidence: f32,
}

/// Queued ad-hoc tasks waiting for the next session. Drained before the
/// nightly agenda so user-submitted work is never starved.
#[derive(Default)]
pub struct TaskIntake {
    queue: Mutex<VecDeque<OvernightTask>>,
}

impl TaskIntake {
    pub async fn submit(&self, task: OvernightTask) -> String {
        let id = task.id.clone();
        self.queue.lock().await.push_back(task);
        id
    }

    pub async fn drain_next(&self) -> Option<OvernightTask> {
        self.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intake_preserves_submission_order() {
        let intake = TaskIntake::default();
        let first = intake
            .submit(OvernightTask::new("alpha", TaskKind::Research))
            .await;
        let second = intake
            .submit(OvernightTask::new("beta", TaskKind::Prototype))
            .await;

        assert_eq!(intake.len().await, 2);
        assert_eq!(intake.drain_next().await.unwrap().id, first);
        assert_eq!(intake.drain_next().await.unwrap().id, second);
        assert!(intake.drain_next().await.is_none());
    }
}
