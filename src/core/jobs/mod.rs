//! Job model and the dependency-aware, approval-gated queue.
//!
//! Unattended nightly execution is safe by construction: approval level is a
//! pure function of risk, red jobs never run without an explicit approval,
//! and a failed dependency propagates as `Blocked` on dependents instead of
//! leaving them pending forever or crashing the queue.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub type JobId = String;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    /// Runs unattended when the global auto flag allows it.
    Green,
    /// Runs unattended, but a notification must be fired.
    Yellow,
    /// Never runs without an explicit approval.
    Red,
}

/// The risk→approval mapping. Pure and stable; approval is derived on
/// demand, never stored independently of risk.
pub fn approval_for(risk: RiskLevel) -> ApprovalLevel {
    match risk {
        RiskLevel::Low => ApprovalLevel::Green,
        RiskLevel::Medium => ApprovalLevel::Yellow,
        RiskLevel::High => ApprovalLevel::Red,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
    Approved,
    Rejected,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Blocked => "blocked",
            JobStatus::Approved => "approved",
            JobStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Blocked | JobStatus::Rejected
        )
    }
}

pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    match from {
        JobStatus::Pending => matches!(
            to,
            JobStatus::Running | JobStatus::Blocked | JobStatus::Approved | JobStatus::Rejected
        ),
        JobStatus::Approved => {
            matches!(to, JobStatus::Running | JobStatus::Blocked | JobStatus::Rejected)
        }
        JobStatus::Running => matches!(to, JobStatus::Completed | JobStatus::Failed),
        JobStatus::Completed | JobStatus::Failed | JobStatus::Blocked | JobStatus::Rejected => {
            false
        }
    }
}

/// Closed payload union, one variant per job type. Planner output is parsed
/// into this at the boundary; unknown shapes are rejected there instead of
/// threading untyped data through execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Answer one research question about a subject.
    ResearchQuery { subject: String, question: String },
    /// Explore one idea from the nightly agenda.
    IdeaExploration { idea: String, angle: Option<String> },
    /// A conservative code-change proposal. Carries external side effects,
    /// so it defaults to high risk.
    CodeProposal {
        title: String,
        rationale: String,
        target: Option<String>,
    },
    /// Idempotent maintenance pass over accumulated notes.
    NoteConsolidation,
    /// A queued ad-hoc overnight task processed through a task pipeline.
    AdHocTask { task_id: String },
}

impl JobKind {
    pub fn default_risk(&self) -> RiskLevel {
        match self {
            JobKind::ResearchQuery { .. } | JobKind::NoteConsolidation => RiskLevel::Low,
            JobKind::IdeaExploration { .. } => RiskLevel::Low,
            JobKind::AdHocTask { .. } => RiskLevel::Medium,
            JobKind::CodeProposal { .. } => RiskLevel::High,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobKind::ResearchQuery { .. } => "research_query",
            JobKind::IdeaExploration { .. } => "idea_exploration",
            JobKind::CodeProposal { .. } => "code_proposal",
            JobKind::NoteConsolidation => "note_consolidation",
            JobKind::AdHocTask { .. } => "ad_hoc_task",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub kind: JobKind,
    pub risk: RiskLevel,
    pub status: JobStatus,
    #[serde(default)]
    pub depends_on: Vec<JobId>,
    #[serde(default)]
    pub blocked_by: Vec<JobId>,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub result: Option<JobResult>,
    pub rejection_reason: Option<String>,
}

impl Job {
    fn new(name: String, kind: JobKind, risk: RiskLevel, depends_on: Vec<JobId>) -> Self {
        Self {
            id: format!("job_{}", Uuid::new_v4()),
            name,
            kind,
            risk,
            status: JobStatus::Pending,
            depends_on,
            blocked_by: Vec::new(),
            created_at_ms: now_ms(),
            started_at_ms: None,
            finished_at_ms: None,
            result: None,
            rejection_reason: None,
        }
    }

    /// Derived, never stored.
    pub fn approval(&self) -> ApprovalLevel {
        approval_for(self.risk)
    }
}

/// A job the queue has cleared for execution right now.
#[derive(Debug, Clone)]
pub struct ReadyJob {
    pub id: JobId,
    pub name: String,
    pub approval: ApprovalLevel,
}

/// In-memory, insertion-ordered job queue for one session.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobQueue {
    jobs: Vec<Job>,
    auto_execute_green: bool,
}

impl JobQueue {
    pub fn new(auto_execute_green: bool) -> Self {
        Self {
            jobs: Vec::new(),
            auto_execute_green,
        }
    }

    pub fn push(&mut self, name: &str, kind: JobKind, depends_on: Vec<JobId>) -> JobId {
        let risk = kind.default_risk();
        self.push_with_risk(name, kind, risk, depends_on)
    }

    pub fn push_with_risk(
        &mut self,
        name: &str,
        kind: JobKind,
        risk: RiskLevel,
        depends_on: Vec<JobId>,
    ) -> JobId {
        let job = Job::new(name.to_string(), kind, risk, depends_on);
        let id = job.id.clone();
        debug!(job_id = %id, kind = job.kind.label(), risk = ?risk, "job queued");
        self.jobs.push(job);
        id
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// The next job cleared to run, in creation order. As a side effect,
    /// pending jobs whose dependencies can no longer complete are moved to
    /// `Blocked` so they are never silently skipped or stuck pending.
    pub fn next_executable(&mut self) -> Option<ReadyJob> {
        let status_by_id: HashMap<JobId, JobStatus> = self
            .jobs
            .iter()
            .map(|j| (j.id.clone(), j.status))
            .collect();

        for job in &mut self.jobs {
            if !matches!(job.status, JobStatus::Pending | JobStatus::Approved) {
                continue;
            }

            let blocking: Vec<JobId> = job
                .depends_on
                .iter()
                .filter(|dep| {
                    matches!(
                        status_by_id.get(*dep),
                        Some(JobStatus::Failed | JobStatus::Blocked | JobStatus::Rejected) | None
                    )
                })
                .cloned()
                .collect();
            if !blocking.is_empty() {
                info!(job_id = %job.id, blocked_by = ?blocking, "job blocked by failed dependency");
                job.status = JobStatus::Blocked;
                job.blocked_by = blocking;
                job.finished_at_ms = Some(now_ms());
                continue;
            }

            let deps_done = job
                .depends_on
                .iter()
                .all(|dep| status_by_id.get(dep) == Some(&JobStatus::Completed));
            if !deps_done {
                continue;
            }

            let ready = ReadyJob {
                id: job.id.clone(),
                name: job.name.clone(),
                approval: job.approval(),
            };
            match job.status {
                // Manually unlocked red (or pre-approved) work.
                JobStatus::Approved => return Some(ready),
                JobStatus::Pending => match job.approval() {
                    ApprovalLevel::Green if self.auto_execute_green => return Some(ready),
                    ApprovalLevel::Green => continue,
                    ApprovalLevel::Yellow => return Some(ready),
                    ApprovalLevel::Red => continue,
                },
                _ => unreachable!("filtered above"),
            }
        }
        None
    }

    pub fn mark_running(&mut self, id: &str) -> bool {
        self.transition(id, JobStatus::Running, |job| {
            job.started_at_ms = Some(now_ms());
        })
    }

    /// Attach an invocation's result and settle the job's status from the
    /// reported success flag.
    pub fn set_result(&mut self, id: &str, success: bool, output: String, artifacts: Vec<String>) {
        let to = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.transition(id, to, |job| {
            job.finished_at_ms = Some(now_ms());
            job.result = Some(JobResult {
                success,
                output,
                artifacts,
            });
        });
    }

    /// Manually unlock a red job (or pre-approve any pending job).
    pub fn approve(&mut self, id: &str) -> bool {
        self.transition(id, JobStatus::Approved, |_| {})
    }

    /// Terminal rejection, carrying the reason.
    pub fn reject(&mut self, id: &str, reason: &str) -> bool {
        let reason = reason.to_string();
        self.transition(id, JobStatus::Rejected, move |job| {
            job.finished_at_ms = Some(now_ms());
            job.rejection_reason = Some(reason);
        })
    }

    fn transition(
        &mut self,
        id: &str,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> bool {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
            return false;
        };
        if !can_transition(job.status, to) {
            debug!(job_id = %id, from = job.status.as_str(), to = to.as_str(), "transition refused");
            return false;
        }
        job.status = to;
        apply(job);
        true
    }

    /// Jobs awaiting a human decision.
    pub fn awaiting_approval(&self) -> Vec<&Job> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending && j.approval() == ApprovalLevel::Red)
            .collect()
    }

    /// True once every job is terminal or permanently gated.
    pub fn is_exhausted(&mut self) -> bool {
        if self.next_executable().is_some() {
            return false;
        }
        !self.jobs.iter().any(|j| j.status == JobStatus::Running)
    }

    pub fn counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in &self.jobs {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests;
