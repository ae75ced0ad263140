//! Night supervisor: the top-level phase sequencer for one nightly cycle.
//!
//! A session moves through ingestion → deep work → synthesis → briefing.
//! Ad-hoc tasks drain first so user-submitted work is never starved by the
//! nightly agenda; the planner's output materializes into the job queue; and
//! jobs execute one at a time until the queue empties or the wall-clock
//! budget runs out. Sequential execution is a safety trade-off, not a
//! performance choice: one unattended executor at a time is auditable.
//!
//! Finalization (snapshot, proposal book, running flag, session lock) is
//! guaranteed to run even when a phase fails.

pub mod digest;
pub mod lock;
pub mod plan;
pub mod snapshot;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::accounts::AccountPool;
use crate::core::collaborators::{Collaborators, notify_best_effort};
use crate::core::config::{self, EngineConfig};
use crate::core::dispatch::Dispatcher;
use crate::core::jobs::{ApprovalLevel, JobId, JobKind, JobQueue, JobStatus, now_ms};
use crate::core::tasks::proposal::{Proposal, ProposalBook, ProposalStage};
use crate::core::tasks::prototype::PrototypeRun;
use crate::core::tasks::research::ResearchDive;
use crate::core::tasks::{OvernightTask, TaskIntake, TaskKind};
use lock::SessionLock;
use plan::NightPlan;
use snapshot::SessionSnapshot;

pub const PROPOSALS_FILE: &str = "proposals.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightPhase {
    Ingestion,
    DeepWork,
    Synthesis,
    Briefing,
}

impl NightPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            NightPhase::Ingestion => "ingestion",
            NightPhase::DeepWork => "deep_work",
            NightPhase::Synthesis => "synthesis",
            NightPhase::Briefing => "briefing",
        }
    }
}

/// What one completed session looked like.
#[derive(Debug)]
pub struct NightReport {
    pub session_id: String,
    pub briefing: String,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub awaiting_approval: usize,
    pub snapshot_path: Option<PathBuf>,
}

struct SessionState {
    id: String,
    started_at_ms: u64,
    phase: NightPhase,
    queue: JobQueue,
    findings: Vec<String>,
    briefing: Option<String>,
    /// Jobs materialized from previously approved proposals.
    proposal_jobs: HashMap<JobId, String>,
}

/// Single active instance per process; a re-entrant `run` is rejected, and
/// an OS-level lock rejects concurrent supervisors across processes.
pub struct NightSupervisor {
    config: EngineConfig,
    dispatcher: Dispatcher,
    collaborators: Collaborators,
    intake: Arc<TaskIntake>,
    state_dir: PathBuf,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl NightSupervisor {
    pub fn new(
        config: EngineConfig,
        pool: Arc<AccountPool>,
        collaborators: Collaborators,
        intake: Arc<TaskIntake>,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            dispatcher: Dispatcher::new(config.clone(), pool, cancel.clone()),
            config,
            collaborators,
            intake,
            state_dir: config::state_dir(),
            running: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state_dir = dir;
        self
    }

    /// Request shutdown: cancellation propagates to every in-flight
    /// invocation, not only future ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one full nightly cycle.
    pub async fn run(&self) -> Result<NightReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("night session already running");
        }

        let session_lock = match SessionLock::acquire(&self.state_dir) {
            Ok(lock) => lock,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut session = SessionState {
            id: format!("night_{}", Uuid::new_v4()),
            started_at_ms: now_ms(),
            phase: NightPhase::Ingestion,
            queue: JobQueue::new(self.config.night.auto_execute_green),
            findings: Vec::new(),
            briefing: None,
            proposal_jobs: HashMap::new(),
        };
        info!(session_id = %session.id, "night session started");

        let result = self.run_phases(&mut session).await;
        if let Err(e) = &result {
            warn!(session_id = %session.id, error = %e, "session phase failed");
            session.findings.push(format!("session error: {e}"));
        }

        // Finalization runs no matter what happened above.
        let snapshot_path = self.finalize(&mut session);
        self.running.store(false, Ordering::SeqCst);
        drop(session_lock);

        result?;

        let counts = session.queue.counts();
        Ok(NightReport {
            session_id: session.id,
            briefing: session.briefing.unwrap_or_default(),
            completed: counts.get(&JobStatus::Completed).copied().unwrap_or(0),
            failed: counts.get(&JobStatus::Failed).copied().unwrap_or(0),
            blocked: counts.get(&JobStatus::Blocked).copied().unwrap_or(0),
            awaiting_approval: session.queue.awaiting_approval().len(),
            snapshot_path,
        })
    }

    async fn run_phases(&self, session: &mut SessionState) -> Result<()> {
        let budget = Duration::from_secs(self.config.night.budget_minutes * 60);
        let deadline = Instant::now() + budget;

        session.phase = NightPhase::Ingestion;
        self.drain_adhoc_tasks(session, deadline).await;

        let sections = match self.collaborators.context.context_sections().await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(error = %e, "context provider failed, planning without context");
                session
                    .findings
                    .push(format!("context provider failed: {e}"));
                Vec::new()
            }
        };
        let digest =
            digest::assemble_digest(&sections, self.config.night.digest_section_chars);

        let plan = self.request_plan(session, &digest).await;
        let book = self.load_proposals(session);
        self.materialize(session, plan, &book);

        session.phase = NightPhase::DeepWork;
        self.execute_jobs(session, deadline).await;

        session.phase = NightPhase::Synthesis;
        let briefing = self.synthesize(session).await;
        session.briefing = Some(briefing.clone());

        session.phase = NightPhase::Briefing;
        notify_best_effort(&*self.collaborators.notifications, "briefing", &briefing).await;

        Ok(())
    }

    /// User-submitted tasks run before the nightly agenda. Each becomes a
    /// job in the queue so the snapshot records it alongside planned work.
    async fn drain_adhoc_tasks(&self, session: &mut SessionState, deadline: Instant) {
        while let Some(task) = self.intake.drain_next().await {
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                session
                    .findings
                    .push(format!("task '{}' deferred to next session", task.subject));
                self.intake.submit(task).await;
                break;
            }

            let job_id = session.queue.push(
                &format!("ad-hoc: {}", task.subject),
                JobKind::AdHocTask {
                    task_id: task.id.clone(),
                },
                vec![],
            );
            // Ad-hoc work is medium risk: it runs, but the user hears about it.
            notify_best_effort(
                &*self.collaborators.notifications,
                "jobs",
                &format!("starting overnight task: {}", task.subject),
            )
            .await;
            session.queue.mark_running(&job_id);

            let (success, output) = self.run_task_pipeline(&task).await;
            session.queue.set_result(&job_id, success, output, vec![]);
        }
    }

    async fn run_task_pipeline(&self, task: &OvernightTask) -> (bool, String) {
        match task.kind {
            TaskKind::Research => {
                let dive = ResearchDive::new(
                    self.dispatcher.clone(),
                    self.collaborators.clone(),
                    self.config.clone(),
                );
                let outcome = dive.run(task).await;
                (!outcome.findings.is_empty(), outcome.summary)
            }
            TaskKind::Prototype => {
                let run = PrototypeRun::new(
                    self.dispatcher.clone(),
                    self.collaborators.clone(),
                    self.config.clone(),
                );
                let outcome = run.run(task).await;
                (outcome.any_success, outcome.summary)
            }
        }
    }

    async fn request_plan(&self, session: &mut SessionState, digest: &str) -> NightPlan {
        let night = &self.config.night;
        let prompt = plan::build_planner_prompt(
            digest,
            night.max_research_jobs,
            night.max_idea_jobs,
            night.max_change_proposals,
        );
        let result = self
            .dispatcher
            .run(&night.planner_profile, &prompt, None)
            .await;
        if !result.is_success() {
            warn!(outcome = result.outcome.as_str(), "planning executor failed, empty plan");
            session
                .findings
                .push(format!("planning failed ({}), empty plan used", result.outcome.as_str()));
            return NightPlan::default();
        }
        let plan = plan::parse_plan(
            &result.output,
            night.max_research_jobs,
            night.max_idea_jobs,
            night.max_change_proposals,
        );
        if plan.is_empty() {
            session
                .findings
                .push("planner returned no usable plan".to_string());
        }
        plan
    }

    fn load_proposals(&self, session: &mut SessionState) -> ProposalBook {
        match ProposalBook::load(&self.state_dir.join(PROPOSALS_FILE)) {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "proposal book unreadable, starting empty");
                session.findings.push(format!("proposal book unreadable: {e}"));
                ProposalBook::default()
            }
        }
    }

    /// Turn the plan into queued jobs. The idempotent note-consolidation
    /// maintenance job always runs first.
    fn materialize(&self, session: &mut SessionState, plan: NightPlan, book: &ProposalBook) {
        let queue = &mut session.queue;
        queue.push("consolidate notes", JobKind::NoteConsolidation, vec![]);

        for item in plan.research {
            queue.push(
                &format!("research: {}", item.subject),
                JobKind::ResearchQuery {
                    subject: item.subject,
                    question: item.question,
                },
                vec![],
            );
        }
        for item in plan.ideas {
            queue.push(
                &format!("idea: {}", item.idea),
                JobKind::IdeaExploration {
                    idea: item.idea,
                    angle: item.angle,
                },
                vec![],
            );
        }
        for item in plan.proposals {
            // High risk by construction: withheld until a human approves.
            queue.push(
                &format!("proposal: {}", item.title),
                JobKind::CodeProposal {
                    title: item.title,
                    rationale: item.rationale,
                    target: item.target,
                },
                vec![],
            );
        }

        // Proposals approved between sessions run tonight, pre-unlocked.
        for proposal in book.approved_plans() {
            let id = queue.push(
                &format!("approved: {}", proposal.title),
                JobKind::CodeProposal {
                    title: proposal.title.clone(),
                    rationale: proposal.rationale.clone(),
                    target: None,
                },
                vec![],
            );
            queue.approve(&id);
            session.proposal_jobs.insert(id, proposal.id.clone());
        }

        info!(jobs = queue.jobs().len(), "plan materialized");
    }

    async fn execute_jobs(&self, session: &mut SessionState, deadline: Instant) {
        loop {
            if self.cancel.is_cancelled() {
                session
                    .findings
                    .push("shutdown requested, execution stopped".to_string());
                break;
            }
            if Instant::now() >= deadline {
                session
                    .findings
                    .push("wall-clock budget exhausted".to_string());
                break;
            }
            let Some(ready) = session.queue.next_executable() else {
                break;
            };

            if ready.approval == ApprovalLevel::Yellow {
                notify_best_effort(
                    &*self.collaborators.notifications,
                    "jobs",
                    &format!("running medium-risk job: {}", ready.name),
                )
                .await;
            }

            let Some(kind) = session.queue.job(&ready.id).map(|j| j.kind.clone()) else {
                break;
            };
            session.queue.mark_running(&ready.id);
            let (success, output) = self.run_job(session, &kind, deadline).await;
            session.queue.set_result(&ready.id, success, output, vec![]);
        }
    }

    async fn run_job(
        &self,
        session: &mut SessionState,
        kind: &JobKind,
        deadline: Instant,
    ) -> (bool, String) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = Duration::from_secs(self.config.limits.exec_timeout_secs).min(remaining);

        let (profile, prompt) = match kind {
            JobKind::ResearchQuery { subject, question } => (
                self.config.night.research_profile.clone(),
                format!(
                    "Research the following and report concrete findings with sources \
                     where possible.\nSubject: {subject}\nQuestion: {question}"
                ),
            ),
            JobKind::IdeaExploration { idea, angle } => (
                self.config.prototype.exploratory_profile.clone(),
                match angle {
                    Some(angle) => format!(
                        "Explore this idea from the angle '{angle}'. Report what is \
                         promising and what is a dead end.\nIdea: {idea}"
                    ),
                    None => format!(
                        "Explore this idea. Report what is promising and what is a \
                         dead end.\nIdea: {idea}"
                    ),
                },
            ),
            JobKind::CodeProposal {
                title,
                rationale,
                target,
            } => (
                self.config.prototype.precision_profile.clone(),
                format!(
                    "Carry out this approved change conservatively. Title: {title}\n\
                     Rationale: {rationale}\nTarget: {}",
                    target.as_deref().unwrap_or("(unspecified)")
                ),
            ),
            JobKind::NoteConsolidation => (
                self.config.night.planner_profile.clone(),
                "Consolidate the accumulated notes: merge duplicates, file loose \
                 observations, and list open questions. This pass is idempotent: \
                 running it twice must change nothing the second time."
                    .to_string(),
            ),
            JobKind::AdHocTask { task_id } => {
                // Ad-hoc tasks execute through their pipelines during drain;
                // one appearing here means the queue was fed out-of-band.
                return (false, format!("task {task_id} must run via intake"));
            }
        };

        let result = self.dispatcher.run(&profile, &prompt, Some(timeout)).await;
        if result.exhausted {
            session
                .findings
                .push(format!("profile '{profile}' accounts exhausted"));
        }
        (result.is_success(), result.output)
    }

    /// Briefing via the synthesis executor, falling back to a deterministic
    /// template; session completion never depends on this call succeeding.
    async fn synthesize(&self, session: &mut SessionState) -> String {
        let mut job_lines = String::new();
        for job in session.queue.jobs() {
            let status = job.status.as_str();
            let output = job
                .result
                .as_ref()
                .map(|r| digest::truncate_chars(&r.output, 600))
                .unwrap_or("");
            job_lines.push_str(&format!("- [{status}] {}: {output}\n", job.name));
        }

        let prompt = format!(
            "Write a short morning briefing (under 300 words) for the owner of \
             this agent. Summarize what was done overnight, what failed, and \
             what needs a decision. Plain text, no preamble.\n\nJOBS:\n{job_lines}\n\
             NOTES:\n{}",
            session.findings.join("\n")
        );

        let result = self
            .dispatcher
            .run(&self.config.night.synthesis_profile, &prompt, None)
            .await;
        if result.is_success() && !result.output.trim().is_empty() {
            return result.output;
        }

        warn!(outcome = result.outcome.as_str(), "synthesis failed, templated briefing");
        session
            .findings
            .push("synthesis executor failed, templated briefing used".to_string());
        fallback_briefing(session)
    }

    /// Persist the snapshot and the proposal book. Never propagates errors;
    /// finalization has to complete.
    fn finalize(&self, session: &mut SessionState) -> Option<PathBuf> {
        self.record_proposals(session);

        let snapshot = SessionSnapshot {
            session_id: session.id.clone(),
            started_at_ms: session.started_at_ms,
            finished_at_ms: Some(now_ms()),
            phase: session.phase.as_str().to_string(),
            findings: std::mem::take(&mut session.findings),
            briefing: session.briefing.clone(),
            queue: std::mem::replace(&mut session.queue, JobQueue::new(true)),
        };
        let path = match snapshot.write(&self.state_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "snapshot write failed");
                None
            }
        };
        // Keep the queue around for the report.
        session.queue = snapshot.queue;
        session.findings = snapshot.findings;
        path
    }

    fn record_proposals(&self, session: &mut SessionState) {
        let path = self.state_dir.join(PROPOSALS_FILE);
        let mut book = match ProposalBook::load(&path) {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "proposal book unreadable at finalize");
                return;
            }
        };

        // Executed approved proposals are done: archive them.
        for (job_id, proposal_id) in &session.proposal_jobs {
            if session
                .queue
                .job(job_id)
                .map(|j| j.status == JobStatus::Completed)
                .unwrap_or(false)
            {
                book.advance(proposal_id, ProposalStage::Archived);
            }
        }

        // Tonight's withheld change proposals await a decision.
        for job in session.queue.awaiting_approval() {
            if let JobKind::CodeProposal {
                title, rationale, ..
            } = &job.kind
            {
                let duplicate = book
                    .proposals
                    .iter()
                    .any(|p| p.title == *title && !p.stage.is_terminal());
                if !duplicate {
                    book.add(Proposal::new(
                        title,
                        rationale,
                        ProposalStage::Plan,
                        job.risk,
                    ));
                }
            }
        }

        if let Err(e) = book.save(&path) {
            warn!(error = %e, "proposal book save failed");
        }
    }
}

/// Deterministic briefing assembled from local job results alone.
fn fallback_briefing(session: &SessionState) -> String {
    let counts = session.queue.counts();
    let get = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);

    let mut briefing = format!(
        "Night session {}: {} completed, {} failed, {} blocked, {} awaiting approval.\n",
        session.id,
        get(JobStatus::Completed),
        get(JobStatus::Failed),
        get(JobStatus::Blocked),
        session.queue.awaiting_approval().len(),
    );
    for job in session.queue.jobs() {
        briefing.push_str(&format!("- [{}] {}\n", job.status.as_str(), job.name));
    }
    if !session.findings.is_empty() {
        briefing.push_str("Notes:\n");
        for finding in &session.findings {
            briefing.push_str(&format!("- {finding}\n"));
        }
    }
    briefing
}
