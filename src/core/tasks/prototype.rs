//! Prototype iteration: three fixed executors, one subject.
//!
//! The same staged shape as the research dive, but diversity of outcome
//! comes from executor diversity rather than prompt variation: each labeled
//! approach runs on a different, fixed executor profile (precision-oriented,
//! exploratory, balanced). Results are ranked by confidence.

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::warn;

use crate::core::collaborators::{Collaborators, notify_best_effort};
use crate::core::config::EngineConfig;
use crate::core::dispatch::Dispatcher;
use crate::core::night::plan::extract_json_block;
use crate::core::tasks::{Iteration, OvernightTask};

#[derive(Debug, Clone, Serialize)]
pub struct ApproachReport {
    pub label: String,
    pub profile: String,
    pub summary: String,
    pub confidence: f32,
    pub success: bool,
}

#[derive(Debug)]
pub struct PrototypeOutcome {
    /// Ranked best-first by confidence.
    pub approaches: Vec<ApproachReport>,
    pub iterations: Vec<Iteration>,
    pub any_success: bool,
    pub summary: String,
}

pub struct PrototypeRun {
    dispatcher: Dispatcher,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl PrototypeRun {
    pub fn new(dispatcher: Dispatcher, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            dispatcher,
            collaborators,
            config,
        }
    }

    /// The fixed label→profile pairing. Kept in one place so tests can
    /// assert the executors really differ.
    fn approach_profiles(&self) -> [(&'static str, String); 3] {
        [
            (
                "Conservative",
                self.config.prototype.precision_profile.clone(),
            ),
            (
                "Innovative",
                self.config.prototype.exploratory_profile.clone(),
            ),
            ("Pragmatic", self.config.prototype.balanced_profile.clone()),
        ]
    }

    pub async fn run(&self, task: &OvernightTask) -> PrototypeOutcome {
        let store = &self.collaborators.store;
        if let Err(e) = store.create_task(&task.id, &task.subject).await {
            warn!(error = %e, "task store create failed");
        }
        if let Err(e) = store.update_task_status(&task.id, "running").await {
            warn!(error = %e, "task status update failed");
        }
        self.milestone(task, "prototype_started").await;

        let constraints = if task.constraints.is_empty() {
            String::new()
        } else {
            format!("Constraints:\n{}\n", task.constraints.join("\n"))
        };

        // All three approaches fan out concurrently, all-settled: a failed
        // executor produces a placeholder, never a missing approach.
        let mut set = JoinSet::new();
        for (label, profile) in self.approach_profiles() {
            let dispatcher = self.dispatcher.clone();
            let subject = task.subject.clone();
            let constraints = constraints.clone();
            set.spawn(async move {
                let prompt = format!(
                    "Prototype an approach to the subject below. Work it through \
                     far enough to judge feasibility, then output ONLY JSON: \
                     {{\"summary\": \"what you built and learned\", \"confidence\": 0.0}}\n\
                     {constraints}Subject: {subject}"
                );
                let result = dispatcher.run(&profile, &prompt, None).await;
                (label, profile, result)
            });
        }

        let mut approaches = Vec::new();
        let mut iterations = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((label, profile, result)) = joined else {
                warn!("approach worker panicked, placeholder used");
                continue;
            };
            iterations.push(Iteration {
                index: iterations.len(),
                profile: profile.clone(),
                account_id: result.account_id.clone(),
                outcome: result.outcome,
                duration_ms: result.duration_ms,
            });
            approaches.push(build_report(label, profile, &result));
        }
        // A panicked worker leaves a gap; fill it so there are always three.
        for (label, profile) in self.approach_profiles() {
            if !approaches.iter().any(|a| a.label == label) {
                approaches.push(ApproachReport {
                    label: label.to_string(),
                    profile,
                    summary: "needs manual review: approach did not complete".to_string(),
                    confidence: 0.1,
                    success: false,
                });
            }
        }
        self.milestone(task, "approaches_complete").await;

        // Rank best-first; ties resolve by the fixed label order.
        approaches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let any_success = approaches.iter().any(|a| a.success);

        let summary = match approaches.first() {
            Some(best) => format!(
                "{}: best approach {} via '{}' ({:.0}% confidence)",
                task.subject,
                best.label,
                best.profile,
                best.confidence * 100.0
            ),
            None => format!("{}: no approaches completed", task.subject),
        };

        let artifacts = [
            (
                "approaches.json",
                serde_json::to_string_pretty(&approaches).unwrap_or_default(),
            ),
            ("summary.md", summary.clone()),
        ];
        for (name, content) in artifacts {
            if let Err(e) = store.append_artifact(&task.id, name, &content).await {
                warn!(artifact = name, error = %e, "artifact persist failed");
            }
        }

        let status = if any_success { "completed" } else { "failed" };
        if let Err(e) = store.update_task_status(&task.id, status).await {
            warn!(error = %e, "task status update failed");
        }
        self.milestone(task, "prototype_complete").await;

        PrototypeOutcome {
            approaches,
            iterations,
            any_success,
            summary,
        }
    }

    async fn milestone(&self, task: &OvernightTask, name: &str) {
        if let Err(e) = self.collaborators.store.record_milestone(&task.id, name).await {
            warn!(milestone = name, error = %e, "milestone record failed");
        }
        notify_best_effort(
            &*self.collaborators.notifications,
            "milestones",
            &format!("{}: {name}", task.subject),
        )
        .await;
    }
}

#[derive(Deserialize)]
struct RawApproach {
    summary: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

fn build_report(
    label: &str,
    profile: String,
    result: &crate::core::dispatch::DispatchResult,
) -> ApproachReport {
    if !result.is_success() {
        return ApproachReport {
            label: label.to_string(),
            profile,
            summary: format!(
                "needs manual review: executor {}",
                result.outcome.as_str()
            ),
            confidence: 0.1,
            success: false,
        };
    }

    match extract_json_block(&result.output)
        .and_then(|block| serde_json::from_str::<RawApproach>(block).ok())
    {
        Some(parsed) => ApproachReport {
            label: label.to_string(),
            profile,
            summary: parsed.summary,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            success: true,
        },
        None => ApproachReport {
            label: label.to_string(),
            profile,
            summary: crate::core::night::digest::truncate_chars(&result.output, 2000).to_string(),
            confidence: 0.5,
            success: true,
        },
    }
}
