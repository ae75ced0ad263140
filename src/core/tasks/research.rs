//! Research dive: expansion → staged harvest → validation → synthesis.
//!
//! One subject fans out into categorized sub-queries harvested tier by tier:
//! every high-priority query runs concurrently, then medium, then low, which
//! bounds burst concurrency against executor quota limits. Failures at any
//! step degrade the result instead of aborting it: a dropped sub-query, a
//! skipped validation pass or a templated synthesis is still a usable dive.

use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::collaborators::{Collaborators, notify_best_effort};
use crate::core::config::EngineConfig;
use crate::core::dispatch::Dispatcher;
use crate::core::night::plan::extract_json_block;
use crate::core::tasks::{Finding, Interpretation, Iteration, OvernightTask};

const MAX_QUERIES: usize = 15;
const BASE_CONFIDENCE: f32 = 0.6;
const CONTRADICTION_PENALTY: f32 = 0.2;

pub const SYNTHESIS_LABELS: [&str; 3] = ["Conservative", "Innovative", "Pragmatic"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubQuery {
    pub query: String,
    pub category: String,
    pub priority: Priority,
}

#[derive(Debug)]
pub struct ResearchOutcome {
    pub findings: Vec<Finding>,
    pub interpretations: Vec<Interpretation>,
    pub iterations: Vec<Iteration>,
    pub summary: String,
}

pub struct ResearchDive {
    dispatcher: Dispatcher,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl ResearchDive {
    pub fn new(dispatcher: Dispatcher, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            dispatcher,
            collaborators,
            config,
        }
    }

    pub async fn run(&self, task: &OvernightTask) -> ResearchOutcome {
        let store = &self.collaborators.store;
        if let Err(e) = store.create_task(&task.id, &task.subject).await {
            warn!(error = %e, "task store create failed");
        }
        self.record_status(task, "running").await;
        self.milestone(task, "research_started").await;

        let queries = self.expand_queries(task).await;
        self.milestone(task, "queries_expanded").await;

        let (mut findings, iterations) = self.harvest(&queries).await;
        self.milestone(task, "harvest_complete").await;

        self.validate(&mut findings).await;
        self.milestone(task, "validation_complete").await;

        let interpretations = self.synthesize(task, &findings).await;
        self.milestone(task, "synthesis_complete").await;

        let summary = summarize(task, &findings, &interpretations);
        self.persist(task, &findings, &interpretations, &summary).await;

        let status = if findings.is_empty() { "failed" } else { "completed" };
        self.record_status(task, status).await;

        ResearchOutcome {
            findings,
            interpretations,
            iterations,
            summary,
        }
    }

    /// (a) Expand the subject into 10–15 categorized, prioritized
    /// sub-queries, with a hard-coded fallback set if parsing fails.
    async fn expand_queries(&self, task: &OvernightTask) -> Vec<SubQuery> {
        let constraints = if task.constraints.is_empty() {
            String::new()
        } else {
            format!("Constraints:\n{}\n", task.constraints.join("\n"))
        };
        let prompt = format!(
            "Expand this research subject into 10-15 focused sub-queries. \
             Output ONLY a JSON array:\n\
             [{{\"query\": \"...\", \"category\": \"...\", \"priority\": \"high|medium|low\"}}]\n\
             Use categories like landscape, evidence, contradictions, applications, risks.\n\
             {constraints}Subject: {}",
            task.subject
        );

        let result = self
            .dispatcher
            .run(&self.config.night.planner_profile, &prompt, None)
            .await;
        if result.is_success()
            && let Some(queries) = parse_queries(&result.output)
        {
            info!(count = queries.len(), "query expansion parsed");
            return queries;
        }

        warn!(
            outcome = result.outcome.as_str(),
            "query expansion unusable, using fallback set"
        );
        fallback_queries(&task.subject)
    }

    /// (b) Staged parallel harvest. Tiers run strictly in sequence; queries
    /// within a tier fan out concurrently with all-settled semantics.
    async fn harvest(&self, queries: &[SubQuery]) -> (Vec<Finding>, Vec<Iteration>) {
        let mut findings = Vec::new();
        let mut iterations = Vec::new();
        let profile = self.config.night.research_profile.clone();

        for tier in [Priority::High, Priority::Medium, Priority::Low] {
            let tier_queries: Vec<SubQuery> = queries
                .iter()
                .filter(|q| q.priority == tier)
                .cloned()
                .collect();
            if tier_queries.is_empty() {
                continue;
            }

            let mut set = JoinSet::new();
            for sub in tier_queries {
                let dispatcher = self.dispatcher.clone();
                let profile = profile.clone();
                set.spawn(async move {
                    let prompt = format!(
                        "Answer this research query with concrete findings. Be specific; \
                         cite sources where possible.\nCategory: {}\nQuery: {}",
                        sub.category, sub.query
                    );
                    let result = dispatcher.run(&profile, &prompt, None).await;
                    (sub, result)
                });
            }

            // Collect every outcome; a failed query is dropped, never
            // allowed to abort the batch.
            while let Some(joined) = set.join_next().await {
                let Ok((sub, result)) = joined else {
                    warn!("harvest worker panicked, result dropped");
                    continue;
                };
                iterations.push(Iteration {
                    index: iterations.len(),
                    profile: profile.clone(),
                    account_id: result.account_id.clone(),
                    outcome: result.outcome,
                    duration_ms: result.duration_ms,
                });
                if result.is_success() && !result.output.trim().is_empty() {
                    findings.push(Finding {
                        query: sub.query,
                        category: sub.category,
                        content: result.output,
                        confidence: BASE_CONFIDENCE,
                    });
                } else {
                    warn!(query = %sub.query, outcome = result.outcome.as_str(), "sub-query dropped");
                }
            }
        }

        (findings, iterations)
    }

    /// (c) Cross-compare same-category findings for contradictions via a
    /// different executor, adjusting confidence. Never blocks the dive.
    async fn validate(&self, findings: &mut [Finding]) {
        let mut categories: Vec<String> = findings.iter().map(|f| f.category.clone()).collect();
        categories.sort();
        categories.dedup();

        for category in categories {
            let members: Vec<usize> = findings
                .iter()
                .enumerate()
                .filter(|(_, f)| f.category == category)
                .map(|(i, _)| i)
                .collect();
            if members.len() < 2 {
                continue;
            }

            let mut listing = String::new();
            for (position, idx) in members.iter().enumerate() {
                listing.push_str(&format!(
                    "[{position}] {}\n",
                    crate::core::night::digest::truncate_chars(&findings[*idx].content, 1200)
                ));
            }
            let prompt = format!(
                "These research findings share the category '{category}'. Identify \
                 entries that contradict the others. Output ONLY a JSON array of the \
                 bracketed numbers that are contradicted, e.g. [1,3]. Output [] if none.\n\n{listing}"
            );

            // Validation deliberately runs on a different executor than the
            // harvest so one model's blind spots do not confirm themselves.
            let result = self
                .dispatcher
                .run(&self.config.night.planner_profile, &prompt, None)
                .await;
            if !result.is_success() {
                warn!(%category, outcome = result.outcome.as_str(), "validation pass skipped");
                continue;
            }
            let Some(block) = extract_json_block(&result.output) else {
                continue;
            };
            let Ok(contradicted) = serde_json::from_str::<Vec<usize>>(block) else {
                continue;
            };
            for position in contradicted {
                if let Some(idx) = members.get(position) {
                    let finding = &mut findings[*idx];
                    finding.confidence = (finding.confidence - CONTRADICTION_PENALTY).max(0.1);
                    info!(%category, query = %finding.query, "finding contradicted, confidence lowered");
                }
            }
        }
    }

    /// (d) Exactly three labeled interpretations, falling back to a
    /// templated "needs manual review" triple on parse failure.
    async fn synthesize(&self, task: &OvernightTask, findings: &[Finding]) -> Vec<Interpretation> {
        if findings.is_empty() {
            return fallback_interpretations("no findings harvested");
        }

        let mut listing = String::new();
        for finding in findings {
            listing.push_str(&format!(
                "[{} | confidence {:.1}] {}\n",
                finding.category,
                finding.confidence,
                crate::core::night::digest::truncate_chars(&finding.content, 2000)
            ));
        }
        let prompt = format!(
            "Synthesize these findings about '{}' into exactly three interpretations \
             labeled Conservative, Innovative and Pragmatic. Output ONLY a JSON array:\n\
             [{{\"label\": \"Conservative\", \"summary\": \"...\", \"confidence\": 0.0}}, ...]\n\n\
             FINDINGS:\n{listing}",
            task.subject
        );

        let result = self
            .dispatcher
            .run(&self.config.night.synthesis_profile, &prompt, None)
            .await;
        if result.is_success()
            && let Some(parsed) = parse_interpretations(&result.output)
        {
            return parsed;
        }

        warn!(
            outcome = result.outcome.as_str(),
            "synthesis unusable, templated interpretations"
        );
        fallback_interpretations("synthesis unavailable")
    }

    /// (e) Raw findings, synthesis and summary persisted as separate
    /// artifacts.
    async fn persist(
        &self,
        task: &OvernightTask,
        findings: &[Finding],
        interpretations: &[Interpretation],
        summary: &str,
    ) {
        let store = &self.collaborators.store;
        let artifacts = [
            (
                "findings.json",
                serde_json::to_string_pretty(findings).unwrap_or_default(),
            ),
            (
                "synthesis.json",
                serde_json::to_string_pretty(interpretations).unwrap_or_default(),
            ),
            ("summary.md", summary.to_string()),
        ];
        for (name, content) in artifacts {
            if let Err(e) = store.append_artifact(&task.id, name, &content).await {
                warn!(artifact = name, error = %e, "artifact persist failed");
            }
        }
    }

    async fn record_status(&self, task: &OvernightTask, status: &str) {
        if let Err(e) = self
            .collaborators
            .store
            .update_task_status(&task.id, status)
            .await
        {
            warn!(error = %e, "task status update failed");
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
struct RawQuery {
    query: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default = "default_priority")]
    priority: String,
}

fn default_category() -> String {
    "general".to_string()
}
fn default_priority() -> String {
    "medium".to_string()
}

pub(crate) fn parse_queries(text: &str) -> Option<Vec<SubQuery>> {
    let block = extract_json_block(text)?;
    let raw: Vec<RawQuery> = serde_json::from_str(block).ok()?;
    if raw.is_empty() {
        return None;
    }
    let mut queries: Vec<SubQuery> = raw
        .into_iter()
        .filter(|q| !q.query.trim().is_empty())
        .map(|q| SubQuery {
            query: q.query,
            category: q.category,
            priority: Priority::parse(&q.priority),
        })
        .collect();
    if queries.is_empty() {
        return None;
    }
    queries.truncate(MAX_QUERIES);
    Some(queries)
}

/// The hard-coded expansion used when the planner's output is unusable.
pub(crate) fn fallback_queries(subject: &str) -> Vec<SubQuery> {
    let templates: [(&str, &str, Priority); 10] = [
        ("What is the current landscape of {}?", "landscape", Priority::High),
        ("What is the strongest evidence about {}?", "evidence", Priority::High),
        ("What are the main open problems in {}?", "open_problems", Priority::High),
        ("Who is doing notable work on {}?", "landscape", Priority::High),
        ("What are common misconceptions about {}?", "contradictions", Priority::Medium),
        ("What practical applications exist for {}?", "applications", Priority::Medium),
        ("What are the main risks or failure modes of {}?", "risks", Priority::Medium),
        ("How has {} changed in the last two years?", "history", Priority::Low),
        ("What tooling exists around {}?", "applications", Priority::Low),
        ("What would an expert dispute about {}?", "contradictions", Priority::Low),
    ];
    templates.iter()
        .map(|(template, category, priority)| SubQuery {
            query: template.replace("{}", subject),
            category: category.to_string(),
            priority: *priority,
        })
        .collect()
}

#[derive(Deserialize)]
struct RawInterpretation {
    label: String,
    summary: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

pub(crate) fn parse_interpretations(text: &str) -> Option<Vec<Interpretation>> {
    let block = extract_json_block(text)?;
    let raw: Vec<RawInterpretation> = serde_json::from_str(block).ok()?;
    if raw.len() != SYNTHESIS_LABELS.len() {
        return None;
    }
    Some(
        raw.into_iter()
            .map(|i| Interpretation {
                label: i.label,
                summary: i.summary,
                confidence: i.confidence.clamp(0.0, 1.0),
            })
            .collect(),
    )
}

pub(crate) fn fallback_interpretations(reason: &str) -> Vec<Interpretation> {
    SYNTHESIS_LABELS
        .iter()
        .map(|label| Interpretation {
            label: label.to_string(),
            summary: format!("needs manual review: {reason}"),
            confidence: 0.3,
        })
        .collect()
}

fn summarize(
    task: &OvernightTask,
    findings: &[Finding],
    interpretations: &[Interpretation],
) -> String {
    let mut categories: Vec<&str> = findings.iter().map(|f| f.category.as_str()).collect();
    categories.sort();
    categories.dedup();

    let top = interpretations
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    match top {
        Some(best) => format!(
            "{}: {} findings across {} categories; leading interpretation {} ({:.0}% confidence)",
            task.subject,
            findings.len(),
            categories.len(),
            best.label,
            best.confidence * 100.0
        ),
        None => format!("{}: no findings", task.subject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_queries_accepts_fenced_array() {
        let text = "Here you go:\n```json\n[{\"query\": \"q1\", \"category\": \"evidence\", \"priority\": \"high\"}]\n```";
        let queries = parse_queries(text).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].priority, Priority::High);
        assert_eq!(queries[0].category, "evidence");
    }

    #[test]
    fn parse_queries_defaults_missing_fields() {
        let text = r#"[{"query": "just a question"}]"#;
        let queries = parse_queries(text).unwrap();
        assert_eq!(queries[0].category, "general");
        assert_eq!(queries[0].priority, Priority::Medium);
    }

    #[test]
    fn parse_queries_rejects_garbage() {
        assert!(parse_queries("no json here").is_none());
        assert!(parse_queries("[]").is_none());
        assert!(parse_queries(r#"[{"nope": true}]"#).is_none());
    }

    #[test]
    fn parse_queries_caps_at_fifteen() {
        let many: Vec<String> = (0..30)
            .map(|i| format!("{{\"query\": \"q{i}\"}}"))
            .collect();
        let text = format!("[{}]", many.join(","));
        let queries = parse_queries(&text).unwrap();
        assert_eq!(queries.len(), MAX_QUERIES);
    }

    #[test]
    fn fallback_queries_cover_tiers() {
        let queries = fallback_queries("rust async runtimes");
        assert!(queries.len() >= 10);
        assert!(queries.iter().any(|q| q.priority == Priority::High));
        assert!(queries.iter().any(|q| q.priority == Priority::Medium));
        assert!(queries.iter().any(|q| q.priority == Priority::Low));
        assert!(queries.iter().all(|q| q.query.contains("rust async runtimes")));
    }

    #[test]
    fn parse_interpretations_requires_exactly_three() {
        let two = r#"[{"label":"A","summary":"s"},{"label":"B","summary":"s"}]"#;
        assert!(parse_interpretations(two).is_none());

        let three = r#"[
            {"label":"Conservative","summary":"safe","confidence":0.8},
            {"label":"Innovative","summary":"bold","confidence":0.5},
            {"label":"Pragmatic","summary":"mix","confidence":0.7}
        ]"#;
        let parsed = parse_interpretations(three).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].label, "Conservative");
    }

    #[test]
    fn parse_interpretations_clamps_confidence() {
        let text = r#"[
            {"label":"Conservative","summary":"s","confidence":7.0},
            {"label":"Innovative","summary":"s","confidence":-1.0},
            {"label":"Pragmatic","summary":"s"}
        ]"#;
        let parsed = parse_interpretations(text).unwrap();
        assert_eq!(parsed[0].confidence, 1.0);
        assert_eq!(parsed[1].confidence, 0.0);
        assert_eq!(parsed[2].confidence, 0.5);
    }

    #[test]
    fn fallback_triple_is_labeled_for_manual_review() {
        let triple = fallback_interpretations("synthesis unavailable");
        assert_eq!(triple.len(), 3);
        for (interpretation, label) in triple.iter().zip(SYNTHESIS_LABELS) {
            assert_eq!(interpretation.label, label);
            assert!(interpretation.summary.contains("needs manual review"));
        }
    }

    #[tokio::test]
    async fn harvest_drops_failed_queries_and_keeps_the_rest() {
        use std::collections::HashMap;
        use std::sync::Arc;

        use tokio_util::sync::CancellationToken;

        use crate::core::accounts::AccountPool;
        use crate::core::collaborators::Collaborators;
        use crate::core::config::{AccountConfig, ExecutorProfile};

        // The prompt arrives as the shell's $4; queries tagged FAILME die,
        // everything else reports one finding.
        let script = r#"
            case "$4" in *FAILME*) echo boom >&2; exit 1;; esac
            echo '{"type":"result","result":"found","is_error":false}'
        "#;
        let mut config = EngineConfig::default();
        config.executors.insert(
            "research".to_string(),
            ExecutorProfile {
                command: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                model: None,
                accounts: vec![AccountConfig {
                    id: "test".to_string(),
                    env: HashMap::new(),
                }],
            },
        );
        let pool = Arc::new(AccountPool::from_config(&config));
        let dispatcher = Dispatcher::new(config.clone(), pool, CancellationToken::new());
        let dive = ResearchDive::new(dispatcher, Collaborators::standalone(), config);

        let sub = |query: &str| SubQuery {
            query: query.to_string(),
            category: "landscape".to_string(),
            priority: Priority::High,
        };
        let queries = vec![sub("q1"), sub("FAILME q2"), sub("q3"), sub("q4")];

        // Four high-priority queries fan out together; the one failure is
        // dropped and never aborts the batch.
        let (findings, iterations) = dive.harvest(&queries).await;
        assert_eq!(findings.len(), 3);
        assert_eq!(iterations.len(), 4);
        assert!(findings.iter().all(|f| f.content == "found"));
        assert!(!findings.iter().any(|f| f.query.contains("FAILME")));
    }
}
