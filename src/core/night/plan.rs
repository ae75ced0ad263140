//! Structured nightly plan parsing.
//!
//! The planning executor is asked for JSON with three typed lists. Models
//! drift, wrap output in prose, or emit garbage; all of that degrades to a
//! smaller or empty plan. A malformed response must never abort a session.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NightPlan {
    #[serde(default)]
    pub research: Vec<PlannedResearch>,
    #[serde(default)]
    pub ideas: Vec<PlannedIdea>,
    #[serde(default)]
    pub proposals: Vec<PlannedChange>,
}

impl NightPlan {
    pub fn is_empty(&self) -> bool {
        self.research.is_empty() && self.ideas.is_empty() && self.proposals.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedResearch {
    pub subject: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedIdea {
    pub idea: String,
    #[serde(default)]
    pub angle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedChange {
    pub title: String,
    pub rationale: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Extract a JSON block from executor output. Tries fenced ```json ... ```
/// first, then raw JSON starting with `{` or `[`.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    None
}

/// Parse planner output into a capped plan. Any parse failure yields an
/// empty plan.
pub fn parse_plan(
    text: &str,
    max_research: usize,
    max_ideas: usize,
    max_proposals: usize,
) -> NightPlan {
    let Some(block) = extract_json_block(text) else {
        warn!("planner output contained no JSON, using empty plan");
        return NightPlan::default();
    };
    let mut plan = match serde_json::from_str::<NightPlan>(block) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "planner output failed to parse, using empty plan");
            return NightPlan::default();
        }
    };
    plan.research.truncate(max_research);
    plan.ideas.truncate(max_ideas);
    plan.proposals.truncate(max_proposals);
    plan
}

/// Prompt sent to the planning executor.
pub fn build_planner_prompt(
    digest: &str,
    max_research: usize,
    max_ideas: usize,
    max_proposals: usize,
) -> String {
    format!(
        "You plan one night of autonomous work for a personal agent. \
         Based on the context below, produce ONLY valid JSON, no other text:\n\n\
         {{\n\
           \"research\": [{{\"subject\": \"...\", \"question\": \"...\"}}],\n\
           \"ideas\": [{{\"idea\": \"...\", \"angle\": \"...\"}}],\n\
           \"proposals\": [{{\"title\": \"...\", \"rationale\": \"...\", \"target\": \"...\"}}]\n\
         }}\n\n\
         Rules:\n\
         - At most {max_research} research items, {max_ideas} ideas, {max_proposals} proposals.\n\
         - Proposals are conservative code or configuration changes only; anything \
         irreversible is out.\n\
         - Prefer work that compounds: open questions from previous nights first.\n\n\
         CONTEXT:\n{digest}"
    )
}
