//! Proposal lifecycle for discovered work.
//!
//! Ideas surfaced during nightly sessions move through an explicit stage
//! machine before anything with side effects is allowed to run. Archived and
//! rejected proposals are terminal.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::core::jobs::{RiskLevel, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStage {
    Idea,
    Research,
    Plan,
    Archived,
    Rejected,
}

impl ProposalStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStage::Idea => "idea",
            ProposalStage::Research => "research",
            ProposalStage::Plan => "plan",
            ProposalStage::Archived => "archived",
            ProposalStage::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProposalStage::Archived | ProposalStage::Rejected)
    }
}

pub fn can_advance(from: ProposalStage, to: ProposalStage) -> bool {
    if from == to {
        return false;
    }
    match from {
        ProposalStage::Idea => matches!(
            to,
            ProposalStage::Research | ProposalStage::Archived | ProposalStage::Rejected
        ),
        ProposalStage::Research => matches!(
            to,
            ProposalStage::Plan | ProposalStage::Archived | ProposalStage::Rejected
        ),
        ProposalStage::Plan => {
            matches!(to, ProposalStage::Archived | ProposalStage::Rejected)
        }
        ProposalStage::Archived | ProposalStage::Rejected => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub rationale: String,
    pub stage: ProposalStage,
    pub risk: RiskLevel,
    pub approval: ApprovalStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub rejection_reason: Option<String>,
}

impl Proposal {
    pub fn new(title: &str, rationale: &str, stage: ProposalStage, risk: RiskLevel) -> Self {
        let now = now_ms();
        Self {
            id: format!("prop_{}", Uuid::new_v4()),
            title: title.to_string(),
            rationale: rationale.to_string(),
            stage,
            risk,
            approval: ApprovalStatus::Pending,
            created_at_ms: now,
            updated_at_ms: now,
            rejection_reason: None,
        }
    }
}

/// The persisted set of proposals, inspected and decided between sessions.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProposalBook {
    pub proposals: Vec<Proposal>,
}

impl ProposalBook {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read proposals {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse proposals {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize proposals")?;
        std::fs::write(path, raw).with_context(|| format!("write proposals {}", path.display()))
    }

    pub fn add(&mut self, proposal: Proposal) -> &Proposal {
        info!(id = %proposal.id, title = %proposal.title, "proposal recorded");
        self.proposals.push(proposal);
        self.proposals.last().expect("just pushed")
    }

    pub fn get(&self, id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == id)
    }

    /// Advance a proposal to a new stage if the transition table allows it.
    pub fn advance(&mut self, id: &str, to: ProposalStage) -> bool {
        let Some(proposal) = self.proposals.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if !can_advance(proposal.stage, to) {
            return false;
        }
        proposal.stage = to;
        proposal.updated_at_ms = now_ms();
        true
    }

    pub fn approve(&mut self, id: &str) -> bool {
        let Some(proposal) = self.proposals.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if proposal.stage.is_terminal() || proposal.approval != ApprovalStatus::Pending {
            return false;
        }
        proposal.approval = ApprovalStatus::Approved;
        proposal.updated_at_ms = now_ms();
        true
    }

    pub fn reject(&mut self, id: &str, reason: &str) -> bool {
        let Some(proposal) = self.proposals.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if proposal.stage.is_terminal() {
            return false;
        }
        proposal.approval = ApprovalStatus::Rejected;
        proposal.stage = ProposalStage::Rejected;
        proposal.rejection_reason = Some(reason.to_string());
        proposal.updated_at_ms = now_ms();
        true
    }

    /// Approved plan-stage proposals ready to materialize as pre-approved
    /// jobs next session.
    pub fn approved_plans(&self) -> Vec<&Proposal> {
        self.proposals
            .iter()
            .filter(|p| p.stage == ProposalStage::Plan && p.approval == ApprovalStatus::Approved)
            .collect()
    }

    /// Pending decisions for the approvals screen.
    pub fn undecided(&self) -> Vec<&Proposal> {
        self.proposals
            .iter()
            .filter(|p| !p.stage.is_terminal() && p.approval == ApprovalStatus::Pending)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_table_allows_forward_motion_only() {
        assert!(can_advance(ProposalStage::Idea, ProposalStage::Research));
        assert!(can_advance(ProposalStage::Research, ProposalStage::Plan));
        assert!(can_advance(ProposalStage::Idea, ProposalStage::Archived));
        assert!(can_advance(ProposalStage::Plan, ProposalStage::Rejected));

        assert!(!can_advance(ProposalStage::Idea, ProposalStage::Plan));
        assert!(!can_advance(ProposalStage::Research, ProposalStage::Idea));
        assert!(!can_advance(ProposalStage::Plan, ProposalStage::Plan));
    }

    #[test]
    fn archived_and_rejected_are_terminal() {
        for terminal in [ProposalStage::Archived, ProposalStage::Rejected] {
            for target in [
                ProposalStage::Idea,
                ProposalStage::Research,
                ProposalStage::Plan,
                ProposalStage::Archived,
                ProposalStage::Rejected,
            ] {
                assert!(!can_advance(terminal, target));
            }
        }
    }

    #[test]
    fn book_advance_respects_table() {
        let mut book = ProposalBook::default();
        let id = book
            .add(Proposal::new(
                "idea",
                "because",
                ProposalStage::Idea,
                RiskLevel::High,
            ))
            .id
            .clone();

        assert!(!book.advance(&id, ProposalStage::Plan)); // skipping research
        assert!(book.advance(&id, ProposalStage::Research));
        assert!(book.advance(&id, ProposalStage::Plan));
        assert!(book.advance(&id, ProposalStage::Archived));
        assert!(!book.advance(&id, ProposalStage::Plan));
    }

    #[test]
    fn reject_records_reason_and_blocks_further_changes() {
        let mut book = ProposalBook::default();
        let id = book
            .add(Proposal::new(
                "risky",
                "because",
                ProposalStage::Plan,
                RiskLevel::High,
            ))
            .id
            .clone();

        assert!(book.reject(&id, "out of scope"));
        let proposal = book.get(&id).unwrap();
        assert_eq!(proposal.stage, ProposalStage::Rejected);
        assert_eq!(proposal.rejection_reason.as_deref(), Some("out of scope"));

        assert!(!book.approve(&id));
        assert!(!book.reject(&id, "again"));
    }

    #[test]
    fn approved_plans_filtered_for_materialization() {
        let mut book = ProposalBook::default();
        let plan = book
            .add(Proposal::new(
                "plan",
                "r",
                ProposalStage::Plan,
                RiskLevel::High,
            ))
            .id
            .clone();
        book.add(Proposal::new(
            "idea",
            "r",
            ProposalStage::Idea,
            RiskLevel::Low,
        ));

        assert!(book.approved_plans().is_empty());
        assert!(book.approve(&plan));
        assert_eq!(book.approved_plans().len(), 1);
        assert_eq!(book.undecided().len(), 1);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proposals.json");

        let mut book = ProposalBook::default();
        book.add(Proposal::new(
            "persisted",
            "r",
            ProposalStage::Research,
            RiskLevel::Medium,
        ));
        book.save(&path).unwrap();

        let loaded = ProposalBook::load(&path).unwrap();
        assert_eq!(loaded.proposals.len(), 1);
        assert_eq!(loaded.proposals[0].title, "persisted");
        assert_eq!(loaded.proposals[0].stage, ProposalStage::Research);
    }

    #[test]
    fn load_missing_file_yields_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = ProposalBook::load(&dir.path().join("nope.json")).unwrap();
        assert!(book.proposals.is_empty());
    }
}
