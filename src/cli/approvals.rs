//! Interactive approval screen for pending proposals.

use anyhow::{Context, Result, anyhow};
use console::style;
use inquire::{Select, Text};

use crate::core::config;
use crate::core::night::PROPOSALS_FILE;
use crate::core::tasks::proposal::ProposalBook;
use crate::core::terminal::{print_info, print_success, print_warn};

const DECIDE_APPROVE: &str = "approve (runs next session)";
const DECIDE_REJECT: &str = "reject";
const DECIDE_SKIP: &str = "skip";
const DECIDE_QUIT: &str = "quit";

pub fn run() -> Result<()> {
    let path = config::state_dir().join(PROPOSALS_FILE);
    let mut book = ProposalBook::load(&path)?;

    let pending: Vec<String> = book.undecided().iter().map(|p| p.id.clone()).collect();
    if pending.is_empty() {
        print_info("No proposals waiting for a decision.");
        return Ok(());
    }
    print_info(&format!("{} proposal(s) awaiting a decision", pending.len()));

    let mut decided = 0usize;
    for id in pending {
        let Some(proposal) = book.get(&id) else {
            continue;
        };
        println!(
            "\n {} {}\n   stage: {} | risk: {:?}\n   {}",
            style("▸").cyan(),
            style(&proposal.title).bold(),
            proposal.stage.as_str(),
            proposal.risk,
            proposal.rationale
        );

        let choice = Select::new(
            "Decision:",
            vec![DECIDE_APPROVE, DECIDE_REJECT, DECIDE_SKIP, DECIDE_QUIT],
        )
        .prompt()
        .map_err(|e| anyhow!("approval prompt failed: {e}"))?;

        match choice {
            DECIDE_APPROVE => {
                if book.approve(&id) {
                    decided += 1;
                    print_success("Approved.");
                } else {
                    print_warn("Proposal can no longer be approved.");
                }
            }
            DECIDE_REJECT => {
                let reason = Text::new("Reason:")
                    .with_default("rejected from approvals screen")
                    .prompt()
                    .map_err(|e| anyhow!("reason prompt failed: {e}"))?;
                if book.reject(&id, &reason) {
                    decided += 1;
                    print_success("Rejected.");
                }
            }
            DECIDE_SKIP => continue,
            _ => break,
        }
    }

    book.save(&path).context("save proposal decisions")?;
    print_info(&format!("{decided} decision(s) recorded."));
    Ok(())
}
