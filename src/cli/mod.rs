mod approvals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::accounts::AccountPool;
use crate::core::collaborators::Collaborators;
use crate::core::config::{self, EngineConfig};
use crate::core::dispatch::Dispatcher;
use crate::core::night::snapshot::SessionSnapshot;
use crate::core::night::{NightSupervisor, PROPOSALS_FILE};
use crate::core::tasks::proposal::ProposalBook;
use crate::core::tasks::prototype::PrototypeRun;
use crate::core::tasks::research::ResearchDive;
use crate::core::tasks::{OvernightTask, TaskIntake, TaskKind};
use crate::core::terminal::{self, GuideSection, print_error, print_info, print_status, print_success};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Sessions")
        .command("night", "Run one nightly session now")
        .command("daemon", "Run on the configured nightly schedule")
        .print();

    GuideSection::new("Tasks")
        .command("research", "Run a research dive on a subject")
        .command("prototype", "Run a prototype iteration on a subject")
        .print();

    GuideSection::new("Review")
        .command("approvals", "Decide on pending proposals")
        .command("status", "Show the last session snapshot")
        .print();

    println!(
        "\n {} {} <command> [--config <path>] [subject...]\n",
        style("Usage:").bold(),
        style("nocturne").green()
    );
}

/// Pull `--config <path>` out of argv; everything else is positional.
pub(crate) fn parse_common_args(args: &[String], start: usize) -> (Option<PathBuf>, Vec<String>) {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }
    (config_path, positional)
}

pub async fn run_main() -> Result<()> {
    crate::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let (config_path, positional) = parse_common_args(&args, 2);

    match command {
        "night" => night_cmd(config_path).await,
        "daemon" => daemon_cmd(config_path).await,
        "research" => task_cmd(config_path, positional, TaskKind::Research).await,
        "prototype" => task_cmd(config_path, positional, TaskKind::Prototype).await,
        "approvals" => approvals::run(),
        "status" => status_cmd(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
            std::process::exit(2);
        }
    }
}

fn build_supervisor(config: &EngineConfig) -> (Arc<NightSupervisor>, Arc<TaskIntake>) {
    let pool = Arc::new(AccountPool::from_config(config));
    let intake = Arc::new(TaskIntake::default());
    let supervisor = Arc::new(NightSupervisor::new(
        config.clone(),
        pool,
        Collaborators::standalone(),
        intake.clone(),
    ));
    (supervisor, intake)
}

/// Ctrl-C drives supervisor shutdown, which cancels in-flight invocations.
fn wire_shutdown(supervisor: &Arc<NightSupervisor>) {
    let supervisor = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_info("Shutting down, letting the session finalize...");
            supervisor.shutdown();
        }
    });
}

async fn night_cmd(config_path: Option<PathBuf>) -> Result<()> {
    let config = EngineConfig::load(config_path.as_deref())?;
    let (supervisor, _intake) = build_supervisor(&config);
    wire_shutdown(&supervisor);

    print_info("Starting night session...");
    let report = supervisor.run().await?;

    print_success(&format!("Session {} finished", report.session_id));
    print_status("completed", &report.completed.to_string());
    print_status("failed", &report.failed.to_string());
    print_status("blocked", &report.blocked.to_string());
    print_status("awaiting approval", &report.awaiting_approval.to_string());
    if !report.briefing.is_empty() {
        println!("\n{}\n", report.briefing.trim());
    }
    if report.awaiting_approval > 0 {
        print_info("Run `nocturne approvals` to decide on withheld work.");
    }
    Ok(())
}

async fn daemon_cmd(config_path: Option<PathBuf>) -> Result<()> {
    let config = EngineConfig::load(config_path.as_deref())?;
    let (supervisor, _intake) = build_supervisor(&config);

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("scheduler init: {e}"))?;
    let cron = config.night.cron.clone();
    let nightly = supervisor.clone();
    let job = Job::new_async(cron.as_str(), move |_id, _scheduler| {
        let supervisor = nightly.clone();
        Box::pin(async move {
            match supervisor.run().await {
                Ok(report) => info!(
                    session_id = %report.session_id,
                    completed = report.completed,
                    failed = report.failed,
                    "scheduled session finished"
                ),
                Err(e) => warn!(error = %e, "scheduled session failed"),
            }
        })
    })
    .map_err(|e| anyhow!("bad cron expression '{cron}': {e}"))?;
    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow!("schedule job: {e}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("start scheduler: {e}"))?;

    print_info(&format!(
        "Daemon running, nightly schedule '{}'. Ctrl-C to stop.",
        config.night.cron
    ));
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;

    supervisor.shutdown();
    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow!("stop scheduler: {e}"))?;
    Ok(())
}

async fn task_cmd(
    config_path: Option<PathBuf>,
    positional: Vec<String>,
    kind: TaskKind,
) -> Result<()> {
    if positional.is_empty() {
        bail!("a subject is required, e.g. `nocturne research \"local llm routers\"`");
    }
    let subject = positional.join(" ");

    let config = EngineConfig::load(config_path.as_deref())?;
    let pool = Arc::new(AccountPool::from_config(&config));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    let dispatcher = Dispatcher::new(config.clone(), pool, cancel);
    let collaborators = Collaborators::standalone();
    let task = OvernightTask::new(&subject, kind);

    match kind {
        TaskKind::Research => {
            print_info(&format!("Research dive: {subject}"));
            let dive = ResearchDive::new(dispatcher, collaborators, config);
            let outcome = dive.run(&task).await;

            print_success(&outcome.summary);
            print_status("findings", &outcome.findings.len().to_string());
            print_status("invocations", &outcome.iterations.len().to_string());
            for interpretation in &outcome.interpretations {
                println!(
                    "\n {} ({:.0}%)\n   {}",
                    style(&interpretation.label).bold().cyan(),
                    interpretation.confidence * 100.0,
                    interpretation.summary
                );
            }
        }
        TaskKind::Prototype => {
            print_info(&format!("Prototype iteration: {subject}"));
            let run = PrototypeRun::new(dispatcher, collaborators, config);
            let outcome = run.run(&task).await;

            print_success(&outcome.summary);
            for approach in &outcome.approaches {
                println!(
                    "\n {} via '{}' ({:.0}%)\n   {}",
                    style(&approach.label).bold().cyan(),
                    approach.profile,
                    approach.confidence * 100.0,
                    approach.summary
                );
            }
        }
    }
    Ok(())
}

fn status_cmd() -> Result<()> {
    let state_dir = config::state_dir();
    match SessionSnapshot::load(&state_dir)? {
        Some(snapshot) => {
            print_info(&format!("Last session: {}", snapshot.session_id));
            print_status("phase", &snapshot.phase);
            for (status, count) in snapshot.queue.counts() {
                print_status(status.as_str(), &count.to_string());
            }
            if let Some(briefing) = &snapshot.briefing {
                println!("\n{}\n", briefing.trim());
            }
            if !snapshot.findings.is_empty() {
                print_info("Notes:");
                for finding in &snapshot.findings {
                    println!("  - {finding}");
                }
            }
        }
        None => print_info("No session has run yet."),
    }

    let book = ProposalBook::load(&state_dir.join(PROPOSALS_FILE))?;
    let undecided = book.undecided().len();
    if undecided > 0 {
        print_info(&format!(
            "{undecided} proposal(s) awaiting decision; run `nocturne approvals`."
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_extracted_from_anywhere() {
        let args: Vec<String> =
            ["nocturne", "research", "--config", "/tmp/c.toml", "rust", "lsm", "trees"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        let (config, positional) = parse_common_args(&args, 2);
        assert_eq!(config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(positional, vec!["rust", "lsm", "trees"]);
    }

    #[test]
    fn missing_config_value_is_tolerated() {
        let args: Vec<String> = ["nocturne", "night", "--config"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (config, positional) = parse_common_args(&args, 2);
        assert_eq!(config, None);
        assert!(positional.is_empty());
    }
}
