//! Process executor adapter.
//!
//! Spawns one external executor CLI per invocation in its own process group,
//! streams NDJSON events from stdout, enforces output caps and drives the
//! timeout/cancel SIGTERM→SIGKILL escalation. Each invocation is fully
//! self-contained: no state is shared between concurrent runs.
//!
//! The run is modelled as a small state machine (Running → TimedOut /
//! Cancelled / Closed → Settled) fed by three event sources (stdout EOF,
//! the exit status, and the timeout/cancel interrupts), and finalization is
//! guaranteed to happen exactly once no matter which source fires first.
//! Exit is the authoritative settle signal; stdout EOF only accelerates it,
//! so a grandchild holding the pipe open cannot stall the result.

pub mod classify;
pub mod events;
mod signal;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{ExecutorProfile, Limits};
use classify::{ErrorClass, classify_error};
use events::OutputAccumulator;

/// Logical invocation outcome. Callers branch on this, never on raw exit
/// codes, because each variant implies a different retry/cooldown policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Success,
    QuotaExhausted,
    AuthError,
    TimedOut,
    Cancelled,
    Failure,
}

impl ExecOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecOutcome::Success => "success",
            ExecOutcome::QuotaExhausted => "quota_exhausted",
            ExecOutcome::AuthError => "auth_error",
            ExecOutcome::TimedOut => "timed_out",
            ExecOutcome::Cancelled => "cancelled",
            ExecOutcome::Failure => "failure",
        }
    }

    pub fn is_success(self) -> bool {
        self == ExecOutcome::Success
    }
}

/// Per-invocation options.
#[derive(Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    /// Per-attempt timeout; defaults to the configured limit.
    pub timeout: Option<Duration>,
    /// Resume an earlier session instead of starting fresh.
    pub resume_session: Option<String>,
    pub model: Option<String>,
    /// External cancellation; drives the same escalation as a timeout but
    /// resolves as a distinct outcome.
    pub cancel: Option<CancellationToken>,
    /// Credential environment overlay from the selected account.
    pub account_env: HashMap<String, String>,
}

/// Result of one invocation. Partial output is always present, even on
/// failure or timeout.
#[derive(Debug)]
pub struct ExecResult {
    pub outcome: ExecOutcome,
    pub output: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Resumable session id captured from the init event, if any.
    pub session_id: Option<String>,
    pub truncated: bool,
}

/// Phases of one invocation's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Running,
    TimedOut,
    Cancelled,
    /// stdout closed before the exit status was observed.
    Closed,
    Settled,
}

/// Tracks which of the three event sources have fired and guarantees a
/// single finalization. Pure state, unit-tested against every ordering.
#[derive(Debug)]
struct RunStateMachine {
    phase: RunPhase,
    exit_seen: bool,
    finalized: bool,
}

impl RunStateMachine {
    fn new() -> Self {
        Self {
            phase: RunPhase::Running,
            exit_seen: false,
            finalized: false,
        }
    }

    /// Timeout fired. Returns true when this transition begins escalation;
    /// late timeouts (after exit, cancel or settle) are ignored.
    fn on_timeout(&mut self) -> bool {
        if self.phase == RunPhase::Running && !self.exit_seen {
            self.phase = RunPhase::TimedOut;
            return true;
        }
        false
    }

    /// Cancellation fired. Same contract as [`Self::on_timeout`].
    fn on_cancel(&mut self) -> bool {
        if self.phase == RunPhase::Running && !self.exit_seen {
            self.phase = RunPhase::Cancelled;
            return true;
        }
        false
    }

    fn on_output_closed(&mut self) {
        if self.phase == RunPhase::Running {
            self.phase = RunPhase::Closed;
        }
    }

    fn on_exit(&mut self) {
        self.exit_seen = true;
    }

    fn timed_out(&self) -> bool {
        self.phase == RunPhase::TimedOut
    }

    fn cancelled(&self) -> bool {
        self.phase == RunPhase::Cancelled
    }

    /// Move to Settled. True exactly once, and only after the exit status
    /// has been observed.
    fn try_finalize(&mut self) -> bool {
        if self.finalized || !self.exit_seen {
            return false;
        }
        if self.phase == RunPhase::Running || self.phase == RunPhase::Closed {
            self.phase = RunPhase::Settled;
        }
        self.finalized = true;
        true
    }
}

/// One configured executor the engine can invoke.
#[derive(Clone)]
pub struct Executor {
    name: String,
    profile: ExecutorProfile,
    limits: Limits,
}

impl Executor {
    pub fn new(name: impl Into<String>, profile: ExecutorProfile, limits: Limits) -> Self {
        Self {
            name: name.into(),
            profile,
            limits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one invocation to completion.
    ///
    /// Expected failures (timeout, cancel, quota, auth, non-zero exit) come
    /// back as typed outcomes in `Ok`. `Err` is reserved for fatal problems:
    /// spawn failure or a process group that survives SIGKILL.
    pub async fn execute(&self, prompt: &str, opts: ExecOptions) -> Result<ExecResult> {
        let started = Instant::now();
        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_secs(self.limits.exec_timeout_secs));
        let via_stdin = prompt.len() > self.limits.prompt_stdin_threshold;

        let mut cmd = self.build_command(prompt, &opts, via_stdin);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn executor '{}'", self.profile.command))?;
        let pgid = child.id().context("spawned executor has no pid")?;

        debug!(
            executor = %self.name,
            pgid,
            timeout_secs = timeout.as_secs(),
            via_stdin,
            "executor spawned"
        );

        if via_stdin && let Some(mut stdin) = child.stdin.take() {
            let body = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&body).await {
                    debug!(error = %e, "prompt stdin write failed");
                }
                // stdin drops here, closing the pipe.
            });
        }

        let stdout = child.stdout.take().context("executor stdout not piped")?;
        let stderr = child.stderr.take().context("executor stderr not piped")?;

        let acc = Arc::new(Mutex::new(OutputAccumulator::new(
            self.limits.stdout_cap_bytes,
        )));
        let stdout_task = tokio::spawn({
            let acc = acc.clone();
            async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    acc.lock().await.absorb_line(&line);
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = tokio::spawn(read_stderr_capped(
            stderr,
            self.limits.stderr_cap_bytes,
            stderr_buf.clone(),
        ));

        let cancel = opts.cancel.unwrap_or_default();
        let mut sm = RunStateMachine::new();

        let exit: Option<ExitStatus> = tokio::select! {
            status = child.wait() => {
                sm.on_exit();
                Some(status.context("wait for executor")?)
            }
            _ = tokio::time::sleep(timeout) => {
                if sm.on_timeout() {
                    info!(executor = %self.name, pgid, "invocation timed out, escalating");
                }
                let status = self.escalate(&mut child, pgid).await?;
                sm.on_exit();
                status
            }
            _ = cancel.cancelled() => {
                if sm.on_cancel() {
                    info!(executor = %self.name, pgid, "invocation cancelled, escalating");
                }
                let status = self.escalate(&mut child, pgid).await?;
                sm.on_exit();
                status
            }
        };

        // Give the pipes a short drain window. With the whole group dead
        // they close immediately; a stray holder must not stall settling.
        let drain = Duration::from_millis(500);
        if tokio::time::timeout(drain, stdout_task).await.is_ok() {
            sm.on_output_closed();
        } else {
            warn!(executor = %self.name, pgid, "stdout still open after exit, abandoning drain");
        }
        let _ = tokio::time::timeout(drain, stderr_task).await;

        if !sm.try_finalize() {
            bail!("invocation finalized twice or before exit");
        }

        let accumulated = {
            let mut guard = acc.lock().await;
            std::mem::replace(&mut *guard, OutputAccumulator::new(0)).finish()
        };
        let stderr_text = stderr_buf.lock().await.clone();

        let exit_code = exit.and_then(|s| s.code());
        let duration = started.elapsed();
        let timed_out = sm.timed_out();
        let was_cancelled = sm.cancelled();
        let success = exit_code == Some(0)
            && !timed_out
            && !was_cancelled
            && !accumulated.result_was_error;

        let outcome = if timed_out {
            ExecOutcome::TimedOut
        } else if was_cancelled {
            ExecOutcome::Cancelled
        } else if success {
            ExecOutcome::Success
        } else {
            let mut probe = String::with_capacity(stderr_text.len() + accumulated.text.len() + 1);
            probe.push_str(&stderr_text);
            probe.push('\n');
            probe.push_str(&accumulated.text);
            match classify_error(&probe) {
                ErrorClass::Quota => ExecOutcome::QuotaExhausted,
                ErrorClass::Auth => ExecOutcome::AuthError,
                ErrorClass::Generic => ExecOutcome::Failure,
            }
        };

        info!(
            executor = %self.name,
            outcome = outcome.as_str(),
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "invocation settled"
        );

        Ok(ExecResult {
            outcome,
            output: accumulated.text,
            exit_code,
            duration,
            session_id: accumulated.session_id,
            truncated: accumulated.dropped_bytes > 0,
        })
    }

    /// SIGTERM the process group; SIGKILL after the grace window; fail
    /// fatally if the group survives even that.
    async fn escalate(&self, child: &mut Child, pgid: u32) -> Result<Option<ExitStatus>> {
        signal::send_group_signal(pgid, Signal::SIGTERM);
        let grace = Duration::from_secs(self.limits.term_grace_secs);
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return Ok(Some(status.context("wait after SIGTERM")?));
        }

        warn!(executor = %self.name, pgid, "SIGTERM ignored, sending SIGKILL");
        signal::send_group_signal(pgid, Signal::SIGKILL);
        let kill_grace = Duration::from_secs(self.limits.kill_grace_secs);
        match tokio::time::timeout(kill_grace, child.wait()).await {
            Ok(status) => Ok(Some(status.context("wait after SIGKILL")?)),
            Err(_) => bail!(
                "executor '{}' process group {pgid} survived SIGKILL",
                self.name
            ),
        }
    }

    fn build_command(&self, prompt: &str, opts: &ExecOptions, via_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.profile.command);
        cmd.args(&self.profile.args);
        cmd.arg("--output-format").arg("stream-json").arg("--verbose");
        if let Some(model) = opts.model.as_deref().or(self.profile.model.as_deref()) {
            cmd.arg("--model").arg(model);
        }
        if let Some(session) = &opts.resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.arg("-p");
        if via_stdin {
            // Large prompts ride on stdin; the bare -p tells the CLI to read it.
            cmd.stdin(Stdio::piped());
        } else {
            cmd.arg(prompt);
            cmd.stdin(Stdio::null());
        }

        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }

        // Filtered copy of the host env plus deterministic overrides, then
        // the account credential overlay on top.
        cmd.env_clear();
        for (key, value) in std::env::vars() {
            if env_allowed(&key) {
                cmd.env(key, value);
            }
        }
        cmd.env("NO_COLOR", "1");
        cmd.env("TERM", "dumb");
        cmd.env("CI", "true");
        for (key, value) in &opts.account_env {
            cmd.env(key, value);
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.process_group(0);
        cmd.kill_on_drop(true);
        cmd
    }
}

fn env_allowed(key: &str) -> bool {
    !key.starts_with("NOCTURNE_") && key != "NO_COLOR" && key != "TERM" && key != "CI"
}

/// Drain stderr into a capped string buffer. Bytes past the cap are
/// discarded while the pipe keeps draining.
async fn read_stderr_capped(
    stderr: tokio::process::ChildStderr,
    cap: usize,
    buf: Arc<Mutex<String>>,
) {
    let mut reader = BufReader::new(stderr);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock().await;
                let remaining = cap.saturating_sub(guard.len());
                if remaining > 0 {
                    let keep = n.min(remaining);
                    guard.push_str(&String::from_utf8_lossy(&chunk[..keep]));
                }
            }
        }
    }
}
