//! One invocation, end to end: resolve the executor profile, claim an
//! account, run the adapter, report the outcome back to the registry.
//!
//! Every orchestration layer (night supervisor, research dive, prototype
//! iteration) funnels executor calls through here so account accounting can
//! never be skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::core::accounts::AccountPool;
use crate::core::config::EngineConfig;
use crate::core::exec::{ExecOptions, ExecOutcome, Executor};

/// Outcome of one dispatched invocation. `exhausted` distinguishes "no
/// account was available" from a failure of the invocation itself.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub outcome: ExecOutcome,
    pub output: String,
    pub session_id: Option<String>,
    pub account_id: Option<String>,
    pub duration_ms: u64,
    pub exhausted: bool,
}

impl DispatchResult {
    fn unavailable(reason: &str) -> Self {
        Self {
            outcome: ExecOutcome::Failure,
            output: reason.to_string(),
            session_id: None,
            account_id: None,
            duration_ms: 0,
            exhausted: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    config: EngineConfig,
    pool: Arc<AccountPool>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: EngineConfig, pool: Arc<AccountPool>, cancel: CancellationToken) -> Self {
        Self {
            config,
            pool,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `prompt` on the named profile. Never returns `Err`: expected
    /// failures come back as outcomes, fatal adapter errors are folded into
    /// a generic failure so one bad invocation cannot abort a pipeline.
    pub async fn run(&self, profile_name: &str, prompt: &str, timeout: Option<Duration>) -> DispatchResult {
        self.run_with_session(profile_name, prompt, timeout, None).await
    }

    pub async fn run_with_session(
        &self,
        profile_name: &str,
        prompt: &str,
        timeout: Option<Duration>,
        resume_session: Option<String>,
    ) -> DispatchResult {
        let Some(profile) = self.config.profile(profile_name) else {
            warn!(profile = profile_name, "dispatch to unknown executor profile");
            return DispatchResult::unavailable("unknown executor profile");
        };
        let Some(lease) = self.pool.select(profile_name, None).await else {
            return DispatchResult::unavailable("executor accounts exhausted");
        };

        let invocation = Uuid::new_v4();
        let executor = Executor::new(profile_name, profile.clone(), self.config.limits.clone());
        let opts = ExecOptions {
            timeout,
            resume_session,
            cancel: Some(self.cancel.child_token()),
            account_env: lease.env.clone(),
            ..Default::default()
        };

        match executor.execute(prompt, opts).await {
            Ok(result) => {
                self.pool
                    .report(profile_name, &lease.id, invocation, result.outcome)
                    .await;
                DispatchResult {
                    outcome: result.outcome,
                    output: result.output,
                    session_id: result.session_id,
                    account_id: Some(lease.id),
                    duration_ms: result.duration.as_millis() as u64,
                    exhausted: false,
                }
            }
            Err(e) => {
                // Spawn failures and unkillable children count against the
                // account's generic failure streak.
                self.pool
                    .report(profile_name, &lease.id, invocation, ExecOutcome::Failure)
                    .await;
                warn!(profile = profile_name, error = %e, "invocation failed fatally");
                DispatchResult {
                    outcome: ExecOutcome::Failure,
                    output: format!("invocation error: {e}"),
                    session_id: None,
                    account_id: Some(lease.id),
                    duration_ms: 0,
                    exhausted: false,
                }
            }
        }
    }
}
