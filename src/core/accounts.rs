//! Account rotation registry.
//!
//! Spreads invocations across the quota-limited credential sets configured
//! per executor profile. Selection is round-robin starting after the last
//! returned account, skipping anything cooling down or over the failure
//! threshold. Select+claim runs under one lock (two concurrent invocations
//! can never claim the same account in the same instant), and outcome
//! reporting is idempotent per invocation id, so a retried report never
//! double-penalizes.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::{EngineConfig, Limits};
use crate::core::exec::ExecOutcome;

/// A claimed account: id for reporting plus the credential env overlay for
/// the child process.
#[derive(Debug, Clone)]
pub struct AccountLease {
    pub id: String,
    pub env: HashMap<String, String>,
}

#[derive(Debug)]
struct AccountState {
    id: String,
    env: HashMap<String, String>,
    cooldown_until: Option<Instant>,
    consecutive_failures: u32,
    auth_failures: u32,
    reported: HashSet<Uuid>,
}

impl AccountState {
    fn available(&self, failure_threshold: u32, now: Instant) -> bool {
        if self.consecutive_failures >= failure_threshold {
            return false;
        }
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

#[derive(Debug)]
struct ProfilePool {
    accounts: Vec<AccountState>,
    cursor: usize,
}

/// Registry of all accounts, keyed by executor profile name.
pub struct AccountPool {
    limits: Limits,
    pools: Mutex<HashMap<String, ProfilePool>>,
}

impl AccountPool {
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut pools = HashMap::new();
        for (name, profile) in &config.executors {
            let accounts = profile
                .accounts
                .iter()
                .map(|a| AccountState {
                    id: a.id.clone(),
                    env: a.env.clone(),
                    cooldown_until: None,
                    consecutive_failures: 0,
                    auth_failures: 0,
                    reported: HashSet::new(),
                })
                .collect();
            pools.insert(
                name.clone(),
                ProfilePool {
                    accounts,
                    cursor: 0,
                },
            );
        }
        Self {
            limits: config.limits.clone(),
            pools: Mutex::new(pools),
        }
    }

    /// Claim an account for `profile`. `None` means the pool is exhausted;
    /// callers must surface that as a distinguishable outcome, never hang.
    pub async fn select(&self, profile: &str, preferred: Option<&str>) -> Option<AccountLease> {
        let now = Instant::now();
        let mut pools = self.pools.lock().await;
        let pool = pools.get_mut(profile)?;
        if pool.accounts.is_empty() {
            return None;
        }

        if let Some(wanted) = preferred {
            if let Some((idx, account)) = pool
                .accounts
                .iter()
                .enumerate()
                .find(|(_, a)| a.id == wanted)
                && account.available(self.limits.failure_threshold, now)
            {
                pool.cursor = idx;
                return Some(AccountLease {
                    id: account.id.clone(),
                    env: account.env.clone(),
                });
            }
            debug!(profile, wanted, "preferred account unavailable, rotating");
        }

        let len = pool.accounts.len();
        for step in 1..=len {
            let idx = (pool.cursor + step) % len;
            let account = &pool.accounts[idx];
            if account.available(self.limits.failure_threshold, now) {
                pool.cursor = idx;
                debug!(profile, account = %account.id, "account selected");
                return Some(AccountLease {
                    id: account.id.clone(),
                    env: account.env.clone(),
                });
            }
        }

        warn!(profile, "all accounts cooling down or over failure threshold");
        None
    }

    /// Record one invocation's outcome against the account that ran it.
    /// Mandatory per invocation; repeated reports for the same invocation id
    /// are ignored.
    pub async fn report(
        &self,
        profile: &str,
        account_id: &str,
        invocation: Uuid,
        outcome: ExecOutcome,
    ) {
        let mut pools = self.pools.lock().await;
        let Some(pool) = pools.get_mut(profile) else {
            warn!(profile, "outcome reported for unknown profile");
            return;
        };
        let Some(account) = pool.accounts.iter_mut().find(|a| a.id == account_id) else {
            warn!(profile, account_id, "outcome reported for unknown account");
            return;
        };
        if !account.reported.insert(invocation) {
            debug!(account_id, %invocation, "duplicate outcome report ignored");
            return;
        }

        match outcome {
            ExecOutcome::Success => {
                account.consecutive_failures = 0;
                account.auth_failures = 0;
            }
            ExecOutcome::QuotaExhausted => {
                account.consecutive_failures += 1;
                let cooldown = Duration::from_secs(self.limits.quota_cooldown_secs);
                account.cooldown_until = Some(Instant::now() + cooldown);
                info!(
                    account_id,
                    cooldown_secs = cooldown.as_secs(),
                    failures = account.consecutive_failures,
                    "quota exhausted, long cooldown"
                );
            }
            ExecOutcome::AuthError => {
                account.consecutive_failures += 1;
                account.auth_failures += 1;
                if account.auth_failures >= self.limits.auth_threshold {
                    let cooldown = Duration::from_secs(self.limits.auth_cooldown_secs);
                    account.cooldown_until = Some(Instant::now() + cooldown);
                    info!(
                        account_id,
                        cooldown_secs = cooldown.as_secs(),
                        "repeated auth failures, short cooldown"
                    );
                }
            }
            ExecOutcome::TimedOut | ExecOutcome::Failure => {
                account.consecutive_failures += 1;
            }
            // A cancelled invocation says nothing about account health.
            ExecOutcome::Cancelled => {}
        }
    }

    /// How many accounts are currently selectable for `profile`.
    pub async fn available(&self, profile: &str) -> usize {
        let now = Instant::now();
        let pools = self.pools.lock().await;
        pools
            .get(profile)
            .map(|p| {
                p.accounts
                    .iter()
                    .filter(|a| a.available(self.limits.failure_threshold, now))
                    .count()
            })
            .unwrap_or(0)
    }
}
