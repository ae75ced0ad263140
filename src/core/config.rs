//! Engine configuration: executor profiles, accounts, nightly settings and
//! operational limits.
//!
//! Everything is defaulted so an empty config file yields a working engine.
//! Cooldown and threshold values are tuning knobs, not invariants; they live
//! here rather than as constants in the modules that consume them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

/// Profile names that are always present, even with an empty config.
pub const BUILTIN_PROFILES: &[&str] = &[
    "planner",
    "research",
    "synthesis",
    "precision",
    "exploratory",
    "balanced",
];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    /// Named executor profiles, e.g. `[executors.research]`.
    #[serde(default)]
    pub executors: HashMap<String, ExecutorProfile>,

    #[serde(default)]
    pub night: NightConfig,

    #[serde(default)]
    pub prototype: PrototypeConfig,

    #[serde(default)]
    pub limits: Limits,
}

/// One external executor CLI the engine may spawn.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorProfile {
    #[serde(default = "default_command")]
    pub command: String,

    /// Base arguments always passed before the engine's own flags.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Quota-limited credential sets rotated by the account pool.
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountConfig>,
}

impl Default for ExecutorProfile {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            model: None,
            accounts: default_accounts(),
        }
    }
}

/// One credential set: an id plus environment overrides injected into the
/// child process (config dirs, key variables; the engine treats them as
/// opaque handles).
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NightConfig {
    /// Cron expression for daemon mode (tokio-cron-scheduler, 6 fields).
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Total wall-clock budget for one session's job execution.
    #[serde(default = "default_budget_minutes")]
    pub budget_minutes: u64,

    /// When false, even green jobs wait for explicit approval.
    #[serde(default = "default_true")]
    pub auto_execute_green: bool,

    #[serde(default = "default_max_research")]
    pub max_research_jobs: usize,

    #[serde(default = "default_max_ideas")]
    pub max_idea_jobs: usize,

    #[serde(default = "default_max_proposals")]
    pub max_change_proposals: usize,

    #[serde(default = "default_planner_profile")]
    pub planner_profile: String,

    #[serde(default = "default_research_profile")]
    pub research_profile: String,

    #[serde(default = "default_synthesis_profile")]
    pub synthesis_profile: String,

    /// Per-section cap applied to the context digest before concatenation.
    #[serde(default = "default_digest_section_chars")]
    pub digest_section_chars: usize,
}

impl Default for NightConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            budget_minutes: default_budget_minutes(),
            auto_execute_green: true,
            max_research_jobs: default_max_research(),
            max_idea_jobs: default_max_ideas(),
            max_change_proposals: default_max_proposals(),
            planner_profile: default_planner_profile(),
            research_profile: default_research_profile(),
            synthesis_profile: default_synthesis_profile(),
            digest_section_chars: default_digest_section_chars(),
        }
    }
}

/// The three fixed executor profiles behind prototype approaches. Outcome
/// diversity comes from executor diversity, so these are names, not prompts.
#[derive(Debug, Clone, Deserialize)]
pub struct PrototypeConfig {
    #[serde(default = "default_precision_profile")]
    pub precision_profile: String,

    #[serde(default = "default_exploratory_profile")]
    pub exploratory_profile: String,

    #[serde(default = "default_balanced_profile")]
    pub balanced_profile: String,
}

impl Default for PrototypeConfig {
    fn default() -> Self {
        Self {
            precision_profile: default_precision_profile(),
            exploratory_profile: default_exploratory_profile(),
            balanced_profile: default_balanced_profile(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,

    #[serde(default = "default_stdout_cap_bytes")]
    pub stdout_cap_bytes: usize,

    #[serde(default = "default_stderr_cap_bytes")]
    pub stderr_cap_bytes: usize,

    /// Grace window between SIGTERM and SIGKILL.
    #[serde(default = "default_term_grace_secs")]
    pub term_grace_secs: u64,

    /// Window after SIGKILL before the invocation is declared unkillable.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_quota_cooldown_secs")]
    pub quota_cooldown_secs: u64,

    #[serde(default = "default_auth_cooldown_secs")]
    pub auth_cooldown_secs: u64,

    /// Consecutive failures after which an account is skipped entirely.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Auth failures after which the short cooldown kicks in.
    #[serde(default = "default_auth_threshold")]
    pub auth_threshold: u32,

    /// Prompts larger than this are piped via stdin instead of argv.
    #[serde(default = "default_prompt_stdin_threshold")]
    pub prompt_stdin_threshold: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            exec_timeout_secs: default_exec_timeout_secs(),
            stdout_cap_bytes: default_stdout_cap_bytes(),
            stderr_cap_bytes: default_stderr_cap_bytes(),
            term_grace_secs: default_term_grace_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            quota_cooldown_secs: default_quota_cooldown_secs(),
            auth_cooldown_secs: default_auth_cooldown_secs(),
            failure_threshold: default_failure_threshold(),
            auth_threshold: default_auth_threshold(),
            prompt_stdin_threshold: default_prompt_stdin_threshold(),
        }
    }
}

fn default_command() -> String {
    "claude".to_string()
}
fn default_accounts() -> Vec<AccountConfig> {
    vec![AccountConfig {
        id: "default".to_string(),
        env: HashMap::new(),
    }]
}
fn default_cron() -> String {
    // 02:00 every night.
    "0 0 2 * * *".to_string()
}
fn default_budget_minutes() -> u64 {
    180
}
fn default_true() -> bool {
    true
}
fn default_max_research() -> usize {
    5
}
fn default_max_ideas() -> usize {
    3
}
fn default_max_proposals() -> usize {
    2
}
fn default_planner_profile() -> String {
    "planner".to_string()
}
fn default_research_profile() -> String {
    "research".to_string()
}
fn default_synthesis_profile() -> String {
    "synthesis".to_string()
}
fn default_digest_section_chars() -> usize {
    2000
}
fn default_precision_profile() -> String {
    "precision".to_string()
}
fn default_exploratory_profile() -> String {
    "exploratory".to_string()
}
fn default_balanced_profile() -> String {
    "balanced".to_string()
}
fn default_exec_timeout_secs() -> u64 {
    900
}
fn default_stdout_cap_bytes() -> usize {
    1024 * 1024
}
fn default_stderr_cap_bytes() -> usize {
    256 * 1024
}
fn default_term_grace_secs() -> u64 {
    5
}
fn default_kill_grace_secs() -> u64 {
    2
}
fn default_quota_cooldown_secs() -> u64 {
    3600
}
fn default_auth_cooldown_secs() -> u64 {
    300
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_auth_threshold() -> u32 {
    3
}
fn default_prompt_stdin_threshold() -> usize {
    32 * 1024
}

/// Root data directory: `NOCTURNE_HOME` or `~/.nocturne`.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("NOCTURNE_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nocturne")
}

/// Directory for session snapshots, proposals and the session lock.
pub fn state_dir() -> PathBuf {
    home_dir().join("state")
}

impl EngineConfig {
    /// Load config from `path`, or from the default location, falling back to
    /// built-in defaults when no file exists. Always validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home_dir().join("config.toml"));

        let mut config = if resolved.exists() {
            let raw = std::fs::read_to_string(&resolved)
                .with_context(|| format!("read config {}", resolved.display()))?;
            toml::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("parse config {}", resolved.display()))?
        } else {
            info!(path = %resolved.display(), "no config file, using defaults");
            EngineConfig::default()
        };

        config.seed_builtin_profiles();
        config.validate()?;
        Ok(config)
    }

    /// Ensure every built-in profile name resolves, so the nightly pipeline
    /// never has to special-case a missing profile.
    pub fn seed_builtin_profiles(&mut self) {
        for name in BUILTIN_PROFILES {
            self.executors
                .entry(name.to_string())
                .or_insert_with(ExecutorProfile::default);
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, profile) in &self.executors {
            if profile.command.trim().is_empty() {
                bail!("executor profile '{}' has an empty command", name);
            }
            let mut seen = HashSet::new();
            for account in &profile.accounts {
                if account.id.trim().is_empty() {
                    bail!("executor profile '{}' has an account with no id", name);
                }
                if !seen.insert(account.id.as_str()) {
                    bail!(
                        "executor profile '{}' has duplicate account id '{}'",
                        name,
                        account.id
                    );
                }
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&ExecutorProfile> {
        self.executors.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_working_defaults() {
        let mut config: EngineConfig = toml::from_str("").unwrap();
        config.seed_builtin_profiles();
        config.validate().unwrap();

        assert_eq!(config.night.budget_minutes, 180);
        assert!(config.night.auto_execute_green);
        assert_eq!(config.limits.failure_threshold, 5);
        for name in BUILTIN_PROFILES {
            let profile = config.profile(name).expect("builtin profile seeded");
            assert_eq!(profile.command, "claude");
            assert_eq!(profile.accounts.len(), 1);
        }
    }

    #[test]
    fn duplicate_account_ids_rejected() {
        let raw = r#"
            [executors.research]
            command = "claude"

            [[executors.research.accounts]]
            id = "personal"

            [[executors.research.accounts]]
            id = "personal"
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate account id"), "{err}");
    }

    #[test]
    fn empty_command_rejected() {
        let raw = r#"
            [executors.research]
            command = ""
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn profile_overrides_survive_seeding() {
        let raw = r#"
            [executors.research]
            command = "codex"
            model = "o4"
        "#;
        let mut config: EngineConfig = toml::from_str(raw).unwrap();
        config.seed_builtin_profiles();

        assert_eq!(config.profile("research").unwrap().command, "codex");
        assert_eq!(config.profile("planner").unwrap().command, "claude");
    }
}
