//! Engine configuration read from `.warden/warden.toml`.
//!
//! Layered: file, then environment (`WARDEN_AGENT_CMD`), then CLI flags
//! applied by the caller. The policy is a separate document
//! (`.warden/policy.toml`) and is not configured here.
//!
//! # Configuration File Format
//!
//! ```toml
//! [agent]
//! command = "claude"
//! args = ["--print", "--output-format", "stream-json", "--verbose"]
//! timeout_secs = 1800
//! grace_secs = 30
//!
//! [team]
//! role_timeout_secs = 7200
//! isolate_roles = true
//!
//! [checkpoints]
//! recent_window = 5
//!
//! [router]
//! value_threshold = 50.0
//! multi_agent_flags = ["cross_cutting"]
//! cost_per_iteration = 0.5
//!
//! [router.roles]
//! fix = ["fixer", "test-writer"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::router::RouterConfig;

/// Environment variable that overrides `[agent] command`.
pub const AGENT_CMD_ENV: &str = "WARDEN_AGENT_CMD";

/// Settings for the external coding agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Agent CLI command (default: "claude")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Per-invocation timeout
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// How long an in-flight agent may run after the run mode stops work
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    /// Run-mode poll interval while an agent is running
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_agent_args() -> Vec<String> {
    ["--print", "--output-format", "stream-json", "--verbose"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_agent_timeout() -> u64 {
    30 * 60
}

fn default_grace() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: default_agent_args(),
            timeout_secs: default_agent_timeout(),
            grace_secs: default_grace(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Upper bound on one role's whole loop
    #[serde(default = "default_role_timeout")]
    pub role_timeout_secs: u64,
    /// Give each role its own git worktree under `.warden/worktrees`
    #[serde(default = "default_isolate_roles")]
    pub isolate_roles: bool,
}

fn default_isolate_roles() -> bool {
    true
}

fn default_role_timeout() -> u64 {
    2 * 60 * 60
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            role_timeout_secs: default_role_timeout(),
            isolate_roles: default_isolate_roles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Cycle summaries kept inline in each checkpoint
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_recent_window() -> usize {
    5
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
        }
    }
}

/// The contents of `warden.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenToml {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub team: TeamSettings,
    #[serde(default)]
    pub checkpoints: CheckpointSettings,
    #[serde(default)]
    pub router: RouterConfig,
}

impl WardenToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid warden.toml")
    }

    /// Load `warden.toml` from the warden directory, or defaults if absent.
    pub fn load_or_default(warden_dir: &Path) -> Result<Self> {
        let config_path = warden_dir.join("warden.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize warden.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command (env → file → default).
    pub fn agent_command(&self) -> String {
        std::env::var(AGENT_CMD_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.agent.command.clone())
            .unwrap_or_else(|| "claude".to_string())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn agent_grace(&self) -> Duration {
        Duration::from_secs(self.agent.grace_secs)
    }

    pub fn role_timeout(&self) -> Duration {
        Duration::from_secs(self.team.role_timeout_secs)
    }

    /// Non-fatal problems worth reporting.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.agent.timeout_secs == 0 {
            warnings.push("agent.timeout_secs is 0: every invocation will time out".to_string());
        }
        if self.agent.poll_interval_ms == 0 {
            warnings.push("agent.poll_interval_ms must be greater than 0".to_string());
        }
        if self.team.role_timeout_secs < self.agent.timeout_secs {
            warnings.push(format!(
                "team.role_timeout_secs ({}) is shorter than one agent invocation ({})",
                self.team.role_timeout_secs, self.agent.timeout_secs
            ));
        }
        if self.checkpoints.recent_window == 0 {
            warnings.push("checkpoints.recent_window is 0: no cycle history is kept".to_string());
        }
        if self.router.cost_per_iteration < 0.0 {
            warnings.push("router.cost_per_iteration is negative".to_string());
        }
        for (task_type, roles) in &self.router.roles {
            if roles.is_empty() {
                warnings.push(format!("router.roles.{} lists no roles", task_type));
            }
        }
        if self.router.default_roles.is_empty() {
            warnings.push("router.default_roles is empty".to_string());
        }

        warnings
    }
}
