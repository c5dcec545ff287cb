use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::CommandAgentConfig;
use crate::init::get_warden_dir;
use crate::warden_config::WardenToml;

/// Runtime configuration for warden.
///
/// Resolves every path under `.warden/` and carries the parsed
/// `warden.toml` so commands don't reload it.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub warden_dir: PathBuf,
    pub queue_file: PathBuf,
    pub policy_file: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub log_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub kill_switch_file: PathBuf,
    pub lock_file: PathBuf,
    pub verbose: bool,
    toml: WardenToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let warden_dir = get_warden_dir(&project_dir);
        let toml = WardenToml::load_or_default(&warden_dir)?;

        Ok(Self {
            queue_file: warden_dir.join("queue.json"),
            policy_file: warden_dir.join("policy.toml"),
            checkpoints_dir: warden_dir.join("checkpoints"),
            archive_dir: warden_dir.join("archive"),
            audit_dir: warden_dir.join("audit"),
            log_dir: warden_dir.join("logs"),
            worktrees_dir: warden_dir.join("worktrees"),
            kill_switch_file: warden_dir.join("run_mode"),
            lock_file: warden_dir.join("driver.lock"),
            project_dir,
            warden_dir,
            verbose,
            toml,
        })
    }

    pub fn warden_toml(&self) -> &WardenToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.checkpoints_dir,
            &self.archive_dir,
            &self.audit_dir,
            &self.log_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        std::fs::create_dir_all(self.audit_dir.join("runs"))
            .context("Failed to create runs directory")?;
        Ok(())
    }

    /// Settings for the CLI agent adapter.
    pub fn agent_config(&self) -> CommandAgentConfig {
        let agent = &self.toml.agent;
        CommandAgentConfig {
            command: self.toml.agent_command(),
            args: agent.args.clone(),
            workdir: self.project_dir.clone(),
            log_dir: self.log_dir.join("agent"),
            timeout: self.toml.agent_timeout(),
            grace: self.toml.agent_grace(),
            poll_interval: Duration::from_millis(agent.poll_interval_ms.max(1)),
            worktrees: self
                .toml
                .team
                .isolate_roles
                .then(|| self.worktrees_dir.clone()),
        }
    }
}
