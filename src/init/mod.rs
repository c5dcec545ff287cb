//! `warden init`: create the `.warden/` layout in a project.
//!
//! ```text
//! .warden/
//! ├── warden.toml      # engine configuration
//! ├── policy.toml      # verification policy
//! ├── queue.json       # task queue
//! ├── checkpoints/     # per-task, per-role checkpoints
//! ├── archive/         # checkpoints of finished tasks
//! ├── audit/           # run logs and verdict artifacts
//! │   └── runs/
//! └── logs/            # diagnostics and agent transcripts
//! ```
//!
//! Existing files are never overwritten.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::policy::DEFAULT_POLICY_TOML;
use crate::warden_config::WardenToml;

/// The name of the warden directory.
pub const WARDEN_DIR: &str = ".warden";

const EMPTY_QUEUE: &str = "{\n  \"tasks\": []\n}\n";

#[derive(Debug)]
pub struct InitResult {
    pub warden_dir: PathBuf,
    /// False if the directory already existed
    pub created: bool,
    /// Files written by this call
    pub written: Vec<PathBuf>,
}

pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let warden_dir = get_warden_dir(project_dir);
    let created = !warden_dir.exists();

    for sub in ["checkpoints", "archive", "audit/runs", "logs"] {
        let dir = warden_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let mut written = Vec::new();

    let config_file = warden_dir.join("warden.toml");
    if !config_file.exists() {
        WardenToml::default().save(&config_file)?;
        written.push(config_file);
    }

    for (name, content) in [("policy.toml", DEFAULT_POLICY_TOML), ("queue.json", EMPTY_QUEUE)] {
        let path = warden_dir.join(name);
        if !path.exists() {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            written.push(path);
        }
    }

    Ok(InitResult {
        warden_dir,
        created,
        written,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(WARDEN_DIR).exists()
}

pub fn get_warden_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(WARDEN_DIR)
}
