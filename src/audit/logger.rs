use super::{AuditRun, RunConfig, TaskAudit};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CURRENT_RUN: &str = "current-run.json";

/// Persists the audit record of one driver run.
///
/// The in-progress run is mirrored to `current-run.json` after every change.
/// A mirror left behind by a killed driver is moved into `runs/` with an
/// `-interrupted` suffix when the next run starts, so no trail is lost.
pub struct AuditLogger {
    audit_dir: PathBuf,
    run: Option<AuditRun>,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        Self {
            audit_dir: audit_dir.to_path_buf(),
            run: None,
        }
    }

    fn mirror_path(&self) -> PathBuf {
        self.audit_dir.join(CURRENT_RUN)
    }

    fn runs_dir(&self) -> PathBuf {
        self.audit_dir.join("runs")
    }

    fn run_file_name(run: &AuditRun, suffix: &str) -> String {
        let id = run.run_id.simple().to_string();
        format!(
            "{}_{}{}.json",
            run.started_at.format("%Y%m%dT%H%M%S"),
            &id[..8],
            suffix
        )
    }

    pub fn start_run(&mut self, config: RunConfig) -> Result<()> {
        fs::create_dir_all(&self.audit_dir).with_context(|| {
            format!("Failed to create audit directory {}", self.audit_dir.display())
        })?;
        if let Some(path) = self.recover_interrupted()? {
            tracing::warn!(run = %path.display(), "previous run ended without finishing; audit recovered");
        }
        self.run = Some(AuditRun::new(config));
        self.mirror()
    }

    /// Move an orphaned `current-run.json` into `runs/`. Returns its new path.
    pub fn recover_interrupted(&self) -> Result<Option<PathBuf>> {
        let mirror = self.mirror_path();
        if !mirror.exists() {
            return Ok(None);
        }

        let runs_dir = self.runs_dir();
        fs::create_dir_all(&runs_dir).context("Failed to create runs directory")?;
        let name = match self.load_run(&mirror) {
            Ok(run) => Self::run_file_name(&run, "-interrupted"),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "unreadable current-run.json kept as-is");
                format!("{}_unreadable-interrupted.json", chrono::Utc::now().format("%Y%m%dT%H%M%S"))
            }
        };
        let dest = runs_dir.join(name);
        fs::rename(&mirror, &dest)
            .with_context(|| format!("Failed to move {} to {}", mirror.display(), dest.display()))?;
        Ok(Some(dest))
    }

    /// Append a task record. Errors when no run is active.
    pub fn add_task(&mut self, task: TaskAudit) -> Result<()> {
        self.run
            .as_mut()
            .context("add_task called with no active run")?
            .tasks
            .push(task);
        self.mirror()
    }

    /// Mutate the most recent task record. Errors when no run or no task exists.
    pub fn update_last_task<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut TaskAudit),
    {
        let task = self
            .run
            .as_mut()
            .context("update_last_task called with no active run")?
            .tasks
            .last_mut()
            .context("update_last_task called with no tasks in run")?;
        f(task);
        self.mirror()
    }

    /// Seal the active run into `runs/` and drop the mirror.
    pub fn finish_run(&mut self) -> Result<PathBuf> {
        let mut run = self.run.take().context("No current run to finish")?;
        run.finish();

        let runs_dir = self.runs_dir();
        fs::create_dir_all(&runs_dir).context("Failed to create runs directory")?;
        let run_file = runs_dir.join(Self::run_file_name(&run, ""));
        let json = serde_json::to_string_pretty(&run).context("Failed to serialize audit run")?;
        fs::write(&run_file, json)
            .with_context(|| format!("Failed to write {}", run_file.display()))?;

        let mirror = self.mirror_path();
        if mirror.exists() {
            fs::remove_file(&mirror)
                .with_context(|| format!("Failed to remove {}", mirror.display()))?;
        }
        Ok(run_file)
    }

    fn mirror(&self) -> Result<()> {
        let Some(ref run) = self.run else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(run).context("Failed to serialize current run")?;
        fs::write(self.mirror_path(), json).context("Failed to write current-run.json")
    }

    /// Finished (and recovered) runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)
            .with_context(|| format!("Failed to list {}", runs_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        runs.sort_by(|a, b| b.cmp(a));
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
