//! Batch execution, `warden run`.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::path::Path;
use std::sync::Arc;

use super::super::{Cli, RunArgs};

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    if !warden::init::is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'warden init' first.");
    }
    Ok(())
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, args: &RunArgs) -> Result<()> {
    use warden::agent::CommandAgent;
    use warden::audit::AuditLogger;
    use warden::checkpoint::FsCheckpointStore;
    use warden::config::Config;
    use warden::driver::{Driver, DriverOptions};
    use warden::errors::DriverError;
    use warden::iteration::IterationLoop;
    use warden::policy::Policy;
    use warden::queue::JsonFileQueue;
    use warden::router::TaskRouter;
    use warden::run_mode::{KillSwitch, RunModeSource};
    use warden::team::TeamLead;
    use warden::tracker::GitTracker;
    use warden::ui::BatchUI;
    use warden::verify::{ShellRunner, VerificationEngine};

    check_run_prerequisites(project_dir)?;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
    config.ensure_directories()?;

    // Held until the batch ends; released when the file handle drops.
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_file)
        .with_context(|| format!("Failed to open {}", config.lock_file.display()))?;
    if lock.try_lock_exclusive().is_err() {
        return Err(DriverError::Locked {
            path: config.lock_file.clone(),
        }
        .into());
    }

    let policy = Arc::new(
        Policy::load_or_default(&config.warden_dir).context("Failed to load policy")?,
    );
    for warning in policy.validate() {
        tracing::warn!(warning = %warning, "policy warning");
    }

    let queue_file = args.queue.clone().unwrap_or_else(|| config.queue_file.clone());
    let queue = Arc::new(JsonFileQueue::load(&queue_file).map_err(DriverError::QueueLoad)?);

    let kill_switch = args
        .kill_switch
        .clone()
        .unwrap_or_else(|| config.kill_switch_file.clone());
    let run_mode: Arc<dyn RunModeSource> = Arc::new(KillSwitch::new(Some(kill_switch)));

    let tracker = GitTracker::new(&config.project_dir).context(
        "warden tracks agent changes with git; run it inside a git repository",
    )?;
    let base_commit = tracker.head_sha();
    let agent = Arc::new(CommandAgent::new(
        config.agent_config(),
        Arc::new(tokio::sync::Mutex::new(tracker)),
        run_mode.clone(),
    ));

    let runner = Arc::new(ShellRunner::new(
        &config.project_dir,
        policy.verification().log_limit_bytes,
    ));
    let engine = Arc::new(VerificationEngine::new(
        policy.clone(),
        runner,
        config.warden_dir.clone(),
    ));
    let store = Arc::new(FsCheckpointStore::new(
        config.checkpoints_dir.clone(),
        config.archive_dir.clone(),
    ));

    let toml = config.warden_toml();
    let looper = Arc::new(
        IterationLoop::new(agent, engine, store, run_mode)
            .with_recent_window(toml.checkpoints.recent_window),
    );
    let team = TeamLead::new(looper.clone(), policy.clone(), toml.role_timeout())
        .with_max_iterations(args.max_iterations);

    let pending = queue
        .tasks()
        .iter()
        .filter(|t| !t.status.is_terminal())
        .count();
    let total = args.limit.map_or(pending, |limit| limit.min(pending));
    let ui = Arc::new(BatchUI::new(total as u64, cli.verbose));

    let mut driver = Driver::new(
        queue,
        TaskRouter::new(toml.router.clone()),
        looper,
        team,
        policy,
        AuditLogger::new(&config.audit_dir),
    )
    .with_ui(ui);

    let options = DriverOptions {
        project_dir: config.project_dir.clone(),
        queue_file,
        limit: args.limit,
        max_iterations: args.max_iterations,
        dry_run: args.dry_run,
        base_commit,
    };

    let summary = driver.run_batch(&options).await?;

    if cli.verbose
        && let Some(ref path) = summary.audit_file
    {
        println!("Audit log: {}", path.display());
    }
    if let Some(mode) = summary.stopped_by() {
        return Err(DriverError::KillSwitch {
            mode: mode.to_string(),
        }
        .into());
    }
    if summary.errored() > 0 {
        anyhow::bail!(
            "{} task(s) failed with an internal error; see the logs under {}",
            summary.errored(),
            config.log_dir.display()
        );
    }

    Ok(())
}
