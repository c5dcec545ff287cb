//! Queue and checkpoint inspection, `warden status`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use warden::audit::{AuditLogger, TaskAuditOutcome};
use warden::checkpoint::{Checkpoint, CheckpointStore, FsCheckpointStore, Namespace};
use warden::config::Config;
use warden::queue::JsonFileQueue;
use warden::task::{Task, TaskStatus};

pub fn cmd_status(project_dir: &Path, task_id: Option<&str>) -> Result<()> {
    if !warden::init::is_initialized(project_dir) {
        println!();
        println!("Nothing to show. Run 'warden init' first to initialize the project.");
        println!();
        return Ok(());
    }

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let queue = JsonFileQueue::load(&config.queue_file)
        .with_context(|| format!("Failed to load {}", config.queue_file.display()))?;
    let store = FsCheckpointStore::new(config.checkpoints_dir.clone(), config.archive_dir.clone());

    match task_id {
        None => print_queue(&config, &queue, &store),
        Some(id) => {
            let task = queue
                .get(id)
                .with_context(|| format!("Task '{}' is not in the queue", id))?;
            print_task(&config, &task, &store)
        }
    }
}

fn status_style(status: TaskStatus) -> console::StyledObject<String> {
    let s = status.to_string();
    match status {
        TaskStatus::Completed => style(s).green(),
        TaskStatus::Blocked => style(s).red(),
        TaskStatus::InProgress => style(s).yellow(),
        TaskStatus::Pending => style(s).dim(),
    }
}

fn print_queue(config: &Config, queue: &JsonFileQueue, store: &FsCheckpointStore) -> Result<()> {
    let tasks = queue.tasks();

    println!();
    println!("Queue: {}", config.queue_file.display());
    println!();
    println!(
        "{:<16} {:<12} {:<8} {:<8} {:<13} Description",
        "Task", "Status", "Priority", "Iters", "Routing"
    );
    println!(
        "{:<16} {:<12} {:<8} {:<8} {:<13} -----------",
        "----------------", "------------", "--------", "--------", "-------------"
    );
    for task in &tasks {
        let routing = task
            .routing
            .as_ref()
            .map(|r| r.decision.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<12} {:<8} {:<8} {:<13} {}",
            task.id,
            status_style(task.status),
            task.priority,
            task.iterations_used,
            routing,
            task.description
        );
    }
    println!();

    let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
    println!(
        "{} pending, {} in progress, {} completed, {} blocked",
        count(TaskStatus::Pending),
        count(TaskStatus::InProgress),
        count(TaskStatus::Completed),
        count(TaskStatus::Blocked)
    );

    let active = store.active_tasks()?;
    if !active.is_empty() {
        println!("Resumable checkpoints: {}", active.join(", "));
    }
    let audit = AuditLogger::new(&config.audit_dir);
    let runs = audit.list_runs()?;
    if let Some(latest) = runs.first() {
        println!("{} recorded run(s); latest {}", runs.len(), latest.display());
        match audit.load_run(latest) {
            Ok(run) => {
                let finished = |pred: fn(&TaskAuditOutcome) -> bool| {
                    run.tasks.iter().filter(|t| pred(&t.outcome)).count()
                };
                println!(
                    "  started {}{}: {} task(s), {} completed, {} blocked",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    if run.ended_at.is_none() { " (interrupted)" } else { "" },
                    run.tasks.len(),
                    finished(|o| matches!(o, TaskAuditOutcome::Completed { .. })),
                    finished(|o| matches!(o, TaskAuditOutcome::Blocked { .. })),
                );
            }
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "cannot read latest run"),
        }
    }
    println!();
    Ok(())
}

fn print_history(label: &str, history: &[Checkpoint]) {
    if history.is_empty() {
        return;
    }
    println!("  {}", style(label).bold());
    for cp in history {
        let verdict = cp
            .last_verdict
            .as_ref()
            .map(|v| v.kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    #{:<4} iter {:<3} {:<17} {:<12} {:<8} {}",
            cp.number,
            cp.iteration,
            cp.phase.to_string(),
            cp.status.to_string(),
            verdict,
            cp.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_task(config: &Config, task: &Task, store: &FsCheckpointStore) -> Result<()> {
    println!();
    println!("{} {}", style(&task.id).bold(), task.description);
    println!("  status:     {}", status_style(task.status));
    println!("  iterations: {}", task.iterations_used);
    if let Some(ref routing) = task.routing {
        println!(
            "  routing:    {} ({}, confidence {:.1}{})",
            routing.decision,
            routing.matched_rule,
            routing.confidence,
            if routing.low_confidence { ", low" } else { "" }
        );
        println!("              {}", style(&routing.rationale).dim());
    }
    for record in &task.specialists {
        let advisory = if record.advisory { " [advisory]" } else { "" };
        println!(
            "  role {:<16} {} {}/{}{}",
            record.role,
            status_style(record.status),
            record.iterations_used,
            record.budget,
            advisory
        );
    }
    if let Some(ref reason) = task.block_reason {
        println!("  blocked:    {}", style(reason.to_string()).red());
    }
    if let Some(ref verdict) = task.verdict_ref {
        println!("  verdict:    {}", verdict);
    }
    println!();

    let live = store.history(&Namespace::task(&task.id))?;
    let roles = store.roles(&task.id)?;
    if !live.is_empty() || !roles.is_empty() {
        println!("Checkpoints:");
        print_history("task", &live);
        for role in &roles {
            let history = store.history(&Namespace::role(&task.id, role))?;
            print_history(role, &history);
        }
        println!();
    }

    // Archived directories are named "<task>" or "<task>-<timestamp>".
    let archive = FsCheckpointStore::new(config.archive_dir.clone(), config.archive_dir.clone());
    let prefix = format!("{}-", task.id);
    for name in store.archived()? {
        if name != task.id && !name.starts_with(&prefix) {
            continue;
        }
        println!("Archived checkpoints ({}):", name);
        print_history("task", &archive.history(&Namespace::task(&name))?);
        for role in archive.roles(&name)? {
            print_history(&role, &archive.history(&Namespace::role(&name, &role))?);
        }
        println!();
    }

    Ok(())
}
