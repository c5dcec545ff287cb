//! The outer batch loop.
//!
//! For each task the driver polls the run mode, routes the task (or reuses the
//! routing already recorded on it), dispatches to the iteration loop or the
//! team lead, and writes the terminal state back to the queue. Finished tasks
//! have their checkpoints archived.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::{AuditLogger, RunConfig, TaskAudit, TaskAuditOutcome};
use crate::checkpoint::CheckpointStore;
use crate::errors::{DriverError, LoopError};
use crate::iteration::IterationLoop;
use crate::policy::Policy;
use crate::queue::{StatusUpdate, TaskQueue};
use crate::router::{RoutingAnalysis, RoutingDecision, TaskRouter};
use crate::run_mode::{RunMode, RunModeSource};
use crate::task::{BlockKind, BlockReason, SpecialistRecord, Task, TaskStatus};
use crate::team::TeamLead;
use crate::ui::BatchUI;

/// Budget used when neither the task nor the policy sets one.
pub const DEFAULT_BUDGET: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    pub project_dir: PathBuf,
    pub queue_file: PathBuf,
    /// Maximum number of tasks to process; `None` drains the queue.
    pub limit: Option<usize>,
    /// Caps every task's (and role's) iteration budget.
    pub max_iterations: Option<u32>,
    /// Route and report only.
    pub dry_run: bool,
    /// Commit checked out when the batch started, recorded in the run audit.
    pub base_commit: Option<String>,
}

/// Why the batch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QueueDrained,
    LimitReached,
    /// The run mode became non-runnable mid-batch.
    RunMode(RunMode),
}

/// What happened to one task during the batch.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub analysis: RoutingAnalysis,
    pub budget: u32,
    pub outcome: TaskAuditOutcome,
    pub iterations_used: u32,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub reports: Vec<TaskReport>,
    pub stopped: StopReason,
    pub audit_file: Option<PathBuf>,
}

impl BatchSummary {
    fn count(&self, pred: impl Fn(&TaskAuditOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, TaskAuditOutcome::Completed { .. }))
    }

    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, TaskAuditOutcome::Blocked { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, TaskAuditOutcome::Deferred))
    }

    pub fn errored(&self) -> usize {
        self.count(|o| matches!(o, TaskAuditOutcome::Error { .. }))
    }

    /// Mode that stopped the batch early, if any.
    pub fn stopped_by(&self) -> Option<RunMode> {
        match self.stopped {
            StopReason::RunMode(mode) => Some(mode),
            _ => None,
        }
    }
}

/// Terminal (or interrupted) result of dispatching one task.
struct Dispatched {
    status: TaskStatus,
    iterations_used: u32,
    verdict_ref: Option<String>,
    block_reason: Option<BlockReason>,
    specialists: Option<Vec<SpecialistRecord>>,
    cost_usd: f64,
    changed_paths: Vec<String>,
    interrupted: Option<RunMode>,
}

pub struct Driver {
    queue: Arc<dyn TaskQueue>,
    router: TaskRouter,
    looper: Arc<IterationLoop>,
    team: TeamLead,
    policy: Arc<Policy>,
    audit: AuditLogger,
    ui: Option<Arc<BatchUI>>,
}

impl Driver {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        router: TaskRouter,
        looper: Arc<IterationLoop>,
        team: TeamLead,
        policy: Arc<Policy>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            queue,
            router,
            looper,
            team,
            policy,
            audit,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<BatchUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn run_mode(&self) -> &Arc<dyn RunModeSource> {
        self.looper.run_mode()
    }

    fn store(&self) -> &Arc<dyn CheckpointStore> {
        self.looper.store()
    }

    /// Process up to `options.limit` tasks.
    ///
    /// Refuses to start when the run mode is `off`, or when it is `paused`
    /// and this is not a dry run. A mode change mid-batch ends the batch
    /// with [`StopReason::RunMode`]; the interrupted task stays `in_progress`.
    pub async fn run_batch(&mut self, options: &DriverOptions) -> Result<BatchSummary, DriverError> {
        let mode = self.run_mode().current();
        if !mode.allows_batch_start() || (!options.dry_run && !mode.allows_single_agent()) {
            tracing::warn!(mode = %mode, "run mode forbids starting a batch");
            return Err(DriverError::KillSwitch {
                mode: mode.to_string(),
            });
        }

        self.audit.start_run(RunConfig {
            project_dir: options.project_dir.clone(),
            queue_file: options.queue_file.clone(),
            limit: options.limit,
            max_iterations: options.max_iterations,
            dry_run: options.dry_run,
            policy_version: self.policy.version_id().to_string(),
            run_mode: mode.to_string(),
            base_commit: options.base_commit.clone(),
        })?;
        tracing::info!(
            policy = %self.policy.version_id(),
            mode = %mode,
            dry_run = options.dry_run,
            "batch started"
        );

        let mut reports: Vec<TaskReport> = Vec::new();
        let mut skip: Vec<String> = Vec::new();
        let mut processed = 0usize;

        let stopped = loop {
            if options.limit.is_some_and(|limit| processed >= limit) {
                break StopReason::LimitReached;
            }

            let mode = self.run_mode().current();
            let runnable = if options.dry_run {
                mode.allows_batch_start()
            } else {
                mode.allows_single_agent()
            };
            if !runnable {
                tracing::info!(mode = %mode, "run mode changed; stopping batch");
                break StopReason::RunMode(mode);
            }

            let task = match self
                .queue
                .next_pending(&skip)
                .map_err(DriverError::QueueLoad)?
            {
                Some(task) => task,
                None => break StopReason::QueueDrained,
            };
            skip.push(task.id.clone());

            let default_budget = self.policy.default_budget().unwrap_or(DEFAULT_BUDGET);
            let budget = task.effective_budget(default_budget, options.max_iterations);
            let analysis = match task.routing.clone() {
                Some(existing) => existing,
                None => self.router.analyze(&task, budget),
            };

            if options.dry_run {
                if let Some(ui) = &self.ui {
                    ui.dry_run_line(&task, &analysis, budget);
                }
                let mut audit = TaskAudit::new(&task.id, &task.description);
                audit.decision = Some(analysis.decision);
                audit.finish(TaskAuditOutcome::DryRun);
                self.audit.add_task(audit)?;
                reports.push(TaskReport {
                    task_id: task.id.clone(),
                    analysis,
                    budget,
                    outcome: TaskAuditOutcome::DryRun,
                    iterations_used: task.iterations_used,
                    cost_usd: 0.0,
                });
                processed += 1;
                continue;
            }

            if analysis.decision == RoutingDecision::MultiAgent && !mode.allows_multi_agent() {
                tracing::info!(task = %task.id, mode = %mode, "multi-agent task deferred");
                if let Some(ui) = &self.ui {
                    ui.task_deferred(&task.id, &format!("multi-agent work is off in {} mode", mode));
                }
                let mut audit = TaskAudit::new(&task.id, &task.description);
                audit.decision = Some(analysis.decision);
                audit.finish(TaskAuditOutcome::Deferred);
                self.audit.add_task(audit)?;
                reports.push(TaskReport {
                    task_id: task.id.clone(),
                    analysis,
                    budget,
                    outcome: TaskAuditOutcome::Deferred,
                    iterations_used: task.iterations_used,
                    cost_usd: 0.0,
                });
                continue;
            }

            processed += 1;
            let report = self.process(&task, analysis, budget).await?;
            let interrupted = match report.outcome {
                TaskAuditOutcome::Interrupted => Some(self.run_mode().current()),
                _ => None,
            };
            reports.push(report);
            if let Some(mode) = interrupted {
                break StopReason::RunMode(mode);
            }
        };

        let audit_file = self.audit.finish_run()?;
        let summary = BatchSummary {
            reports,
            stopped,
            audit_file: Some(audit_file),
        };
        tracing::info!(
            completed = summary.completed(),
            blocked = summary.blocked(),
            deferred = summary.deferred(),
            stopped = ?summary.stopped,
            "batch finished"
        );
        if let Some(ui) = &self.ui {
            ui.finish(
                summary.completed(),
                summary.blocked(),
                summary.deferred(),
                summary.stopped_by().is_some(),
            );
        }
        Ok(summary)
    }

    /// Mark a task in progress, dispatch it, and write back its final state.
    async fn process(
        &mut self,
        task: &Task,
        analysis: RoutingAnalysis,
        budget: u32,
    ) -> Result<TaskReport, DriverError> {
        let task = self
            .queue
            .mark_status(
                &task.id,
                StatusUpdate::to(TaskStatus::InProgress).with_routing(analysis.clone()),
            )
            .map_err(|e| DriverError::Other(e.into()))?;

        let mut audit = TaskAudit::new(&task.id, &task.description);
        audit.decision = Some(analysis.decision);
        self.audit.add_task(audit)?;
        if let Some(ui) = &self.ui {
            ui.start_task(&task, &analysis);
        }
        tracing::info!(
            task = %task.id,
            decision = %analysis.decision,
            rule = %analysis.matched_rule,
            budget,
            "dispatching task"
        );

        let dispatched = match analysis.decision {
            RoutingDecision::Blocked => Ok(Dispatched {
                status: TaskStatus::Blocked,
                iterations_used: task.iterations_used,
                verdict_ref: None,
                block_reason: Some(BlockReason::new(
                    BlockKind::Routing,
                    format!("routed to blocked: {}", analysis.rationale),
                )),
                specialists: None,
                cost_usd: 0.0,
                changed_paths: Vec::new(),
                interrupted: None,
            }),
            RoutingDecision::SingleAgent => self.run_single(&task, budget).await,
            RoutingDecision::MultiAgent => self.run_team(&task, &analysis.roles, budget).await,
        };

        let dispatched = match dispatched {
            Ok(d) => d,
            Err(e) => {
                // The attempt is abandoned; the task stays in_progress for the next batch.
                tracing::error!(task = %task.id, error = %e, "task attempt failed");
                if let Some(ui) = &self.ui {
                    ui.task_failed(&task.id, &e.to_string());
                }
                let outcome = TaskAuditOutcome::Error {
                    message: e.to_string(),
                };
                let recorded = outcome.clone();
                self.audit.update_last_task(|t| t.finish(recorded))?;
                return Ok(TaskReport {
                    task_id: task.id.clone(),
                    analysis,
                    budget,
                    outcome,
                    iterations_used: task.iterations_used,
                    cost_usd: 0.0,
                });
            }
        };

        let mut update =
            StatusUpdate::to(dispatched.status).with_iterations(dispatched.iterations_used);
        if let Some(specialists) = dispatched.specialists.clone() {
            update = update.with_specialists(specialists);
        }
        update = update.with_verdict_ref(dispatched.verdict_ref.clone());
        if let Some(reason) = dispatched.block_reason.clone() {
            update = update.with_block_reason(reason);
        }
        self.queue
            .mark_status(&task.id, update)
            .map_err(|e| DriverError::Other(e.into()))?;

        let outcome = match (dispatched.status, &dispatched.block_reason) {
            (TaskStatus::Completed, _) => TaskAuditOutcome::Completed {
                iteration: dispatched.iterations_used,
            },
            (TaskStatus::Blocked, Some(reason)) => TaskAuditOutcome::Blocked {
                reason: reason.clone(),
            },
            (TaskStatus::Blocked, None) => TaskAuditOutcome::Blocked {
                reason: BlockReason::new(BlockKind::Infrastructure, "blocked without a reason"),
            },
            _ => TaskAuditOutcome::Interrupted,
        };

        if dispatched.status.is_terminal() {
            match self.store().archive(&task.id) {
                Ok(Some(path)) => {
                    tracing::debug!(task = %task.id, archive = %path.display(), "checkpoints archived")
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(task = %task.id, error = %e, "failed to archive checkpoints"),
            }
        }

        if let Some(ui) = &self.ui {
            match &outcome {
                TaskAuditOutcome::Completed { iteration } => ui.task_completed(&task.id, *iteration),
                TaskAuditOutcome::Blocked { reason } => ui.task_blocked(&task.id, reason),
                _ => ui.interrupted(
                    &task.id,
                    dispatched
                        .interrupted
                        .unwrap_or_else(|| self.run_mode().current()),
                ),
            }
        }

        let recorded = outcome.clone();
        let iterations_used = dispatched.iterations_used;
        let cost_usd = dispatched.cost_usd;
        let verdict_ref = dispatched.verdict_ref.clone();
        let changed_paths = dispatched.changed_paths.clone();
        self.audit.update_last_task(move |t| {
            t.iterations_used = iterations_used;
            t.cost_usd = cost_usd;
            t.verdict_ref = verdict_ref;
            t.changed_paths = changed_paths;
            t.finish(recorded);
        })?;

        Ok(TaskReport {
            task_id: task.id.clone(),
            analysis,
            budget,
            outcome,
            iterations_used: dispatched.iterations_used,
            cost_usd: dispatched.cost_usd,
        })
    }

    async fn run_single(&self, task: &Task, budget: u32) -> Result<Dispatched, LoopError> {
        let outcome = self.looper.run(task, None, budget).await?;
        Ok(Dispatched {
            status: outcome.status,
            iterations_used: outcome.iterations_used,
            verdict_ref: outcome
                .audit_ref()
                .or_else(|| outcome.block_reason.as_ref().and_then(|r| r.audit_ref.clone())),
            block_reason: outcome.block_reason.clone(),
            specialists: None,
            cost_usd: outcome.usage.cost_usd,
            changed_paths: outcome
                .changed_artifacts
                .iter()
                .map(|a| a.path.clone())
                .collect(),
            interrupted: outcome.interrupted,
        })
    }

    async fn run_team(
        &self,
        task: &Task,
        roles: &[String],
        budget: u32,
    ) -> Result<Dispatched, LoopError> {
        let outcome = self.team.run(task, roles, budget).await?;
        Ok(Dispatched {
            status: outcome.status,
            iterations_used: outcome.iterations_used,
            verdict_ref: outcome.verdict_ref(),
            block_reason: outcome.block_reason.clone(),
            specialists: Some(outcome.specialists.clone()),
            cost_usd: outcome.total_cost_usd(),
            changed_paths: Vec::new(),
            interrupted: outcome.interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{FsCheckpointStore, Namespace};
    use crate::queue::JsonFileQueue;
    use crate::router::RouterConfig;
    use crate::run_mode::ManualRunMode;
    use crate::test_support::{ScriptedAgent, ScriptedRunner, TEST_POLICY, engine};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        queue: Arc<JsonFileQueue>,
        store: Arc<FsCheckpointStore>,
        mode: Arc<ManualRunMode>,
        driver: Driver,
    }

    impl Harness {
        fn warden(&self) -> PathBuf {
            self.dir.path().join(".warden")
        }

        fn options(&self) -> DriverOptions {
            DriverOptions {
                project_dir: self.dir.path().to_path_buf(),
                queue_file: self.queue.path().to_path_buf(),
                ..Default::default()
            }
        }

        fn status(&self, id: &str) -> TaskStatus {
            JsonFileQueue::load(self.queue.path())
                .unwrap()
                .get(id)
                .unwrap()
                .status
        }
    }

    fn harness(queue_json: &str, agent: ScriptedAgent, runner: ScriptedRunner) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let warden = dir.path().join(".warden");
        std::fs::create_dir_all(&warden).unwrap();
        let queue_path = warden.join("queue.json");
        std::fs::write(&queue_path, queue_json).unwrap();
        let queue = Arc::new(JsonFileQueue::load(&queue_path).unwrap());

        let store = Arc::new(FsCheckpointStore::new(
            warden.join("checkpoints"),
            warden.join("archive"),
        ));
        let mode = Arc::new(ManualRunMode::new(RunMode::Normal));
        let policy = Arc::new(Policy::parse(TEST_POLICY).unwrap());
        let looper = Arc::new(IterationLoop::new(
            Arc::new(agent),
            engine(&warden, runner),
            store.clone(),
            mode.clone(),
        ));
        let team = TeamLead::new(looper.clone(), policy.clone(), Duration::from_secs(30));
        let driver = Driver::new(
            queue.clone(),
            TaskRouter::new(RouterConfig::default()),
            looper,
            team,
            policy,
            AuditLogger::new(&warden.join("audit")),
        );
        Harness {
            dir,
            queue,
            store,
            mode,
            driver,
        }
    }

    fn archived(warden: &Path) -> Vec<String> {
        std::fs::read_dir(warden.join("archive"))
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_single_agent_task_completes_and_archives() {
        let mut h = harness(
            r#"{"tasks": [{"id": "t-1", "description": "fix bug", "iteration_budget": 3}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::new(vec![false, true]),
        );
        let options = h.options();
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.completed(), 1);
        assert_eq!(summary.stopped, StopReason::QueueDrained);
        let task = h.queue.get("t-1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.iterations_used, 2);
        assert!(task.verdict_ref.is_some());
        assert_eq!(task.routing.unwrap().decision, RoutingDecision::SingleAgent);

        assert!(h.store.latest(&Namespace::task("t-1")).unwrap().is_none());
        assert_eq!(archived(&h.warden()).len(), 1);
        let audit_file = summary.audit_file.unwrap();
        assert!(audit_file.exists());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_writes_block_reason() {
        let mut h = harness(
            r#"{"tasks": [{"id": "t-2", "description": "hard", "iteration_budget": 2}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::new(vec![false, false]),
        );
        let options = h.options();
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.blocked(), 1);
        let task = h.queue.get("t-2").unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.iterations_used, 2);
        let reason = task.block_reason.unwrap();
        assert_eq!(reason.kind, BlockKind::BudgetExhausted);
        assert!(reason.audit_ref.is_some());
        assert_eq!(task.verdict_ref, reason.audit_ref);
    }

    #[tokio::test]
    async fn test_multi_agent_task_stays_within_budget() {
        let mut h = harness(
            r#"{"tasks": [{"id": "t-10", "description": "fix", "type": "fix", "value_estimate": 120.0, "iteration_budget": 2}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::new(vec![false, false]),
        );
        let options = h.options();
        h.driver.run_batch(&options).await.unwrap();

        let task = h.queue.get("t-10").unwrap();
        assert_eq!(task.routing.unwrap().decision, RoutingDecision::MultiAgent);
        assert_eq!(task.specialists.len(), 2);
        assert!(task.iterations_used <= 2);
        assert!(task.specialists.iter().all(|r| r.budget <= 2 && r.iterations_used <= 2));
        let longest = task.specialists.iter().map(|r| r.iterations_used).max().unwrap();
        assert_eq!(task.iterations_used, longest);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_queue_untouched() {
        let mut h = harness(
            r#"{"tasks": [
                {"id": "a", "description": "x", "type": "fix", "value_estimate": 120.0},
                {"id": "b", "description": "y"}
            ]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        let mut options = h.options();
        options.dry_run = true;
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.reports.len(), 2);
        assert_eq!(summary.reports[0].analysis.roles, vec!["fixer", "test-writer"]);
        assert!(summary.reports[1].analysis.low_confidence);
        assert_eq!(h.status("a"), TaskStatus::Pending);
        assert_eq!(h.status("b"), TaskStatus::Pending);
        assert!(h.queue.get("a").unwrap().routing.is_none());
    }

    #[tokio::test]
    async fn test_off_refuses_to_start() {
        let mut h = harness(
            r#"{"tasks": [{"id": "a", "description": "x"}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        h.mode.set(RunMode::Off);
        let mut options = h.options();
        let err = h.driver.run_batch(&options).await.unwrap_err();
        assert!(matches!(err, DriverError::KillSwitch { .. }));

        options.dry_run = true;
        let err = h.driver.run_batch(&options).await.unwrap_err();
        assert!(matches!(err, DriverError::KillSwitch { .. }));
        assert_eq!(h.status("a"), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_paused_allows_dry_run_only() {
        let mut h = harness(
            r#"{"tasks": [{"id": "a", "description": "x"}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        h.mode.set(RunMode::Paused);
        let mut options = h.options();
        assert!(h.driver.run_batch(&options).await.is_err());

        options.dry_run = true;
        let summary = h.driver.run_batch(&options).await.unwrap();
        assert_eq!(summary.reports.len(), 1);
    }

    #[tokio::test]
    async fn test_safe_mode_defers_multi_agent() {
        let mut h = harness(
            r#"{"tasks": [
                {"id": "team", "description": "big", "priority": 9, "complexity": "critical"},
                {"id": "solo", "description": "small", "priority": 1}
            ]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        h.mode.set(RunMode::Safe);
        let options = h.options();
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.deferred(), 1);
        assert_eq!(summary.completed(), 1);
        assert_eq!(h.status("team"), TaskStatus::Pending);
        assert_eq!(h.status("solo"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_multi_agent_task_records_specialists() {
        let mut h = harness(
            r#"{"tasks": [{"id": "t-9", "description": "fix", "type": "fix", "value_estimate": 120.0}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        let options = h.options();
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.completed(), 1);
        let task = h.queue.get("t-9").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let roles: Vec<_> = task.specialists.iter().map(|s| s.role.as_str()).collect();
        assert_eq!(roles, vec!["fixer", "test-writer"]);
        assert!(task.specialists.iter().all(|s| s.passed()));
    }

    #[tokio::test]
    async fn test_blocked_override_blocks_without_running() {
        let mut h = harness(
            r#"{"tasks": [{"id": "a", "description": "x", "routing_override": "blocked"}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        let options = h.options();
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.blocked(), 1);
        let task = h.queue.get("a").unwrap();
        assert_eq!(task.block_reason.unwrap().kind, BlockKind::Routing);
        assert_eq!(task.iterations_used, 0);
    }

    #[tokio::test]
    async fn test_limit_stops_batch() {
        let mut h = harness(
            r#"{"tasks": [
                {"id": "a", "description": "x"},
                {"id": "b", "description": "y"},
                {"id": "c", "description": "z"}
            ]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::default(),
        );
        let mut options = h.options();
        options.limit = Some(2);
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.stopped, StopReason::LimitReached);
        assert_eq!(summary.completed(), 2);
        assert_eq!(h.status("c"), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_max_iterations_caps_budget() {
        let mut h = harness(
            r#"{"tasks": [{"id": "a", "description": "x", "iteration_budget": 10}]}"#,
            ScriptedAgent::default(),
            ScriptedRunner::new(vec![false; 10]),
        );
        let mut options = h.options();
        options.max_iterations = Some(1);
        let summary = h.driver.run_batch(&options).await.unwrap();

        assert_eq!(summary.reports[0].budget, 1);
        assert_eq!(h.queue.get("a").unwrap().iterations_used, 1);
    }
}
