//! Multi-agent execution: one iteration loop per specialist role.
//!
//! Roles are launched as separate tokio tasks, each behind its own timeout,
//! and joined once. A role that errors, panics or times out is recorded as
//! blocked; its siblings keep running. Each role works in a workspace opened
//! by the agent; once all roles are joined, passing roles are merged back and
//! the rest discarded. Synthesis applies the policy's aggregation rule and,
//! when enabled, an integration verification pass over the merged changes.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::ChangedArtifact;
use crate::checkpoint::{
    ArtifactRecord, Checkpoint, CheckpointPhase, CycleSummary, Namespace, ResourceUsage,
};
use crate::errors::LoopError;
use crate::iteration::{IterationLoop, LoopOutcome, block_reason_for};
use crate::policy::{Aggregation, Policy};
use crate::run_mode::RunMode;
use crate::task::{BlockKind, BlockReason, SpecialistRecord, Task, TaskStatus};
use crate::verify::{VerdictKind, VerdictSummary, VerificationRequest};

/// Result of a multi-agent task.
#[derive(Debug, Clone)]
pub struct TeamOutcome {
    /// `Completed`, `Blocked`, or `InProgress` when the run mode interrupted it.
    pub status: TaskStatus,
    pub specialists: Vec<SpecialistRecord>,
    pub block_reason: Option<BlockReason>,
    pub integration: Option<VerdictSummary>,
    /// Sum of every role's usage.
    pub usage: ResourceUsage,
    /// Cycles of the longest-running role. Roles run side by side, each
    /// within the task budget, so this never exceeds it.
    pub iterations_used: u32,
    pub interrupted: Option<RunMode>,
}

impl TeamOutcome {
    pub fn total_cost_usd(&self) -> f64 {
        self.usage.cost_usd
    }

    /// Audit reference of the verdict that decided the outcome.
    pub fn verdict_ref(&self) -> Option<String> {
        if let Some(ref integration) = self.integration {
            return integration.audit_ref.clone();
        }
        self.block_reason.as_ref().and_then(|r| r.audit_ref.clone())
    }

    /// One line per role, used as the structured block report.
    pub fn report(&self) -> String {
        role_report(&self.specialists)
    }
}

/// What a spawned role produced.
enum RoleResult {
    Finished(LoopOutcome),
    Failed(String),
}

pub struct TeamLead {
    looper: Arc<IterationLoop>,
    policy: Arc<Policy>,
    role_timeout: Duration,
    max_iterations: Option<u32>,
}

impl TeamLead {
    pub fn new(looper: Arc<IterationLoop>, policy: Arc<Policy>, role_timeout: Duration) -> Self {
        Self {
            looper,
            policy,
            role_timeout,
            max_iterations: None,
        }
    }

    pub fn with_max_iterations(mut self, max: Option<u32>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Budget for one role: its policy budget, else the task's. Never more
    /// than the task's.
    pub fn role_budget(&self, role: &str, task_budget: u32) -> u32 {
        let budget = self
            .policy
            .document()
            .budgets
            .roles
            .get(role)
            .copied()
            .unwrap_or(task_budget)
            .min(task_budget);
        match self.max_iterations {
            Some(max) => budget.min(max),
            None => budget,
        }
    }

    pub async fn run(
        &self,
        task: &Task,
        roles: &[String],
        task_budget: u32,
    ) -> Result<TeamOutcome, LoopError> {
        let store = self.looper.store().clone();
        let task_ns = Namespace::task(&task.id);
        let _lease = store.acquire(&task_ns)?;

        if let Some(cp) = store.latest(&task_ns)?
            && cp.is_terminal()
        {
            tracing::info!(task = %task.id, status = %cp.status, "synthesis already recorded");
            return Ok(TeamOutcome {
                status: cp.status,
                specialists: task.specialists.clone(),
                block_reason: cp.block_reason.clone(),
                integration: cp.last_verdict.clone(),
                usage: cp.usage.clone(),
                iterations_used: cp.iteration,
                interrupted: None,
            });
        }

        let mut records: Vec<SpecialistRecord> = roles
            .iter()
            .map(|role| {
                SpecialistRecord::new(
                    role,
                    self.role_budget(role, task_budget),
                    self.policy.is_advisory(role),
                )
            })
            .collect();

        let agent = Arc::clone(self.looper.agent());
        let mut handles = Vec::new();
        let mut launched = Vec::new();
        let mut interrupted = None;
        for (index, record) in records.iter_mut().enumerate() {
            let mode = self.looper.run_mode().current();
            if !mode.allows_multi_agent() {
                tracing::info!(task = %task.id, role = %record.role, %mode, "run mode prevents launching role");
                interrupted = Some(mode);
                break;
            }

            record.started_at = Some(Utc::now());
            if let Err(e) = agent.open_role(&task.id, &record.role).await {
                tracing::warn!(task = %task.id, role = %record.role, error = %e, "role workspace unavailable");
                record.status = TaskStatus::Blocked;
                record.ended_at = Some(Utc::now());
                record.reason = Some(BlockReason::new(
                    BlockKind::RoleFailure,
                    format!("could not prepare workspace: {}", e),
                ));
                continue;
            }
            record.status = TaskStatus::InProgress;

            let looper = Arc::clone(&self.looper);
            let task = task.clone();
            let role = record.role.clone();
            let budget = record.budget;
            let timeout = self.role_timeout;
            tracing::info!(task = %task.id, role = %role, budget, "launching role");

            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, looper.run(&task, Some(role.as_str()), budget)).await {
                    Ok(Ok(outcome)) => RoleResult::Finished(outcome),
                    Ok(Err(e)) => RoleResult::Failed(format!("role loop failed: {}", e)),
                    Err(_) => RoleResult::Failed(format!("role timed out after {}s", timeout.as_secs())),
                }
            });
            handles.push(handle);
            launched.push(index);
        }

        let results = join_all(handles).await;

        let mut usage = ResourceUsage::default();
        let mut outcomes: Vec<(usize, Vec<ChangedArtifact>)> = Vec::new();
        let mut iterations_used = 0;

        for (&index, joined) in launched.iter().zip(results) {
            let record = &mut records[index];
            record.ended_at = Some(Utc::now());
            let result = joined.unwrap_or_else(|e| RoleResult::Failed(format!("role panicked: {}", e)));
            match result {
                RoleResult::Finished(outcome) => {
                    record.status = outcome.status;
                    record.iterations_used = outcome.iterations_used;
                    record.verdict = outcome.verdict_kind();
                    record.cost_usd = outcome.usage.cost_usd;
                    record.reason = outcome.block_reason.clone();
                    usage.add(&outcome.usage);
                    iterations_used = iterations_used.max(outcome.iterations_used);
                    outcomes.push((index, outcome.changed_artifacts));
                    if let Some(mode) = outcome.interrupted {
                        interrupted.get_or_insert(mode);
                    }
                }
                RoleResult::Failed(message) => {
                    tracing::warn!(task = %task.id, role = %record.role, %message, "role failed");
                    // Cycles the role finished before it failed were checkpointed.
                    let message = match store.latest(&Namespace::role(&task.id, &record.role)) {
                        Ok(Some(cp)) => {
                            record.iterations_used = cp.iteration;
                            record.cost_usd = cp.usage.cost_usd;
                            usage.add(&cp.usage);
                            iterations_used = iterations_used.max(cp.iteration);
                            format!("{}; usage counted through cycle {}", message, cp.iteration)
                        }
                        Ok(None) => format!("{}; cost unknown", message),
                        Err(e) => {
                            tracing::warn!(task = %task.id, role = %record.role, error = %e, "cannot read role checkpoint");
                            format!("{}; cost unknown", message)
                        }
                    };
                    record.status = TaskStatus::Blocked;
                    record.reason = Some(BlockReason::new(BlockKind::RoleFailure, message));
                }
            }
        }

        if let Some(mode) = interrupted {
            // Roles that finished keep their terminal checkpoints; the rest resume later.
            return Ok(TeamOutcome {
                status: TaskStatus::InProgress,
                specialists: records,
                block_reason: None,
                integration: None,
                usage,
                iterations_used,
                interrupted: Some(mode),
            });
        }

        // Passing roles are merged into the shared tree; everything else is dropped.
        let mut artifacts: Vec<ChangedArtifact> = Vec::new();
        let mut merge_failures = Vec::new();
        for &index in &launched {
            let record = &records[index];
            let keep = record.passed();
            match agent.close_role(&task.id, &record.role, keep).await {
                Ok(()) if keep => {
                    if let Some((_, changed)) = outcomes.iter().find(|(i, _)| *i == index) {
                        merge_artifacts(&mut artifacts, changed);
                    }
                }
                Ok(()) => {}
                Err(e) if keep => {
                    tracing::warn!(task = %task.id, role = %record.role, error = %e, "role changes not merged");
                    merge_failures.push(format!("{}: {}", record.role, e));
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, role = %record.role, error = %e, "role workspace not cleaned up");
                }
            }
        }

        let team = self.policy.team();
        let gating: Vec<&SpecialistRecord> = records
            .iter()
            .filter(|r| team.aggregation == Aggregation::Conjunction || !r.advisory)
            .collect();
        let all_passed = gating.iter().all(|r| r.passed());

        let mut integration = None;
        let (status, block_reason) = if !all_passed {
            let any_passed = records.iter().any(|r| r.passed());
            let kind = if any_passed {
                BlockKind::PartialSuccess
            } else {
                BlockKind::RoleFailure
            };
            let audit_ref = gating
                .iter()
                .find(|r| !r.passed())
                .and_then(|r| r.reason.as_ref())
                .and_then(|r| r.audit_ref.clone());
            (
                TaskStatus::Blocked,
                Some(BlockReason::new(kind, role_report(&records)).with_audit_ref(audit_ref)),
            )
        } else if !merge_failures.is_empty() {
            (
                TaskStatus::Blocked,
                Some(BlockReason::new(
                    BlockKind::Integration,
                    format!("could not merge role changes: {}", merge_failures.join("; ")),
                )),
            )
        } else if team.integration_pass && !artifacts.is_empty() {
            let request = VerificationRequest {
                task_id: &task.id,
                role: None,
                label: "integration".to_string(),
                artifacts: &artifacts,
                snapshot_before: None,
                snapshot_after: None,
                workdir: None,
            };
            let verdict = self
                .looper
                .engine()
                .verify(request)
                .await
                .map_err(LoopError::Audit)?;
            usage.verification_runs += 1;
            integration = Some(verdict.summary());
            if verdict.is_pass() {
                (TaskStatus::Completed, None)
            } else {
                let mut reason = block_reason_for(&verdict);
                reason.kind = BlockKind::Integration;
                reason.message = format!("integration pass: {}", reason.message);
                (TaskStatus::Blocked, Some(reason))
            }
        } else {
            (TaskStatus::Completed, None)
        };

        let report = role_report(&records);
        let mut cp = Checkpoint::new(&task_ns, iterations_used, CheckpointPhase::Synthesis, status);
        cp.summary = report.clone();
        cp.usage = usage.clone();
        cp.last_verdict = integration.clone();
        cp.block_reason = block_reason.clone();
        cp.artifacts = artifacts.iter().map(ArtifactRecord::from).collect();
        cp.push_recent(
            CycleSummary {
                iteration: iterations_used,
                phase: CheckpointPhase::Synthesis,
                verdict: integration.as_ref().map(|v| v.kind).or(match status {
                    TaskStatus::Completed => Some(VerdictKind::Pass),
                    _ => Some(VerdictKind::Blocked),
                }),
                files_changed: artifacts.len(),
                note: report,
            },
            1,
        );
        store.save(cp)?;

        tracing::info!(
            task = %task.id,
            status = %status,
            cost_usd = usage.cost_usd,
            "multi-agent synthesis complete"
        );

        Ok(TeamOutcome {
            status,
            specialists: records,
            block_reason,
            integration,
            usage,
            iterations_used,
            interrupted: None,
        })
    }
}

fn merge_artifacts(into: &mut Vec<ChangedArtifact>, from: &[ChangedArtifact]) {
    for artifact in from {
        match into.iter_mut().find(|a| a.path == artifact.path) {
            Some(existing) => *existing = artifact.clone(),
            None => into.push(artifact.clone()),
        }
    }
}

fn role_report(records: &[SpecialistRecord]) -> String {
    records
        .iter()
        .map(|r| {
            let verdict = match (r.status, r.verdict) {
                (TaskStatus::Completed, _) => "PASS".to_string(),
                (TaskStatus::Pending, _) => "NOT STARTED".to_string(),
                (_, Some(kind)) if r.status == TaskStatus::Blocked => {
                    if kind == VerdictKind::Fail {
                        "BLOCKED (last FAIL)".to_string()
                    } else {
                        kind.to_string()
                    }
                }
                (TaskStatus::Blocked, _) => "BLOCKED".to_string(),
                (TaskStatus::InProgress, _) => "IN PROGRESS".to_string(),
            };
            let mut line = format!("{}: {}", r.role, verdict);
            if r.advisory {
                line.push_str(" [advisory]");
            }
            if let Some(ref reason) = r.reason {
                line.push_str(&format!(" ({})", reason.message));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("; ")
}
