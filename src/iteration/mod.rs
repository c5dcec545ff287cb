//! Bounded agent/verify loop for one task or one specialist role.
//!
//! Each cycle: poll the run mode, invoke the agent, verify the changed set,
//! write a checkpoint. The checkpoint is written before the loop acts on the
//! verdict, so a restart always resumes from the last completed cycle and
//! never re-executes it.

use std::sync::Arc;

use crate::agent::prompt::IterationFeedback;
use crate::agent::{Agent, AgentContext, AgentOutcome, HintSource, NoHints};
use crate::audit::ChangedArtifact;
use crate::checkpoint::{
    ArtifactRecord, Checkpoint, CheckpointPhase, CheckpointStore, CycleSummary, DEFAULT_RECENT_WINDOW, Namespace,
    ResourceUsage,
};
use crate::errors::LoopError;
use crate::run_mode::{RunMode, RunModeSource};
use crate::task::{BlockKind, BlockReason, Task, TaskStatus};
use crate::verify::{
    BlockCause, Verdict, VerdictKind, VerdictSummary, VerificationEngine, VerificationRequest,
};

/// Consecutive cycles without changes before a loop is blocked.
pub const STAGNATION_LIMIT: u32 = 2;

const SUMMARY_CHARS: usize = 500;

/// How a loop ended.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// `Completed`, `Blocked`, or `InProgress` when interrupted by the run mode.
    pub status: TaskStatus,
    pub iterations_used: u32,
    pub budget: u32,
    pub last_verdict: Option<VerdictSummary>,
    pub block_reason: Option<BlockReason>,
    /// Every artifact changed in this namespace, latest version per path.
    pub changed_artifacts: Vec<ChangedArtifact>,
    /// Cumulative for the namespace, reported once.
    pub usage: ResourceUsage,
    /// Checkpoints written by this call.
    pub checkpoints_written: u32,
    /// Set when the run mode stopped the loop before a cycle.
    pub interrupted: Option<RunMode>,
    /// The latest checkpoint was already terminal; nothing was executed.
    pub resumed_terminal: bool,
}

impl LoopOutcome {
    pub fn verdict_kind(&self) -> Option<VerdictKind> {
        self.last_verdict.as_ref().map(|v| v.kind)
    }

    pub fn audit_ref(&self) -> Option<String> {
        self.last_verdict.as_ref().and_then(|v| v.audit_ref.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Mutable state carried between cycles and into each checkpoint.
struct LoopState {
    iteration: u32,
    stagnant: u32,
    usage: ResourceUsage,
    recent: Vec<CycleSummary>,
    artifacts: Vec<ChangedArtifact>,
    last_verdict: Option<VerdictSummary>,
    feedback: Option<String>,
    written: u32,
}

impl LoopState {
    fn fresh() -> Self {
        Self {
            iteration: 0,
            stagnant: 0,
            usage: ResourceUsage::default(),
            recent: Vec::new(),
            artifacts: Vec::new(),
            last_verdict: None,
            feedback: None,
            written: 0,
        }
    }

    /// Everything the next cycle would have seen had the process not stopped.
    fn resume(cp: &Checkpoint) -> Self {
        Self {
            iteration: cp.iteration,
            stagnant: cp.stagnant_cycles,
            usage: cp.usage.clone(),
            recent: cp.recent.clone(),
            artifacts: cp.changed_artifacts(),
            last_verdict: cp.last_verdict.clone(),
            feedback: cp.pending_feedback.clone(),
            written: 0,
        }
    }

    fn merge_artifacts(&mut self, artifacts: &[ChangedArtifact]) {
        for artifact in artifacts {
            match self.artifacts.iter_mut().find(|a| a.path == artifact.path) {
                Some(existing) => *existing = artifact.clone(),
                None => self.artifacts.push(artifact.clone()),
            }
        }
    }
}

pub struct IterationLoop {
    agent: Arc<dyn Agent>,
    engine: Arc<VerificationEngine>,
    store: Arc<dyn CheckpointStore>,
    run_mode: Arc<dyn RunModeSource>,
    hints: Arc<dyn HintSource>,
    recent_window: usize,
}

impl IterationLoop {
    pub fn new(
        agent: Arc<dyn Agent>,
        engine: Arc<VerificationEngine>,
        store: Arc<dyn CheckpointStore>,
        run_mode: Arc<dyn RunModeSource>,
    ) -> Self {
        Self {
            agent,
            engine,
            store,
            run_mode,
            hints: Arc::new(NoHints),
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }

    pub fn with_hints(mut self, hints: Arc<dyn HintSource>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window.max(1);
        self
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn engine(&self) -> &Arc<VerificationEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn run_mode(&self) -> &Arc<dyn RunModeSource> {
        &self.run_mode
    }

    /// Run the loop for `task` (or one of its roles) with the given budget.
    pub async fn run(
        &self,
        task: &Task,
        role: Option<&str>,
        budget: u32,
    ) -> Result<LoopOutcome, LoopError> {
        let ns = match role {
            Some(role) => Namespace::role(&task.id, role),
            None => Namespace::task(&task.id),
        };
        let _lease = self.store.acquire(&ns)?;

        let mut state = match self.store.latest(&ns)? {
            Some(cp) if cp.is_terminal() => {
                tracing::info!(namespace = %ns, status = %cp.status, "latest checkpoint is terminal; nothing to resume");
                return Ok(LoopOutcome {
                    status: cp.status,
                    iterations_used: cp.iteration,
                    budget,
                    last_verdict: cp.last_verdict.clone(),
                    block_reason: cp.block_reason.clone(),
                    changed_artifacts: cp.changed_artifacts(),
                    usage: cp.usage.clone(),
                    checkpoints_written: 0,
                    interrupted: None,
                    resumed_terminal: true,
                });
            }
            Some(cp) => {
                tracing::info!(namespace = %ns, checkpoint = cp.number, iteration = cp.iteration, "resuming from checkpoint");
                LoopState::resume(&cp)
            }
            None => LoopState::fresh(),
        };

        while state.iteration < budget {
            let mode = self.run_mode.current();
            let runnable = match role {
                Some(_) => mode.allows_multi_agent(),
                None => mode.allows_single_agent(),
            };
            if !runnable {
                tracing::info!(namespace = %ns, %mode, "run mode stopped the loop before the next cycle");
                return Ok(Self::finish(state, TaskStatus::InProgress, None, budget, Some(mode)));
            }

            state.iteration += 1;
            let cycle = state.iteration;

            let mut ctx = AgentContext::for_task(task, role, cycle, budget);
            ctx.feedback = state.feedback.take();
            ctx.hints = self.hints.hints(task, role);
            ctx.recent = state.recent.clone();

            let outcome = match self.agent.invoke(&ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(namespace = %ns, cycle, error = %e, "agent invocation failed");
                    state.usage.agent_invocations += 1;
                    state.feedback = IterationFeedback::new()
                        .with_note(format!("The previous attempt did not finish: {}", e))
                        .build();
                    let exhausted = cycle >= budget;
                    let (phase, status, reason) = if exhausted {
                        (
                            CheckpointPhase::BudgetExhausted,
                            TaskStatus::Blocked,
                            Some(BlockReason::budget_exhausted(budget)),
                        )
                    } else {
                        (CheckpointPhase::AgentError, TaskStatus::InProgress, None)
                    };
                    let summary = format!("agent error: {}", e);
                    self.checkpoint(&ns, &mut state, phase, status, &summary, None, 0, reason.clone())?;
                    if exhausted {
                        return Ok(Self::finish(state, status, reason, budget, None));
                    }
                    continue;
                }
            };

            state.usage.add(&outcome.usage);

            if outcome.changed_artifacts.is_empty() {
                state.stagnant += 1;
                if state.stagnant >= STAGNATION_LIMIT {
                    let reason = BlockReason::stagnation();
                    tracing::warn!(namespace = %ns, cycle, "no changes for {} consecutive cycles", state.stagnant);
                    self.checkpoint(
                        &ns,
                        &mut state,
                        CheckpointPhase::Stagnation,
                        TaskStatus::Blocked,
                        &outcome.raw_output,
                        None,
                        0,
                        Some(reason.clone()),
                    )?;
                    return Ok(Self::finish(state, TaskStatus::Blocked, Some(reason), budget, None));
                }
            } else {
                state.stagnant = 0;
            }

            let verdict = self.verify(task, role, cycle, &outcome).await?;
            state.usage.verification_runs += 1;
            state.merge_artifacts(&outcome.changed_artifacts);

            if outcome.declared_complete && !verdict.is_pass() {
                tracing::info!(namespace = %ns, cycle, "agent declared completion but verification disagreed");
            }

            let phase = if outcome.changed_artifacts.is_empty() {
                CheckpointPhase::NoChanges
            } else {
                CheckpointPhase::Verified
            };
            let files = outcome.changed_artifacts.len();

            match verdict.kind {
                VerdictKind::Pass => {
                    self.checkpoint(&ns, &mut state, phase, TaskStatus::Completed, &outcome.raw_output, Some(&verdict), files, None)?;
                    return Ok(Self::finish(state, TaskStatus::Completed, None, budget, None));
                }
                VerdictKind::Blocked => {
                    let reason = block_reason_for(&verdict);
                    self.checkpoint(&ns, &mut state, phase, TaskStatus::Blocked, &outcome.raw_output, Some(&verdict), files, Some(reason.clone()))?;
                    return Ok(Self::finish(state, TaskStatus::Blocked, Some(reason), budget, None));
                }
                VerdictKind::Fail if cycle >= budget => {
                    let reason = BlockReason::budget_exhausted(budget).with_audit_ref(verdict.audit_ref.clone());
                    self.checkpoint(&ns, &mut state, CheckpointPhase::BudgetExhausted, TaskStatus::Blocked, &outcome.raw_output, Some(&verdict), files, Some(reason.clone()))?;
                    return Ok(Self::finish(state, TaskStatus::Blocked, Some(reason), budget, None));
                }
                VerdictKind::Fail => {
                    state.feedback = IterationFeedback::new()
                        .with_iteration_status(cycle, budget)
                        .with_verdict(&verdict)
                        .build();
                    self.checkpoint(&ns, &mut state, phase, TaskStatus::InProgress, &outcome.raw_output, Some(&verdict), files, None)?;
                }
            }
        }

        // Resumed at or past the budget without a terminal checkpoint.
        let reason = BlockReason::budget_exhausted(budget)
            .with_audit_ref(state.last_verdict.as_ref().and_then(|v| v.audit_ref.clone()));
        self.checkpoint(
            &ns,
            &mut state,
            CheckpointPhase::BudgetExhausted,
            TaskStatus::Blocked,
            "iteration budget exhausted",
            None,
            0,
            Some(reason.clone()),
        )?;
        Ok(Self::finish(state, TaskStatus::Blocked, Some(reason), budget, None))
    }

    async fn verify(
        &self,
        task: &Task,
        role: Option<&str>,
        cycle: u32,
        outcome: &AgentOutcome,
    ) -> Result<Verdict, LoopError> {
        let request = VerificationRequest::cycle(&task.id, role, cycle, &outcome.changed_artifacts)
            .with_snapshots(
                outcome.snapshot_before.as_deref(),
                outcome.snapshot_after.as_deref(),
            )
            .in_workdir(outcome.workdir.as_deref());
        self.engine.verify(request).await.map_err(LoopError::Audit)
    }

    #[allow(clippy::too_many_arguments)]
    fn checkpoint(
        &self,
        ns: &Namespace,
        state: &mut LoopState,
        phase: CheckpointPhase,
        status: TaskStatus,
        output: &str,
        verdict: Option<&Verdict>,
        files_changed: usize,
        block_reason: Option<BlockReason>,
    ) -> Result<(), LoopError> {
        if let Some(verdict) = verdict {
            state.last_verdict = Some(verdict.summary());
        }

        let note = match (verdict, &block_reason) {
            (_, Some(reason)) => reason.message.clone(),
            (Some(v), None) => v.describe(),
            (None, None) => shorten(output, 120),
        };

        let mut cp = Checkpoint::new(ns, state.iteration, phase, status);
        cp.summary = shorten(output, SUMMARY_CHARS);
        cp.next_steps = next_steps(status, verdict);
        cp.usage = state.usage.clone();
        cp.stagnant_cycles = state.stagnant;
        cp.last_verdict = state.last_verdict.clone();
        cp.block_reason = block_reason;
        cp.artifacts = state.artifacts.iter().map(ArtifactRecord::from).collect();
        if status == TaskStatus::InProgress {
            cp.pending_feedback = state.feedback.clone();
        }
        cp.recent = std::mem::take(&mut state.recent);
        cp.push_recent(
            CycleSummary {
                iteration: state.iteration,
                phase,
                verdict: verdict.map(|v| v.kind),
                files_changed,
                note,
            },
            self.recent_window,
        );
        state.recent = cp.recent.clone();

        let saved = self.store.save(cp)?;
        state.written += 1;
        tracing::info!(
            namespace = %ns,
            cycle = saved.iteration,
            checkpoint = saved.number,
            phase = %saved.phase,
            status = %saved.status,
            "checkpoint written"
        );
        Ok(())
    }

    fn finish(
        state: LoopState,
        status: TaskStatus,
        block_reason: Option<BlockReason>,
        budget: u32,
        interrupted: Option<RunMode>,
    ) -> LoopOutcome {
        LoopOutcome {
            status,
            iterations_used: state.iteration,
            budget,
            changed_artifacts: state.artifacts,
            last_verdict: state.last_verdict,
            block_reason,
            usage: state.usage,
            checkpoints_written: state.written,
            interrupted,
            resumed_terminal: false,
        }
    }
}

/// Block reason for a BLOCKED verdict.
pub fn block_reason_for(verdict: &Verdict) -> BlockReason {
    let kind = match verdict.cause {
        Some(BlockCause::Infrastructure) => BlockKind::Infrastructure,
        _ => BlockKind::PolicyViolation,
    };
    BlockReason::new(kind, verdict.describe()).with_audit_ref(verdict.audit_ref.clone())
}

fn next_steps(status: TaskStatus, verdict: Option<&Verdict>) -> Vec<String> {
    match (status, verdict) {
        (TaskStatus::InProgress, Some(v)) if v.kind == VerdictKind::Fail => {
            vec![format!(
                "Fix failing check '{}'",
                v.failed_step.as_deref().unwrap_or("unknown")
            )]
        }
        (TaskStatus::InProgress, None) => vec!["Retry the agent invocation".to_string()],
        (TaskStatus::Blocked, _) => vec!["Needs human review".to_string()],
        _ => Vec::new(),
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
